//! Checkpoint and remote overview.
//!
//! Prints what the synchronizer has done so far: per-shard watermarks,
//! mapped songs, cumulative counters and the time of the last cycle. When
//! a remote store is reachable, exact row counts are added. Used by
//! `songbook-sync status`.

use anyhow::Result;
use tracing::warn;

use crate::config::Config;
use crate::remote::{RemoteStore, Table};
use crate::shards::discover_shards;
use crate::state::SyncState;

/// Exact row counts of the remote tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteCounts {
    pub artists: u64,
    pub songs: u64,
    pub song_sections: u64,
}

pub async fn remote_counts(remote: &dyn RemoteStore) -> Result<RemoteCounts> {
    Ok(RemoteCounts {
        artists: remote.count_rows(Table::Artists).await?,
        songs: remote.count_rows(Table::Songs).await?,
        song_sections: remote.count_rows(Table::SongSections).await?,
    })
}

/// Run the status command.
pub async fn run_status(config: &Config, remote: Option<&dyn RemoteStore>) -> Result<()> {
    let state_path = config.dataset.state_path();
    let state = SyncState::load(&state_path);
    let shards = discover_shards(&config.dataset.shard_dir(), &config.dataset.shard_glob)?;

    println!("songbook-sync status");
    println!("===================");
    println!();
    println!("  Dataset:     {}", config.dataset.root.display());
    println!("  State file:  {}", state_path.display());
    println!("  Initialized: {}", if state.initialized { "yes" } else { "no" });
    println!(
        "  Last sync:   {}",
        state
            .last_sync_utc
            .as_deref()
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!();
    println!("  Mapped songs:      {}", state.natural_key_to_song_id.len());
    println!("  Inserted (total):  {}", state.stats.total_inserted_songs);
    println!("  Artifacts (total): {}", state.stats.total_artifacts);
    println!("  Sections (total):  {}", state.stats.total_sections_upserted);

    if !shards.is_empty() || !state.db_watermarks.is_empty() {
        println!();
        println!("  By shard:");
        println!("  {:<24} {:<22} {}", "SHARD", "WATERMARK", "LAST KEY");
        println!("  {}", "-".repeat(76));
        let mut names: Vec<&str> = shards.iter().map(|s| s.name.as_str()).collect();
        for name in state.db_watermarks.keys() {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        names.sort_unstable();
        for name in names {
            match state.db_watermarks.get(name) {
                Some(wm) => println!("  {:<24} {:<22} {}", name, wm.ts, wm.key),
                None => println!("  {:<24} {:<22} -", name, "not started"),
            }
        }
    }

    if let Some(remote) = remote {
        println!();
        match remote_counts(remote).await {
            Ok(counts) => {
                println!("  Remote artists:  {}", counts.artists);
                println!("  Remote songs:    {}", counts.songs);
                println!("  Remote sections: {}", counts.song_sections);
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "remote counts unavailable");
                println!("  Remote counts:   unavailable");
            }
        }
    }

    println!();
    Ok(())
}

/// Format an RFC 3339 timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts: &str) -> String {
    let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(ts) else {
        return ts.to_string();
    };
    let delta = chrono::Utc::now().timestamp() - parsed.timestamp();

    if delta < 0 {
        ts.to_string()
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        parsed.format("%Y-%m-%d %H:%M").to_string()
    }
}
