//! Durable sync checkpoint.
//!
//! ```json
//! {
//!   "version": 1,
//!   "initialized": true,
//!   "dbWatermarks": {"letter_a.sqlite3": {"ts": "2024-03-01T10:00:00Z", "key": "aline-barros/x"}},
//!   "naturalKeyToSongId": {"aline-barros/x": "6f1c..."},
//!   "lastSyncUtc": "2024-03-01T10:01:00Z",
//!   "stats": {"totalInsertedSongs": 1, "totalArtifacts": 1, "totalSectionsUpserted": 4}
//! }
//! ```
//!
//! Written only through [`write_json_atomic`], so a crash leaves either the
//! previous or the next checkpoint on disk, never a torn one.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

use crate::models::{CycleSummary, Watermark};

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CumulativeStats {
    #[serde(default)]
    pub total_inserted_songs: u64,
    #[serde(default)]
    pub total_artifacts: u64,
    #[serde(default)]
    pub total_sections_upserted: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub initialized: bool,
    #[serde(default)]
    pub db_watermarks: BTreeMap<String, Watermark>,
    #[serde(default)]
    pub natural_key_to_song_id: BTreeMap<String, String>,
    #[serde(default)]
    pub last_sync_utc: Option<String>,
    #[serde(default)]
    pub stats: CumulativeStats,
}

fn default_version() -> u32 {
    STATE_VERSION
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            initialized: false,
            db_watermarks: BTreeMap::new(),
            natural_key_to_song_id: BTreeMap::new(),
            last_sync_utc: None,
            stats: CumulativeStats::default(),
        }
    }
}

impl SyncState {
    /// Load the checkpoint. A missing or unreadable file starts fresh.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unparseable state file, starting fresh");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    /// Fold a finished cycle into the checkpoint.
    pub fn record_cycle(&mut self, summary: &CycleSummary, now_utc: String) {
        self.last_sync_utc = Some(now_utc);
        self.stats.total_inserted_songs += summary.inserted_songs;
        self.stats.total_artifacts += summary.artifacts_written;
        self.stats.total_sections_upserted += summary.sections_upserted;
    }
}

/// Serialize `value` as pretty JSON to `<path>.tmp`, then rename over `path`.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    let mut body = serde_json::to_string_pretty(value)?;
    body.push('\n');
    std::fs::write(&tmp, body)
        .with_context(|| format!("Failed to write: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace: {}", path.display()))?;
    Ok(())
}

/// Current UTC time as an RFC 3339 string with second precision.
pub fn utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
