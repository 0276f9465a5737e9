//! # songbook-sync CLI
//!
//! The `songbook-sync` binary runs the sync loop, reports checkpoint status
//! and exposes the section segmenter for inspecting chord sheets.
//!
//! ## Usage
//!
//! ```bash
//! songbook-sync --config ./config/songbook-sync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `songbook-sync sync` | Poll the shards and push new songs to the remote store |
//! | `songbook-sync sync --once` | Run a single cycle and exit |
//! | `songbook-sync status` | Show watermarks, counters and remote row counts |
//! | `songbook-sync segment <file>` | Split a chord/lyrics text file into sections |
//!
//! ## Examples
//!
//! ```bash
//! # Preview one cycle without writing remotely
//! songbook-sync sync --once --dry-run
//!
//! # Long-running sync with a smaller batch
//! songbook-sync sync --batch-size 200 --poll-seconds 30
//!
//! # Inspect how a sheet would be segmented
//! songbook-sync segment ./cifra.txt --json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use songbook_sync::config;
use songbook_sync::remote::rest::RestClient;
use songbook_sync::remote::RemoteStore;
use songbook_sync::segment::split_sections;
use songbook_sync::status;
use songbook_sync::sync::{SyncSettings, Synchronizer};

/// Incremental sync of a scraped chord/lyrics corpus into a remote store.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/songbook-sync.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "songbook-sync",
    about = "Incremental sync of a scraped chord/lyrics corpus into a PostgREST-style remote store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/songbook-sync.toml")]
    config: PathBuf,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync loop.
    ///
    /// Reads finished records past the stored watermarks, writes artists,
    /// songs and sections remotely, and checkpoints after every cycle.
    /// Runs until interrupted unless `--once` is given.
    Sync {
        /// Run a single cycle and exit. A failed cycle exits non-zero.
        #[arg(long)]
        once: bool,

        /// Resolve and write artifacts but send nothing to the remote store.
        #[arg(long)]
        dry_run: bool,

        /// Never wipe the remote tables, even on a fresh state file.
        #[arg(long)]
        no_reset: bool,

        /// Maximum candidates per cycle, across all shards.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Seconds to sleep between cycles.
        #[arg(long)]
        poll_seconds: Option<u64>,
    },

    /// Show the checkpoint and, when credentials are set, remote row counts.
    Status,

    /// Split a chord/lyrics text file into sections and print them.
    Segment {
        /// Text file to segment.
        file: PathBuf,

        /// Print the sections as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "debug" } else { "info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Segment { file, json } => segment_file(&file, json)?,
        Commands::Sync {
            once,
            dry_run,
            no_reset,
            batch_size,
            poll_seconds,
        } => {
            let cfg = config::load_config(&cli.config)?;
            let mut settings = SyncSettings::from_config(&cfg);
            settings.once = once;
            settings.dry_run = dry_run;
            if no_reset {
                settings.reset_on_first_run = false;
            }
            if let Some(n) = batch_size {
                settings.batch_size = n.max(1);
            }
            if let Some(secs) = poll_seconds {
                settings.poll_seconds = secs;
            }

            let creds = cfg.remote.credentials()?;
            let remote: Arc<dyn RemoteStore> = Arc::new(RestClient::new(&creds, &cfg.remote)?);
            Synchronizer::new(settings, remote)?.run().await?;
        }
        Commands::Status => {
            let cfg = config::load_config(&cli.config)?;
            let remote = match cfg.remote.credentials() {
                Ok(creds) => Some(RestClient::new(&creds, &cfg.remote)?),
                Err(e) => {
                    warn!(error = %e, "remote counts skipped");
                    None
                }
            };
            status::run_status(&cfg, remote.as_ref().map(|r| r as &dyn RemoteStore)).await?;
        }
    }

    Ok(())
}

fn segment_file(path: &Path, json: bool) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read: {}", path.display()))?;
    let sections = split_sections(&text);

    if json {
        println!("{}", serde_json::to_string_pretty(&sections)?);
        return Ok(());
    }

    for section in &sections {
        let lines = match (section.line_start, section.line_end) {
            (Some(start), Some(end)) => format!("{}-{}", start, end),
            _ => "-".to_string(),
        };
        println!(
            "#{} {:<13} {:<24} lines {}",
            section.order_index,
            section.section_type.as_str(),
            section.label,
            lines
        );
        for line in section.content.lines() {
            println!("    {}", line);
        }
    }
    println!("{} section(s)", sections.len());
    Ok(())
}
