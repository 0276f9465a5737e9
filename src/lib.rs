//! # songbook-sync
//!
//! Incremental synchronizer from a scraped chord/lyrics corpus into a
//! PostgREST-style remote store.
//!
//! The scraper leaves per-letter SQLite shards that record which song
//! documents finished processing, plus one JSON document per song. Each
//! cycle reads the newest finished records past a per-shard watermark,
//! resolves them into artist and song payloads, writes them remotely with
//! chunked retries and per-row fallback, splits the chord text into
//! sections, and checkpoints progress to a local state file.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ SQLite shards│──▶│  Watermark   │──▶│   Resolver   │
//! │  letter_*.db │   │   cursors    │   │ JSON → rows  │
//! └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                              │
//!                      ┌───────────────────────┤
//!                      ▼                       ▼
//!                ┌────────────┐         ┌────────────┐
//!                │  PostgREST │         │  Artifacts │
//!                │  artists/  │         │ + state    │
//!                │  songs/... │         │   .json    │
//!                └────────────┘         └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export SUPABASE_URL=https://project.supabase.co
//! export SUPABASE_SERVICE_ROLE_KEY=...
//! songbook-sync sync --once --dry-run   # preview one cycle
//! songbook-sync sync                    # poll forever
//! songbook-sync status                  # checkpoint overview
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and credentials |
//! | [`models`] | Core data types |
//! | [`normalize`] | Search keys and text cleanup |
//! | [`segment`] | Section segmentation of chord sheets |
//! | [`shards`] | Shard discovery and candidate queries |
//! | [`cursor`] | Per-shard watermarks and global merge |
//! | [`resolve`] | Song document resolution |
//! | [`remote`] | Remote store trait, REST client, in-memory store |
//! | [`index`] | Remote artist/song index cache |
//! | [`upsert`] | Chunked writes, fallback and fingerprinted patches |
//! | [`artifact`] | Section artifact files |
//! | [`state`] | Durable checkpoint |
//! | [`sync`] | Cycle orchestration |
//! | [`status`] | Status report |
//! | [`error`] | Remote error taxonomy |

pub mod artifact;
pub mod config;
pub mod cursor;
pub mod error;
pub mod index;
pub mod models;
pub mod normalize;
pub mod remote;
pub mod resolve;
pub mod segment;
pub mod shards;
pub mod state;
pub mod status;
pub mod sync;
pub mod upsert;
