//! Remote store abstraction.
//!
//! The [`RemoteStore`] trait covers exactly the operations the sync engine
//! needs from the filter/pagination query API: paged scans of the artist
//! and song indexes, inserts that return the created rows, metadata
//! patches by id, the section merge-upsert, exact counts and the one-time
//! reset.
//!
//! | Implementation | Purpose |
//! |----------------|---------|
//! | [`rest::RestClient`] | PostgREST-style HTTP API with retry/backoff |
//! | [`memory::InMemoryRemote`] | In-process store for tests and local runs |
//!
//! All methods return [`RemoteError`] so callers can isolate failing rows
//! without string matching on `anyhow` messages.

pub mod memory;
pub mod rest;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::RemoteError;
use crate::models::{ArtistRow, NewArtist, SectionRow, SongPayload, SongRow};

/// Page size used when scanning the remote indexes.
pub const PAGE_SIZE: usize = 1000;

/// Remote tables touched by the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Artists,
    Songs,
    SongSections,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Artists => "artists",
            Table::Songs => "songs",
            Table::SongSections => "song_sections",
        }
    }
}

/// Composite key of the section upsert.
pub const SECTION_CONFLICT_COLUMNS: &str = "song_id,source_type,source_label,order_index";

/// Operations the sync engine performs against the remote store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// One page of `(id, name_search)` in creation order.
    async fn fetch_artists(&self, offset: usize, limit: usize)
        -> Result<Vec<ArtistRow>, RemoteError>;

    /// One page of `(id, artist_id, title_search)` in creation order.
    async fn fetch_songs(&self, offset: usize, limit: usize) -> Result<Vec<SongRow>, RemoteError>;

    /// Insert artists and return the created rows.
    async fn insert_artists(&self, rows: &[NewArtist]) -> Result<Vec<ArtistRow>, RemoteError>;

    /// Insert songs and return the created rows.
    async fn insert_songs(&self, rows: &[SongPayload]) -> Result<Vec<SongRow>, RemoteError>;

    /// Patch columns of the row with the given id.
    async fn patch_row(
        &self,
        table: Table,
        id: &str,
        payload: &Map<String, Value>,
    ) -> Result<(), RemoteError>;

    /// Merge-upsert section rows on [`SECTION_CONFLICT_COLUMNS`].
    async fn upsert_sections(&self, rows: &[SectionRow]) -> Result<(), RemoteError>;

    /// Exact row count of a table.
    async fn count_rows(&self, table: Table) -> Result<u64, RemoteError>;

    /// Delete every row of a table.
    async fn delete_all(&self, table: Table) -> Result<(), RemoteError>;
}
