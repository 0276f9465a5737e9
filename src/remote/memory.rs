//! In-memory [`RemoteStore`] implementation for tests and local runs.
//!
//! Rows are kept as JSON objects behind a `Mutex`, so every column a real
//! insert or patch would carry can be inspected afterwards. The store
//! enforces the unique constraints the sync engine relies on:
//!
//! - `artists.name_search`
//! - `artists.source_slug` (`artists_source_slug_uniq`)
//! - `songs (artist_id, title_search)`
//! - `songs.source_song_key` (`songs_source_song_key_uniq`)
//! - `song_sections (song_id, source_type, source_label, order_index)`
//!
//! Inserts are all-or-nothing per request, like a single SQL statement.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{RemoteStore, Table};
use crate::error::RemoteError;
use crate::models::{ArtistRow, NewArtist, SectionRow, SongPayload, SongRow, SourceKind};

type SectionKey = (String, SourceKind, String, u32);

#[derive(Default)]
struct Inner {
    artists: Vec<Map<String, Value>>,
    songs: Vec<Map<String, Value>>,
    sections: HashMap<SectionKey, SectionRow>,
    rejected_titles: HashSet<String>,
    song_insert_calls: usize,
    artist_insert_calls: usize,
    section_upsert_calls: usize,
    patches: Vec<(Table, String, Map<String, Value>)>,
}

/// In-process remote store.
#[derive(Default)]
pub struct InMemoryRemote {
    inner: Mutex<Inner>,
}

fn str_field<'a>(row: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    row.get(name).and_then(Value::as_str)
}

fn rejected(status: u16, message: impl Into<String>) -> RemoteError {
    RemoteError::Rejected {
        status,
        message: message.into(),
    }
}

fn unique_violation(constraint: &str) -> RemoteError {
    rejected(
        409,
        format!(
            "duplicate key value violates unique constraint \"{}\"",
            constraint
        ),
    )
}

fn to_object<T: serde::Serialize>(value: &T) -> Map<String, Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every song insert carrying this title fail with a 400.
    pub fn reject_title(&self, title: &str) {
        self.lock().rejected_titles.insert(title.to_string());
    }

    /// Insert an artist directly, bypassing call counters. Returns its id.
    pub fn seed_artist(&self, name: &str, name_search: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let mut row = to_object(&NewArtist {
            name: name.to_string(),
            name_search: name_search.to_string(),
        });
        row.insert("id".into(), Value::String(id.clone()));
        self.lock().artists.push(row);
        id
    }

    /// Insert a song directly, bypassing call counters. Returns its id.
    pub fn seed_song(&self, artist_id: &str, title: &str, title_search: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let mut row = Map::new();
        row.insert("id".into(), Value::String(id.clone()));
        row.insert("artist_id".into(), Value::String(artist_id.to_string()));
        row.insert("title".into(), Value::String(title.to_string()));
        row.insert("title_search".into(), Value::String(title_search.to_string()));
        self.lock().songs.push(row);
        id
    }

    pub fn artist_count(&self) -> usize {
        self.lock().artists.len()
    }

    pub fn song_count(&self) -> usize {
        self.lock().songs.len()
    }

    pub fn section_count(&self) -> usize {
        self.lock().sections.len()
    }

    /// Full row of a song by id.
    pub fn song(&self, id: &str) -> Option<Map<String, Value>> {
        self.lock()
            .songs
            .iter()
            .find(|r| str_field(r, "id") == Some(id))
            .cloned()
    }

    /// Full row of an artist by id.
    pub fn artist(&self, id: &str) -> Option<Map<String, Value>> {
        self.lock()
            .artists
            .iter()
            .find(|r| str_field(r, "id") == Some(id))
            .cloned()
    }

    /// Section rows of one song, ordered by source and position.
    pub fn sections_for(&self, song_id: &str) -> Vec<SectionRow> {
        let mut rows: Vec<SectionRow> = self
            .lock()
            .sections
            .values()
            .filter(|r| r.song_id == song_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (a.source_type.as_str(), &a.source_label, a.order_index).cmp(&(
                b.source_type.as_str(),
                &b.source_label,
                b.order_index,
            ))
        });
        rows
    }

    /// Patches received so far, for the given table.
    pub fn patches(&self, table: Table) -> Vec<(String, Map<String, Value>)> {
        self.lock()
            .patches
            .iter()
            .filter(|(t, _, _)| *t == table)
            .map(|(_, id, body)| (id.clone(), body.clone()))
            .collect()
    }

    pub fn song_insert_calls(&self) -> usize {
        self.lock().song_insert_calls
    }

    pub fn artist_insert_calls(&self) -> usize {
        self.lock().artist_insert_calls
    }

    pub fn section_upsert_calls(&self) -> usize {
        self.lock().section_upsert_calls
    }
}

impl Inner {
    fn rows(&mut self, table: Table) -> &mut Vec<Map<String, Value>> {
        match table {
            Table::Artists => &mut self.artists,
            _ => &mut self.songs,
        }
    }

    fn check_unique(
        rows: &[Map<String, Value>],
        skip_id: Option<&str>,
        column: &str,
        value: &str,
        constraint: &str,
    ) -> Result<(), RemoteError> {
        let taken = rows.iter().any(|r| {
            str_field(r, "id") != skip_id && str_field(r, column) == Some(value)
        });
        if taken {
            return Err(unique_violation(constraint));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn fetch_artists(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ArtistRow>, RemoteError> {
        Ok(self
            .lock()
            .artists
            .iter()
            .skip(offset)
            .take(limit)
            .map(|r| ArtistRow {
                id: str_field(r, "id").unwrap_or_default().to_string(),
                name_search: str_field(r, "name_search").map(str::to_string),
            })
            .collect())
    }

    async fn fetch_songs(&self, offset: usize, limit: usize) -> Result<Vec<SongRow>, RemoteError> {
        Ok(self
            .lock()
            .songs
            .iter()
            .skip(offset)
            .take(limit)
            .map(|r| SongRow {
                id: str_field(r, "id").unwrap_or_default().to_string(),
                artist_id: str_field(r, "artist_id").map(str::to_string),
                title_search: str_field(r, "title_search").map(str::to_string),
            })
            .collect())
    }

    async fn insert_artists(&self, rows: &[NewArtist]) -> Result<Vec<ArtistRow>, RemoteError> {
        let mut inner = self.lock();
        inner.artist_insert_calls += 1;

        let mut seen = HashSet::new();
        for row in rows {
            if row.name.trim().is_empty() {
                return Err(rejected(400, "null value in column \"name\""));
            }
            if !seen.insert(row.name_search.as_str()) {
                return Err(unique_violation("artists_name_search_key"));
            }
            Inner::check_unique(
                &inner.artists,
                None,
                "name_search",
                &row.name_search,
                "artists_name_search_key",
            )?;
        }

        let mut created = Vec::with_capacity(rows.len());
        for row in rows {
            let id = Uuid::new_v4().to_string();
            let mut stored = to_object(row);
            stored.insert("id".into(), Value::String(id.clone()));
            inner.artists.push(stored);
            created.push(ArtistRow {
                id,
                name_search: Some(row.name_search.clone()),
            });
        }
        Ok(created)
    }

    async fn insert_songs(&self, rows: &[SongPayload]) -> Result<Vec<SongRow>, RemoteError> {
        let mut inner = self.lock();
        inner.song_insert_calls += 1;

        let mut seen_titles = HashSet::new();
        let mut seen_keys = HashSet::new();
        for row in rows {
            if row.title.trim().is_empty() || inner.rejected_titles.contains(&row.title) {
                return Err(rejected(
                    400,
                    format!("invalid song row: {:?}", row.title),
                ));
            }
            let artist_known = inner
                .artists
                .iter()
                .any(|a| str_field(a, "id") == Some(row.artist_id.as_str()));
            if !artist_known {
                return Err(rejected(
                    409,
                    "insert or update on table \"songs\" violates foreign key constraint \"songs_artist_id_fkey\"",
                ));
            }
            let taken = inner.songs.iter().any(|s| {
                str_field(s, "artist_id") == Some(row.artist_id.as_str())
                    && str_field(s, "title_search") == Some(row.title_search.as_str())
            });
            if taken || !seen_titles.insert((&row.artist_id, &row.title_search)) {
                return Err(unique_violation("songs_artist_id_title_search_key"));
            }
            if let Some(key) = &row.metadata.source_song_key {
                if !seen_keys.insert(key.as_str()) {
                    return Err(unique_violation("songs_source_song_key_uniq"));
                }
                Inner::check_unique(
                    &inner.songs,
                    None,
                    "source_song_key",
                    key,
                    "songs_source_song_key_uniq",
                )?;
            }
        }

        let mut created = Vec::with_capacity(rows.len());
        for row in rows {
            let id = Uuid::new_v4().to_string();
            let mut stored = to_object(row);
            stored.insert("id".into(), Value::String(id.clone()));
            inner.songs.push(stored);
            created.push(SongRow {
                id,
                artist_id: Some(row.artist_id.clone()),
                title_search: Some(row.title_search.clone()),
            });
        }
        Ok(created)
    }

    async fn patch_row(
        &self,
        table: Table,
        id: &str,
        payload: &Map<String, Value>,
    ) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.patches.push((table, id.to_string(), payload.clone()));
        if table == Table::SongSections {
            return Err(rejected(400, "song_sections rows are not patched by id"));
        }

        let unique = match table {
            Table::Artists => ("source_slug", "artists_source_slug_uniq"),
            _ => ("source_song_key", "songs_source_song_key_uniq"),
        };
        if let Some(value) = payload.get(unique.0).and_then(Value::as_str) {
            Inner::check_unique(inner.rows(table), Some(id), unique.0, value, unique.1)?;
        }

        // PostgREST answers a patch matching no row with success.
        if let Some(row) = inner
            .rows(table)
            .iter_mut()
            .find(|r| str_field(r, "id") == Some(id))
        {
            for (k, v) in payload {
                row.insert(k.clone(), v.clone());
            }
        }
        Ok(())
    }

    async fn upsert_sections(&self, rows: &[SectionRow]) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.section_upsert_calls += 1;

        let mut seen = HashSet::new();
        for row in rows {
            if !seen.insert(row.conflict_key()) {
                return Err(rejected(
                    400,
                    "ON CONFLICT DO UPDATE command cannot affect row a second time",
                ));
            }
            let song_known = inner
                .songs
                .iter()
                .any(|s| str_field(s, "id") == Some(row.song_id.as_str()));
            if !song_known {
                return Err(rejected(
                    409,
                    "insert or update on table \"song_sections\" violates foreign key constraint \"song_sections_song_id_fkey\"",
                ));
            }
        }

        for row in rows {
            inner.sections.insert(row.conflict_key(), row.clone());
        }
        Ok(())
    }

    async fn count_rows(&self, table: Table) -> Result<u64, RemoteError> {
        let inner = self.lock();
        let n = match table {
            Table::Artists => inner.artists.len(),
            Table::Songs => inner.songs.len(),
            Table::SongSections => inner.sections.len(),
        };
        Ok(n as u64)
    }

    async fn delete_all(&self, table: Table) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        match table {
            Table::Artists => {
                if !inner.songs.is_empty() {
                    return Err(rejected(
                        409,
                        "update or delete on table \"artists\" violates foreign key constraint \"songs_artist_id_fkey\"",
                    ));
                }
                inner.artists.clear();
            }
            // Sections cascade with their songs.
            Table::Songs => {
                inner.songs.clear();
                inner.sections.clear();
            }
            Table::SongSections => inner.sections.clear(),
        }
        Ok(())
    }
}
