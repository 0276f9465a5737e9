//! Process-lifetime index of what already exists remotely.
//!
//! Rebuilt from a full paged scan at startup and extended as writes
//! succeed. It is a cache, never the source of truth: the remote unique
//! constraints are.

use std::collections::HashMap;
use tracing::info;

use crate::error::RemoteError;
use crate::remote::{RemoteStore, Table, PAGE_SIZE};

/// `(artist_id, title_search)` identity of a song.
pub type SongIdentity = (String, String);

#[derive(Debug, Default)]
pub struct RemoteIndexCache {
    artists: HashMap<String, String>,
    songs: HashMap<SongIdentity, String>,
    fingerprints: HashMap<(Table, String), String>,
}

impl RemoteIndexCache {
    /// Full scan of artists and songs.
    pub async fn rebuild(remote: &dyn RemoteStore) -> Result<Self, RemoteError> {
        let mut cache = Self::default();
        cache.refresh_artists(remote).await?;

        let mut offset = 0;
        loop {
            let page = remote.fetch_songs(offset, PAGE_SIZE).await?;
            let n = page.len();
            for row in page {
                let artist_id = row.artist_id.unwrap_or_default();
                let title_search = row.title_search.unwrap_or_default();
                let id = row.id.trim().to_string();
                if !id.is_empty() && !artist_id.trim().is_empty() && !title_search.trim().is_empty()
                {
                    cache.songs.insert(
                        (artist_id.trim().to_string(), title_search.trim().to_string()),
                        id,
                    );
                }
            }
            if n < PAGE_SIZE {
                break;
            }
            offset += n;
        }

        info!(
            artists = cache.artists.len(),
            songs = cache.songs.len(),
            "remote index loaded"
        );
        Ok(cache)
    }

    /// Re-read every artist, merging into the current map.
    pub async fn refresh_artists(&mut self, remote: &dyn RemoteStore) -> Result<(), RemoteError> {
        let mut offset = 0;
        loop {
            let page = remote.fetch_artists(offset, PAGE_SIZE).await?;
            let n = page.len();
            for row in page {
                let name_search = row.name_search.unwrap_or_default();
                let (id, key) = (row.id.trim(), name_search.trim());
                if !id.is_empty() && !key.is_empty() {
                    self.artists.insert(key.to_string(), id.to_string());
                }
            }
            if n < PAGE_SIZE {
                return Ok(());
            }
            offset += n;
        }
    }

    pub fn artist_id(&self, search_key: &str) -> Option<&str> {
        self.artists.get(search_key).map(String::as_str)
    }

    pub fn insert_artist(&mut self, search_key: &str, id: &str) {
        self.artists.insert(search_key.to_string(), id.to_string());
    }

    pub fn song_id(&self, artist_id: &str, title_search: &str) -> Option<&str> {
        self.songs
            .get(&(artist_id.to_string(), title_search.to_string()))
            .map(String::as_str)
    }

    pub fn insert_song(&mut self, artist_id: &str, title_search: &str, id: &str) {
        self.songs
            .insert((artist_id.to_string(), title_search.to_string()), id.to_string());
    }

    pub fn artist_count(&self) -> usize {
        self.artists.len()
    }

    pub fn song_count(&self) -> usize {
        self.songs.len()
    }

    /// Last applied metadata fingerprint of a row.
    pub fn fingerprint(&self, table: Table, id: &str) -> Option<&str> {
        self.fingerprints
            .get(&(table, id.to_string()))
            .map(String::as_str)
    }

    pub fn set_fingerprint(&mut self, table: Table, id: &str, fingerprint: String) {
        self.fingerprints.insert((table, id.to_string()), fingerprint);
    }
}
