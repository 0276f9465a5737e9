//! Core data models used throughout the sync engine.
//!
//! These types represent the candidates read from the local shards, the
//! payloads written to the remote store, and the section structure derived
//! from each song's text.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A song row read from one source shard, not yet resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    /// Shard file name (e.g. `letter_a.sqlite3`).
    pub shard: String,
    /// Globally unique, stable key assigned by the scraper.
    pub natural_key: String,
    /// Path of the song document, relative to the dataset root.
    pub document_ref: String,
    pub processed_at: String,
    pub artist_slug: String,
    pub song_slug: String,
    pub song_name: Option<String>,
}

impl SourceRecord {
    /// Ordering key within a shard: `(processed_at, natural_key)`.
    pub fn ordering_key(&self) -> (&str, &str) {
        (&self.processed_at, &self.natural_key)
    }

    /// The watermark that marks this record as consumed.
    pub fn watermark(&self) -> Watermark {
        Watermark {
            ts: self.processed_at.clone(),
            key: self.natural_key.clone(),
        }
    }
}

/// Last consumed ordering key of a shard.
///
/// The derived ordering compares `ts` first, then `key`, which is exactly
/// the shard query order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Watermark {
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub key: String,
}

impl Watermark {
    /// Whether a record with this ordering key is still unseen.
    pub fn admits(&self, ts: &str, key: &str) -> bool {
        (ts, key) > (self.ts.as_str(), self.key.as_str())
    }
}

/// Closed set of structural section types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Intro,
    Verse,
    PreChorus,
    Chorus,
    Bridge,
    Solo,
    Instrumental,
    Outro,
    Tag,
    Unknown,
}

impl SectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionType::Intro => "intro",
            SectionType::Verse => "verse",
            SectionType::PreChorus => "pre_chorus",
            SectionType::Chorus => "chorus",
            SectionType::Bridge => "bridge",
            SectionType::Solo => "solo",
            SectionType::Instrumental => "instrumental",
            SectionType::Outro => "outro",
            SectionType::Tag => "tag",
            SectionType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed section of a song text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    /// 1-based position among the sections of one text variant.
    pub order_index: u32,
    pub section_type: SectionType,
    pub label: String,
    pub line_start: Option<usize>,
    pub line_end: Option<usize>,
    pub content: String,
}

/// Which page of the document a text variant came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// The main chord sheet.
    Cifra,
    /// The lyrics-only page.
    Letra,
    /// An alternate chord sheet version.
    CifraVersion,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Cifra => "cifra",
            SourceKind::Letra => "letra",
            SourceKind::CifraVersion => "cifra_version",
        }
    }
}

/// Sections derived from one text variant of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionSource {
    pub source_type: SourceKind,
    pub source_label: String,
    pub sections: Vec<Section>,
}

/// Extended artist metadata copied from the scraped documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_artist_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_genre_slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_hits: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_artist_image_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_artist_head_image_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_photos_api_path: Option<String>,
}

/// Fill `slot` from `incoming` only while `slot` is still empty.
fn fill<T: Clone>(slot: &mut Option<T>, incoming: &Option<T>) {
    if slot.is_none() {
        slot.clone_from(incoming);
    }
}

impl ArtistMetadata {
    /// First-non-empty-wins merge: populated fields are never overwritten.
    pub fn merge_missing(&mut self, other: &ArtistMetadata) {
        fill(&mut self.source_slug, &other.source_slug);
        fill(&mut self.source_artist_id, &other.source_artist_id);
        fill(&mut self.source_genre_slug, &other.source_genre_slug);
        fill(&mut self.source_hits, &other.source_hits);
        fill(&mut self.source_artist_image_path, &other.source_artist_image_path);
        fill(
            &mut self.source_artist_head_image_path,
            &other.source_artist_head_image_path,
        );
        fill(&mut self.source_photos_api_path, &other.source_photos_api_path);
    }
}

/// Extended song metadata used for traceability back to the scrape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_song_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_song_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_lyrics_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_song_slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_artist_slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_json_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_processed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_variant: Option<String>,
}

/// Serialize a metadata struct into a PATCH body.
///
/// Absent fields are already skipped by serde; blank strings are dropped
/// here so they can never overwrite a populated remote column.
pub fn to_patch_payload<T: Serialize>(metadata: &T) -> Map<String, Value> {
    match serde_json::to_value(metadata) {
        Ok(Value::Object(map)) => map
            .into_iter()
            .filter(|(_, v)| match v {
                Value::Null => false,
                Value::String(s) => !s.trim().is_empty(),
                _ => true,
            })
            .collect(),
        _ => Map::new(),
    }
}

/// An artist the current cycle needs to exist remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtistInput {
    pub name: String,
    pub search_key: String,
    pub metadata: ArtistMetadata,
}

/// Body of an artist insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewArtist {
    pub name: String,
    pub name_search: String,
}

/// Body of a song insert. `artist_id` is filled in once the artist resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongPayload {
    pub title: String,
    pub title_search: String,
    pub artist_id: String,
    pub lyrics_chords: String,
    pub original_key: String,
    pub tuning: String,
    pub capo: Option<i64>,
    pub category: String,
    pub views: i64,
    #[serde(flatten)]
    pub metadata: SongMetadata,
}

/// A fully resolved candidate, ready for the upsert engine.
#[derive(Debug, Clone)]
pub struct ResolvedSong {
    pub natural_key: String,
    pub artist: ArtistInput,
    pub payload: SongPayload,
    pub sources: Vec<SectionSource>,
    pub song_slug: String,
    pub document_ref: String,
    pub processed_at: String,
}

/// Row of the `song_sections` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRow {
    pub song_id: String,
    pub source_type: SourceKind,
    pub source_label: String,
    pub order_index: u32,
    pub section_type: SectionType,
    pub section_label: String,
    pub line_start: Option<usize>,
    pub line_end: Option<usize>,
    pub content: String,
}

impl SectionRow {
    /// Composite conflict key used by the remote upsert.
    pub fn conflict_key(&self) -> (String, SourceKind, String, u32) {
        (
            self.song_id.clone(),
            self.source_type,
            self.source_label.clone(),
            self.order_index,
        )
    }
}

/// Artist row as returned by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRow {
    pub id: String,
    #[serde(default)]
    pub name_search: Option<String>,
}

/// Song row as returned by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongRow {
    pub id: String,
    #[serde(default)]
    pub artist_id: Option<String>,
    #[serde(default)]
    pub title_search: Option<String>,
}

/// Counters reported for one sync cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub candidates: u64,
    pub inserted_songs: u64,
    pub skipped_existing: u64,
    pub missing: u64,
    pub skipped_bad: u64,
    pub artifacts_written: u64,
    pub sections_upserted: u64,
    pub metadata_patched: u64,
}
