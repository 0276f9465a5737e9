//! Idempotent writes against the remote store.
//!
//! # Batch Fallback
//!
//! Every batch write goes through [`write_with_fallback`]: rows are sent in
//! chunks, and a chunk the store rejects is replayed one row at a time so a
//! single bad row costs only itself. The result is a [`BatchOutcome`] with
//! the rows that made it and one [`RowFailure`] per row that did not.
//!
//! # Metadata Patches
//!
//! Source metadata is patched only when its fingerprint differs from the
//! last one applied to that row in this process (see [`fingerprint`]).

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use tracing::{debug, warn};

use crate::error::RemoteError;
use crate::index::{RemoteIndexCache, SongIdentity};
use crate::models::{
    to_patch_payload, ArtistInput, ArtistRow, NewArtist, SectionRow, SectionSource, SongPayload,
    SongRow,
};
use crate::normalize::{non_blank, slug_to_title};
use crate::remote::{RemoteStore, Table};

/// A row the store refused, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    pub key: String,
    pub error: String,
}

/// Result of a chunked write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome<T> {
    pub succeeded: Vec<T>,
    pub failures: Vec<RowFailure>,
}

impl<T> Default for BatchOutcome<T> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failures: Vec::new(),
        }
    }
}

/// Write `rows` in chunks, falling back to single-row writes for any chunk
/// that fails.
///
/// A single-row write that succeeds but returns nothing counts as a
/// failure, since the row cannot be confirmed.
pub async fn write_with_fallback<'a, R, T, F, Fut>(
    rows: &'a [R],
    chunk_size: usize,
    label: &str,
    describe: impl Fn(&R) -> String,
    mut write: F,
) -> BatchOutcome<T>
where
    F: FnMut(&'a [R]) -> Fut,
    Fut: Future<Output = Result<Vec<T>, RemoteError>>,
{
    let mut outcome = BatchOutcome::default();
    for chunk in rows.chunks(chunk_size.max(1)) {
        match write(chunk).await {
            Ok(written) => {
                outcome.succeeded.extend(written);
                continue;
            }
            Err(e) => {
                warn!(
                    table = label,
                    rows = chunk.len(),
                    error = %e,
                    "chunk write failed, retrying per row"
                );
            }
        }

        for row in chunk.chunks(1) {
            let key = describe(&row[0]);
            match write(row).await {
                Ok(written) if written.is_empty() => {
                    warn!(table = label, key = %key, "single-row write returned nothing");
                    outcome.failures.push(RowFailure {
                        key,
                        error: "empty response".to_string(),
                    });
                }
                Ok(written) => outcome.succeeded.extend(written),
                Err(e) => {
                    warn!(table = label, key = %key, error = %e, "skipping row");
                    outcome.failures.push(RowFailure {
                        key,
                        error: e.to_string(),
                    });
                }
            }
        }
    }
    outcome
}

/// Canonical digest of a compacted payload; empty for an empty payload.
///
/// `serde_json::Map` keeps keys sorted, so serialization is canonical.
pub fn fingerprint(payload: &Map<String, Value>) -> String {
    if payload.is_empty() {
        return String::new();
    }
    let canonical = Value::Object(payload.clone()).to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Whether a patch was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Fingerprint matched, or nothing to send.
    Unchanged,
    Patched,
}

/// Column with a unique constraint that legacy duplicates can trip on.
fn narrow_retry_field(table: Table) -> Option<(&'static str, &'static str)> {
    match table {
        Table::Artists => Some(("source_slug", "artists_source_slug_uniq")),
        Table::Songs => Some(("source_song_key", "songs_source_song_key_uniq")),
        Table::SongSections => None,
    }
}

/// Patch `payload` onto row `id` unless its fingerprint is already applied.
///
/// On a unique violation of the table's source key the patch is retried
/// once without that column; an empty remainder is a no-op. The full
/// payload's fingerprint is recorded either way, so the conflict is not
/// replayed every cycle.
pub async fn patch_with_fingerprint(
    remote: &dyn RemoteStore,
    cache: &mut RemoteIndexCache,
    table: Table,
    id: &str,
    payload: Map<String, Value>,
) -> Result<PatchOutcome, RemoteError> {
    let fp = fingerprint(&payload);
    if fp.is_empty() || cache.fingerprint(table, id) == Some(fp.as_str()) {
        return Ok(PatchOutcome::Unchanged);
    }

    match remote.patch_row(table, id, &payload).await {
        Ok(()) => {}
        Err(e) => {
            let (column, constraint) = match narrow_retry_field(table) {
                Some(f) if payload.contains_key(f.0) && e.is_unique_violation(f.1) => f,
                _ => return Err(e),
            };
            let mut narrowed = payload.clone();
            narrowed.remove(column);
            debug!(table = table.as_str(), id, constraint, "retrying patch without {}", column);
            if narrowed.is_empty() {
                cache.set_fingerprint(table, id, fp);
                return Ok(PatchOutcome::Unchanged);
            }
            remote.patch_row(table, id, &narrowed).await?;
        }
    }
    cache.set_fingerprint(table, id, fp);
    Ok(PatchOutcome::Patched)
}

/// Merge artist inputs by search key, first non-blank value per field wins.
///
/// Keeps first-appearance order. Inputs with a blank search key are dropped.
pub fn merge_artist_inputs(inputs: &[ArtistInput]) -> Vec<ArtistInput> {
    let mut merged: Vec<ArtistInput> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for input in inputs {
        let key = input.search_key.trim();
        if key.is_empty() {
            continue;
        }
        match index.get(key) {
            Some(&i) => {
                let existing = &mut merged[i];
                if existing.name.trim().is_empty() {
                    existing.name = input.name.clone();
                }
                existing.metadata.merge_missing(&input.metadata);
            }
            None => {
                index.insert(key.to_string(), merged.len());
                merged.push(input.clone());
            }
        }
    }
    merged
}

/// Counters from [`ensure_artists`].
#[derive(Debug, Default)]
pub struct ArtistSync {
    pub created: usize,
    pub patched: usize,
    pub failures: Vec<RowFailure>,
}

/// Make sure every input artist exists remotely and its metadata is current.
///
/// Resolved ids land in the cache; an artist that still has no id
/// afterwards was rejected and its songs are dropped by the caller.
pub async fn ensure_artists(
    remote: &dyn RemoteStore,
    cache: &mut RemoteIndexCache,
    inputs: &[ArtistInput],
    chunk_size: usize,
) -> ArtistSync {
    let mut sync = ArtistSync::default();
    let merged = merge_artist_inputs(inputs);
    if merged.is_empty() {
        return sync;
    }

    let missing: Vec<NewArtist> = merged
        .iter()
        .filter(|a| cache.artist_id(&a.search_key).is_none())
        .map(|a| NewArtist {
            name: non_blank(&a.name).unwrap_or_else(|| slug_to_title(&a.search_key)),
            name_search: a.search_key.clone(),
        })
        .collect();

    if !missing.is_empty() {
        let outcome: BatchOutcome<ArtistRow> = write_with_fallback(
            &missing,
            chunk_size,
            Table::Artists.as_str(),
            |a: &NewArtist| a.name_search.clone(),
            |chunk| remote.insert_artists(chunk),
        )
        .await;
        for row in &outcome.succeeded {
            if let Some(ns) = row.name_search.as_deref().and_then(non_blank) {
                cache.insert_artist(&ns, row.id.trim());
                sync.created += 1;
            }
        }
        sync.failures = outcome.failures;
    }

    if merged.iter().any(|a| cache.artist_id(&a.search_key).is_none()) {
        debug!("unresolved artists after insert, refreshing artist index");
        if let Err(e) = cache.refresh_artists(remote).await {
            warn!(error = %e, "artist index refresh failed");
        }
    }

    for artist in &merged {
        let Some(id) = cache.artist_id(&artist.search_key).map(str::to_string) else {
            continue;
        };
        let payload = to_patch_payload(&artist.metadata);
        match patch_with_fingerprint(remote, cache, Table::Artists, &id, payload).await {
            Ok(PatchOutcome::Patched) => sync.patched += 1,
            Ok(PatchOutcome::Unchanged) => {}
            Err(e) => warn!(artist_id = %id, error = %e, "failed to patch artist metadata"),
        }
    }
    sync
}

/// Insert songs in chunks and index the created rows by identity.
pub async fn insert_songs_with_fallback(
    remote: &dyn RemoteStore,
    payloads: &[SongPayload],
    chunk_size: usize,
) -> (HashMap<SongIdentity, String>, Vec<RowFailure>) {
    let outcome: BatchOutcome<SongRow> = write_with_fallback(
        payloads,
        chunk_size,
        Table::Songs.as_str(),
        |p: &SongPayload| {
            p.metadata
                .source_song_key
                .clone()
                .unwrap_or_else(|| format!("{}/{}", p.artist_id, p.title_search))
        },
        |chunk| remote.insert_songs(chunk),
    )
    .await;

    let mut created = HashMap::new();
    for row in outcome.succeeded {
        let artist_id = row.artist_id.unwrap_or_default();
        let title_search = row.title_search.unwrap_or_default();
        let id = row.id.trim().to_string();
        if artist_id.is_empty() || title_search.is_empty() || id.is_empty() {
            continue;
        }
        created.insert((artist_id, title_search), id);
    }
    (created, outcome.failures)
}

/// Flatten the section sources of one song into rows for `song_sections`.
///
/// Sections with blank content are dropped.
pub fn build_section_rows(song_id: &str, sources: &[SectionSource]) -> Vec<SectionRow> {
    let Some(song_id) = non_blank(song_id) else {
        return Vec::new();
    };
    let mut rows = Vec::new();
    for source in sources {
        let source_label =
            non_blank(&source.source_label).unwrap_or_else(|| "principal".to_string());
        for (i, section) in source.sections.iter().enumerate() {
            let Some(content) = non_blank(&section.content) else {
                continue;
            };
            let order_index = if section.order_index == 0 {
                i as u32 + 1
            } else {
                section.order_index
            };
            rows.push(SectionRow {
                song_id: song_id.clone(),
                source_type: source.source_type,
                source_label: source_label.clone(),
                order_index,
                section_type: section.section_type,
                section_label: non_blank(&section.label)
                    .unwrap_or_else(|| crate::segment::UNLABELED.to_string()),
                line_start: section.line_start,
                line_end: section.line_end,
                content,
            });
        }
    }
    rows
}

/// Collapse rows sharing a conflict key; the later row wins and keeps the
/// position of the first.
pub fn dedup_section_rows(rows: Vec<SectionRow>) -> Vec<SectionRow> {
    let mut out: Vec<SectionRow> = Vec::with_capacity(rows.len());
    let mut index = HashMap::new();
    for row in rows {
        match index.get(&row.conflict_key()) {
            Some(&i) => out[i] = row,
            None => {
                index.insert(row.conflict_key(), out.len());
                out.push(row);
            }
        }
    }
    out
}

/// Merge-upsert section rows. Returns how many rows were written.
pub async fn upsert_sections_with_fallback(
    remote: &dyn RemoteStore,
    rows: Vec<SectionRow>,
    chunk_size: usize,
) -> (usize, Vec<RowFailure>) {
    let rows = dedup_section_rows(rows);
    if rows.is_empty() {
        return (0, Vec::new());
    }
    let outcome: BatchOutcome<()> = write_with_fallback(
        &rows,
        chunk_size,
        Table::SongSections.as_str(),
        |r: &SectionRow| {
            format!(
                "{}/{}/{}#{}",
                r.song_id,
                r.source_type.as_str(),
                r.source_label,
                r.order_index
            )
        },
        move |chunk| async move {
            remote
                .upsert_sections(chunk)
                .await
                .map(|()| vec![(); chunk.len()])
        },
    )
    .await;
    (outcome.succeeded.len(), outcome.failures)
}
