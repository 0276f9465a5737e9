//! Candidate source reader.
//!
//! Each shard is one SQLite file under `<dataset>/db`. A shard is opened
//! read-only for every read and closed right after, so the scraper can keep
//! writing to it between cycles.

use anyhow::{Context, Result};
use globset::Glob;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::Row;
use std::path::{Path, PathBuf};

use crate::models::{SourceRecord, Watermark};

/// One shard file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    /// File name, used as the watermark key.
    pub name: String,
    pub path: PathBuf,
}

const CANDIDATE_QUERY: &str = r#"
    SELECT song_key, song_json_path, processed_at_utc, artist_slug, song_slug, song_name
    FROM songs
    WHERE status = 'done'
      AND song_json_path IS NOT NULL
      AND processed_at_utc IS NOT NULL
      AND (processed_at_utc > ? OR (processed_at_utc = ? AND song_key > ?))
    ORDER BY processed_at_utc ASC, song_key ASC
    LIMIT ?
"#;

/// List the shard files in `dir` whose name matches `pattern`, sorted by name.
///
/// A missing directory yields no shards.
pub fn discover_shards(dir: &Path, pattern: &str) -> Result<Vec<Shard>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let matcher = Glob::new(pattern)
        .with_context(|| format!("Invalid shard glob: {}", pattern))?
        .compile_matcher();

    let mut shards = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list shard directory: {}", dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if matcher.is_match(&name) {
            shards.push(Shard {
                name,
                path: entry.path(),
            });
        }
    }
    shards.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(shards)
}

/// Read up to `limit` records of `shard` strictly after `after`.
pub async fn read_candidates(
    shard: &Shard,
    after: &Watermark,
    limit: usize,
) -> Result<Vec<SourceRecord>> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let options = SqliteConnectOptions::new()
        .filename(&shard.path)
        .read_only(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open shard: {}", shard.path.display()))?;

    let rows = sqlx::query(CANDIDATE_QUERY)
        .bind(&after.ts)
        .bind(&after.ts)
        .bind(&after.key)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&pool)
        .await
        .with_context(|| format!("Failed to query shard: {}", shard.name));
    pool.close().await;

    let mut records = Vec::new();
    for row in rows? {
        let natural_key: String = row.try_get("song_key")?;
        records.push(SourceRecord {
            shard: shard.name.clone(),
            natural_key,
            document_ref: row.try_get("song_json_path")?,
            processed_at: row.try_get("processed_at_utc")?,
            artist_slug: row
                .try_get::<Option<String>, _>("artist_slug")?
                .unwrap_or_default(),
            song_slug: row
                .try_get::<Option<String>, _>("song_slug")?
                .unwrap_or_default(),
            song_name: row.try_get("song_name")?,
        });
    }
    Ok(records)
}
