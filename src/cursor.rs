//! Per-shard watermarks merged into one globally ordered candidate stream.

use anyhow::Result;
use std::collections::BTreeMap;

use crate::models::{SourceRecord, Watermark};
use crate::shards::{self, Shard};

/// Resume position of every shard, keyed by shard file name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatermarkCursorSet {
    marks: BTreeMap<String, Watermark>,
}

impl WatermarkCursorSet {
    pub fn new(marks: BTreeMap<String, Watermark>) -> Self {
        Self { marks }
    }

    /// Current watermark of a shard; unseen shards start at the beginning.
    pub fn get(&self, shard: &str) -> Watermark {
        self.marks.get(shard).cloned().unwrap_or_default()
    }

    /// Record `record` as consumed. Never moves a watermark backwards.
    pub fn advance(&mut self, record: &SourceRecord) {
        let next = record.watermark();
        match self.marks.get_mut(&record.shard) {
            Some(current) if *current >= next => {}
            Some(current) => *current = next,
            None => {
                self.marks.insert(record.shard.clone(), next);
            }
        }
    }

    pub fn into_marks(self) -> BTreeMap<String, Watermark> {
        self.marks
    }

    pub fn marks(&self) -> &BTreeMap<String, Watermark> {
        &self.marks
    }

    /// Read up to `limit` records from every shard and keep the globally
    /// first `limit` by `(processed_at, natural_key, shard)`.
    pub async fn select_batch(&self, shards: &[Shard], limit: usize) -> Result<Vec<SourceRecord>> {
        let mut candidates = Vec::new();
        for shard in shards {
            let after = self.get(&shard.name);
            candidates.extend(shards::read_candidates(shard, &after, limit).await?);
        }
        Ok(merge_candidates(candidates, limit))
    }
}

/// Global ordering and truncation of the per-shard reads.
pub fn merge_candidates(mut candidates: Vec<SourceRecord>, limit: usize) -> Vec<SourceRecord> {
    candidates.sort_by(|a, b| {
        (&a.processed_at, &a.natural_key, &a.shard).cmp(&(
            &b.processed_at,
            &b.natural_key,
            &b.shard,
        ))
    });
    candidates.truncate(limit);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shards::test_support::create_shard;
    use tempfile::TempDir;

    fn record(shard: &str, ts: &str, key: &str) -> SourceRecord {
        SourceRecord {
            shard: shard.into(),
            natural_key: key.into(),
            document_ref: format!("{}.json", key),
            processed_at: ts.into(),
            artist_slug: String::new(),
            song_slug: String::new(),
            song_name: None,
        }
    }

    #[test]
    fn test_merge_orders_across_shards_and_truncates() {
        let merged = merge_candidates(
            vec![
                record("letter_b", "2024-01-01", "b/1"),
                record("letter_a", "2024-01-02", "a/1"),
                record("letter_a", "2024-01-01", "a/2"),
            ],
            2,
        );
        let keys: Vec<_> = merged.iter().map(|r| r.natural_key.as_str()).collect();
        assert_eq!(keys, vec!["a/2", "b/1"]);
    }

    #[test]
    fn test_advance_never_moves_backwards() {
        let mut cursors = WatermarkCursorSet::default();
        cursors.advance(&record("letter_a", "2024-01-02", "a/2"));
        cursors.advance(&record("letter_a", "2024-01-01", "a/9"));
        let mark = cursors.get("letter_a");
        assert_eq!(mark.ts, "2024-01-02");
        assert_eq!(mark.key, "a/2");

        cursors.advance(&record("letter_a", "2024-01-02", "a/3"));
        assert_eq!(cursors.get("letter_a").key, "a/3");
        assert_eq!(cursors.get("letter_z"), Watermark::default());
    }

    #[tokio::test]
    async fn test_select_batch_resumes_after_advance() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("letter_a.sqlite3");
        let b = tmp.path().join("letter_b.sqlite3");
        create_shard(
            &a,
            &[
                ("a/1", "2024-01-01T00:00:00Z", "done"),
                ("a/2", "2024-01-03T00:00:00Z", "done"),
            ],
        )
        .await;
        create_shard(&b, &[("b/1", "2024-01-02T00:00:00Z", "done")]).await;
        let shards = shards::discover_shards(tmp.path(), "letter_*.sqlite3").unwrap();

        let mut cursors = WatermarkCursorSet::default();
        let first = cursors.select_batch(&shards, 2).await.unwrap();
        let keys: Vec<_> = first.iter().map(|r| r.natural_key.as_str()).collect();
        assert_eq!(keys, vec!["a/1", "b/1"]);
        for r in &first {
            cursors.advance(r);
        }

        let second = cursors.select_batch(&shards, 2).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].natural_key, "a/2");
        for r in &second {
            cursors.advance(r);
        }
        assert!(cursors.select_batch(&shards, 2).await.unwrap().is_empty());
    }
}
