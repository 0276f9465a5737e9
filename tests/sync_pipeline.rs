//! End-to-end cycles over real shard files and an in-process remote store.
//!
//! Each test builds a dataset directory with SQLite shards and song
//! documents, then drives [`Synchronizer`] cycles against
//! [`InMemoryRemote`] and checks the remote rows, checkpoint and artifacts.

use serde_json::{json, Value};
use songbook_sync::config::{Config, DatasetConfig, RemoteConfig, SyncConfig};
use songbook_sync::remote::memory::InMemoryRemote;
use songbook_sync::remote::RemoteStore;
use songbook_sync::state::SyncState;
use songbook_sync::sync::{SyncSettings, Synchronizer};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

// ─── Dataset helpers ────────────────────────────────────────────────

async fn add_rows(root: &Path, shard: &str, rows: &[(&str, &str)]) {
    let dir = root.join("db");
    std::fs::create_dir_all(&dir).unwrap();
    let options = SqliteConnectOptions::new()
        .filename(dir.join(shard))
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS songs (
            song_key TEXT PRIMARY KEY,
            artist_slug TEXT,
            song_slug TEXT,
            song_name TEXT,
            song_json_path TEXT,
            processed_at_utc TEXT,
            status TEXT
        )",
    )
    .execute(&pool)
    .await
    .unwrap();
    for (key, processed_at) in rows {
        let (artist, song) = key.split_once('/').unwrap();
        sqlx::query(
            "INSERT OR REPLACE INTO songs VALUES (?, ?, ?, NULL, ?, ?, 'done')",
        )
        .bind(key)
        .bind(artist)
        .bind(song)
        .bind(format!("artists/{}/songs/{}.json", artist, song))
        .bind(processed_at)
        .execute(&pool)
        .await
        .unwrap();
    }
    pool.close().await;
}

fn write_song(root: &Path, key: &str, artist: &str, title: &str, text: &str) {
    let (artist_slug, song_slug) = key.split_once('/').unwrap();
    let path = root.join(format!("artists/{}/songs/{}.json", artist_slug, song_slug));
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let doc = json!({
        "artist": {"name": artist, "slug": artist_slug},
        "song": {"name": title, "slug": song_slug},
        "pages": {"cifra": {"text_clean": text}}
    });
    std::fs::write(path, doc.to_string()).unwrap();
}

fn settings(root: &Path, batch_size: usize) -> SyncSettings {
    let mut settings = SyncSettings::from_config(&Config {
        dataset: DatasetConfig {
            root: root.to_path_buf(),
            shard_glob: "letter_*.sqlite3".into(),
            state_file: None,
            sections_dir: None,
        },
        sync: SyncConfig::default(),
        remote: RemoteConfig::default(),
    });
    settings.batch_size = batch_size;
    settings.once = true;
    settings
}

fn synchronizer(root: &Path, batch_size: usize, remote: &Arc<InMemoryRemote>) -> Synchronizer {
    let remote: Arc<dyn RemoteStore> = remote.clone();
    Synchronizer::new(settings(root, batch_size), remote).unwrap()
}

fn load_state(root: &Path) -> SyncState {
    SyncState::load(&root.join("supabase_sync/state.json"))
}

/// Two shards, four songs, interleaved timestamps.
async fn two_shard_dataset() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    add_rows(
        root,
        "letter_a.sqlite3",
        &[
            ("aline-barros/ressuscita-me", "2024-01-01T00:00:00Z"),
            ("aline-barros/consagracao", "2024-01-03T00:00:00Z"),
        ],
    )
    .await;
    add_rows(
        root,
        "letter_f.sqlite3",
        &[
            ("fernandinho/uma-nova-historia", "2024-01-02T00:00:00Z"),
            ("fernandinho/galileu", "2024-01-04T00:00:00Z"),
        ],
    )
    .await;
    write_song(
        root,
        "aline-barros/ressuscita-me",
        "Aline Barros",
        "Ressuscita-me",
        "[Intro] C G\n\n[Verso]\nMestre eu preciso\n\n[Refrão]\nRessuscita-me",
    );
    write_song(
        root,
        "aline-barros/consagracao",
        "Aline Barros",
        "Consagração",
        "[Verso]\nTeus olhos\n[Refrão]\nConsagro",
    );
    write_song(
        root,
        "fernandinho/uma-nova-historia",
        "Fernandinho",
        "Uma Nova História",
        "Verso 1\nNo Egito\nRefrão: Uma nova história",
    );
    write_song(
        root,
        "fernandinho/galileu",
        "Fernandinho",
        "Galileu",
        "[Refrão]\nGalileu",
    );
    tmp
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_second_cycle_is_a_no_op() {
    let tmp = two_shard_dataset().await;
    let remote = Arc::new(InMemoryRemote::new());

    let mut sync = synchronizer(tmp.path(), 100, &remote);
    let first = sync.run_cycle().await.unwrap();
    assert_eq!(first.candidates, 4);
    assert_eq!(first.inserted_songs, 4);
    assert_eq!(first.artifacts_written, 4);
    assert_eq!(remote.artist_count(), 2);
    assert_eq!(remote.song_count(), 4);
    let marks_after_first = load_state(tmp.path()).db_watermarks;

    let second = sync.run_cycle().await.unwrap();
    assert_eq!(second.candidates, 0);
    assert_eq!(second.inserted_songs, 0);
    assert_eq!(remote.song_count(), 4);
    assert_eq!(load_state(tmp.path()).db_watermarks, marks_after_first);

    // A fresh process resumes from the checkpoint and finds nothing new.
    let mut restarted = synchronizer(tmp.path(), 100, &remote);
    let third = restarted.run_cycle().await.unwrap();
    assert_eq!(third.candidates, 0);
    assert_eq!(remote.song_insert_calls(), 1);
}

#[tokio::test]
async fn test_batch_takes_globally_oldest_across_shards() {
    let tmp = two_shard_dataset().await;
    let remote = Arc::new(InMemoryRemote::new());
    let mut sync = synchronizer(tmp.path(), 2, &remote);

    let first = sync.run_cycle().await.unwrap();
    assert_eq!(first.candidates, 2);
    let state = load_state(tmp.path());
    assert_eq!(
        state.db_watermarks["letter_a.sqlite3"].key,
        "aline-barros/ressuscita-me"
    );
    assert_eq!(
        state.db_watermarks["letter_f.sqlite3"].key,
        "fernandinho/uma-nova-historia"
    );
    assert!(state
        .natural_key_to_song_id
        .contains_key("fernandinho/uma-nova-historia"));
    assert!(!state
        .natural_key_to_song_id
        .contains_key("aline-barros/consagracao"));

    let second = sync.run_cycle().await.unwrap();
    assert_eq!(second.candidates, 2);
    assert_eq!(remote.song_count(), 4);
    let state = load_state(tmp.path());
    assert_eq!(state.db_watermarks["letter_f.sqlite3"].key, "fernandinho/galileu");
    assert_eq!(state.natural_key_to_song_id.len(), 4);
}

#[tokio::test]
async fn test_late_rows_behind_watermark_are_not_revisited() {
    let tmp = two_shard_dataset().await;
    let remote = Arc::new(InMemoryRemote::new());
    let mut sync = synchronizer(tmp.path(), 100, &remote);
    sync.run_cycle().await.unwrap();

    // One row lands behind the watermark, one after it.
    write_song(tmp.path(), "aline-barros/antigo", "Aline Barros", "Antigo", "la");
    write_song(tmp.path(), "aline-barros/novo", "Aline Barros", "Novo", "la");
    add_rows(
        tmp.path(),
        "letter_a.sqlite3",
        &[
            ("aline-barros/antigo", "2023-12-31T00:00:00Z"),
            ("aline-barros/novo", "2024-02-01T00:00:00Z"),
        ],
    )
    .await;

    let summary = sync.run_cycle().await.unwrap();
    assert_eq!(summary.candidates, 1);
    assert_eq!(summary.inserted_songs, 1);
    let state = load_state(tmp.path());
    assert!(state.natural_key_to_song_id.contains_key("aline-barros/novo"));
    assert!(!state.natural_key_to_song_id.contains_key("aline-barros/antigo"));
    assert_eq!(state.db_watermarks["letter_a.sqlite3"].ts, "2024-02-01T00:00:00Z");
}

#[tokio::test]
async fn test_missing_documents_still_advance_watermark() {
    let tmp = TempDir::new().unwrap();
    add_rows(
        tmp.path(),
        "letter_z.sqlite3",
        &[("zeca/sem-arquivo", "2024-05-01T00:00:00Z")],
    )
    .await;
    let remote = Arc::new(InMemoryRemote::new());
    let mut sync = synchronizer(tmp.path(), 100, &remote);

    let summary = sync.run_cycle().await.unwrap();
    assert_eq!(summary.candidates, 1);
    assert_eq!(summary.missing, 1);
    assert_eq!(summary.inserted_songs, 0);
    assert_eq!(remote.song_count(), 0);
    assert_eq!(
        load_state(tmp.path()).db_watermarks["letter_z.sqlite3"].key,
        "zeca/sem-arquivo"
    );
    assert_eq!(sync.run_cycle().await.unwrap().candidates, 0);
}

#[tokio::test]
async fn test_bad_row_does_not_block_the_batch() {
    let tmp = two_shard_dataset().await;
    let remote = Arc::new(InMemoryRemote::new());
    remote.reject_title("Galileu");
    let mut sync = synchronizer(tmp.path(), 100, &remote);

    let summary = sync.run_cycle().await.unwrap();
    assert_eq!(summary.inserted_songs, 3);
    assert_eq!(summary.skipped_bad, 1);
    assert_eq!(remote.song_count(), 3);

    let state = load_state(tmp.path());
    assert!(!state.natural_key_to_song_id.contains_key("fernandinho/galileu"));
    assert_eq!(state.db_watermarks["letter_f.sqlite3"].key, "fernandinho/galileu");
    assert_eq!(state.stats.total_inserted_songs, 3);
}

#[tokio::test]
async fn test_rejected_song_still_gets_an_artifact() {
    let tmp = two_shard_dataset().await;
    let remote = Arc::new(InMemoryRemote::new());
    remote.reject_title("Galileu");
    let mut sync = synchronizer(tmp.path(), 100, &remote);

    let summary = sync.run_cycle().await.unwrap();
    assert_eq!(summary.artifacts_written, 4);

    let path = tmp
        .path()
        .join("supabase_sync/sections/fernandinho/galileu.json");
    let artifact: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert!(artifact["songId"].is_null());
    assert_eq!(artifact["songKey"], "fernandinho/galileu");
    assert_eq!(artifact["sources"][0]["sections"][0]["sectionType"], "chorus");

    // The row is behind the watermark now; the artifact is all that is left of it.
    assert_eq!(sync.run_cycle().await.unwrap().candidates, 0);
    assert!(path.exists());
}

#[tokio::test]
async fn test_sections_and_artifacts_agree() {
    let tmp = two_shard_dataset().await;
    let remote = Arc::new(InMemoryRemote::new());
    let mut sync = synchronizer(tmp.path(), 100, &remote);
    sync.run_cycle().await.unwrap();

    let state = load_state(tmp.path());
    let song_id = &state.natural_key_to_song_id["aline-barros/ressuscita-me"];
    let rows = remote.sections_for(song_id);
    assert_eq!(rows.len(), 3);

    let raw = std::fs::read_to_string(
        tmp.path()
            .join("supabase_sync/sections/aline-barros/ressuscita-me.json"),
    )
    .unwrap();
    let artifact: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(artifact["songId"], Value::String(song_id.clone()));
    assert_eq!(artifact["songJsonRel"], "artists/aline-barros/songs/ressuscita-me.json");
    let sections = artifact["sources"][0]["sections"].as_array().unwrap();
    assert_eq!(sections.len(), rows.len());
    assert_eq!(sections[0]["sectionType"], "intro");
    assert_eq!(sections[2]["sectionType"], "chorus");
}

#[tokio::test]
async fn test_existing_remote_song_is_adopted() {
    let tmp = two_shard_dataset().await;
    let remote = Arc::new(InMemoryRemote::new());
    let artist = remote.seed_artist("Fernandinho", "fernandinho");
    let existing = remote.seed_song(&artist, "Galileu", "galileu");

    let mut sync = synchronizer(tmp.path(), 100, &remote);
    let summary = sync.run_cycle().await.unwrap();
    assert_eq!(summary.inserted_songs, 3);
    assert_eq!(summary.skipped_existing, 1);
    assert_eq!(remote.song_count(), 4);
    assert_eq!(remote.artist_count(), 2);
    assert_eq!(
        load_state(tmp.path()).natural_key_to_song_id["fernandinho/galileu"],
        existing
    );
}
