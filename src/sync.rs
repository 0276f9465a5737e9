//! Cycle orchestrator.
//!
//! One cycle walks these phases in order:
//!
//! ```text
//! ReadCandidates → ResolveRecords → EnsureArtists → UpsertSongs → UpsertSections → Persist
//! ```
//!
//! Row and chunk failures are counted and logged inside the phase that hit
//! them. The remote index is loaded once before the first cycle, and a
//! remote that cannot be reached there stops the run. A failure that
//! aborts a later cycle (shard unreadable, state not writable) is logged by
//! [`Synchronizer::run_until`] and the loop carries on after the poll
//! interval.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::artifact::{write_artifact, SectionArtifact, RESOLVED_VIA_INDEX};
use crate::config::{Config, DatasetConfig};
use crate::cursor::WatermarkCursorSet;
use crate::index::RemoteIndexCache;
use crate::models::{to_patch_payload, CycleSummary, ResolvedSong, SectionRow};
use crate::remote::{RemoteStore, Table};
use crate::resolve::{MissingReason, Resolver};
use crate::shards::discover_shards;
use crate::state::{utc_now, SyncState};
use crate::upsert::{
    build_section_rows, ensure_artists, fingerprint, insert_songs_with_fallback,
    patch_with_fingerprint, upsert_sections_with_fallback, PatchOutcome,
};

/// Phases of one cycle, logged at debug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    ReadCandidates,
    ResolveRecords,
    EnsureArtists,
    UpsertSongs,
    UpsertSections,
    Persist,
}

/// Effective settings after CLI overrides.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub dataset: DatasetConfig,
    pub batch_size: usize,
    pub poll_seconds: u64,
    pub once: bool,
    pub dry_run: bool,
    pub reset_on_first_run: bool,
    pub artist_chunk_size: usize,
    pub song_chunk_size: usize,
    pub section_chunk_size: usize,
}

impl SyncSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dataset: config.dataset.clone(),
            batch_size: config.sync.batch_size,
            poll_seconds: config.sync.poll_seconds,
            once: false,
            dry_run: false,
            reset_on_first_run: config.sync.reset_on_first_run,
            artist_chunk_size: config.remote.artist_chunk_size,
            song_chunk_size: config.remote.song_chunk_size,
            section_chunk_size: config.remote.section_chunk_size,
        }
    }
}

pub struct Synchronizer {
    settings: SyncSettings,
    remote: Arc<dyn RemoteStore>,
    resolver: Resolver,
    state: SyncState,
    cache: Option<RemoteIndexCache>,
}

impl Synchronizer {
    /// Load the checkpoint and prepare the resolver.
    ///
    /// # Errors
    ///
    /// Fails when the dataset root does not exist.
    pub fn new(settings: SyncSettings, remote: Arc<dyn RemoteStore>) -> Result<Self> {
        let root = &settings.dataset.root;
        if !root.is_dir() {
            bail!("Dataset root does not exist: {}", root.display());
        }
        let state = SyncState::load(&settings.dataset.state_path());
        Ok(Self {
            resolver: Resolver::new(root.clone()),
            settings,
            remote,
            state,
            cache: None,
        })
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// One-time initialization of a fresh checkpoint.
    ///
    /// With `reset_on_first_run`, remote songs and artists are wiped first
    /// (not in dry run). The checkpoint is marked initialized either way so
    /// enabling the reset later never wipes a library that is in use.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.state.initialized {
            return Ok(());
        }
        if self.settings.reset_on_first_run {
            if self.settings.dry_run {
                info!("dry run: initial reset skipped");
            } else {
                info!("resetting remote songs and artists (one-time initialization)");
                self.remote.delete_all(Table::Songs).await?;
                self.remote.delete_all(Table::Artists).await?;
                self.cache = None;
                info!("reset complete");
            }
            self.state.natural_key_to_song_id.clear();
        }
        self.state.initialized = true;
        self.state.save(&self.settings.dataset.state_path())
    }

    /// Run cycles until `--once` completes or Ctrl-C arrives.
    pub async fn run(&mut self) -> Result<()> {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(true);
            }
        });
        // Let the listener register before the first cycle starts.
        tokio::task::yield_now().await;
        self.run_until(rx).await
    }

    /// Initialize, load the remote index, then cycle until `--once`
    /// completes or `shutdown` flips to `true`.
    ///
    /// An interrupt seen mid-cycle lets the cycle finish and checkpoint,
    /// then returns without sleeping.
    ///
    /// # Errors
    ///
    /// Fails when the initial reset fails, when the remote index cannot be
    /// loaded at startup, or, with `--once`, when the cycle fails.
    pub async fn run_until(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.initialize().await?;
        if self.cache.is_none() {
            let cache = RemoteIndexCache::rebuild(self.remote.as_ref())
                .await
                .context("Failed to load the remote artist/song index")?;
            self.cache = Some(cache);
        }

        let mut cycle: u64 = 0;
        loop {
            cycle += 1;
            let started = Instant::now();
            match self.run_cycle().await {
                Ok(s) => {
                    let elapsed = started.elapsed().as_secs_f64();
                    info!(
                        cycle,
                        candidates = s.candidates,
                        inserted = s.inserted_songs,
                        skipped_existing = s.skipped_existing,
                        missing = s.missing,
                        skipped_bad = s.skipped_bad,
                        sections = s.sections_upserted,
                        patched = s.metadata_patched,
                        artifacts = s.artifacts_written,
                        elapsed_secs = elapsed,
                        "cycle complete"
                    );
                    println!(
                        "cycle={} candidates={} inserted={} skipped={} missing={} bad_rows={} sections={} patched={} artifacts={} elapsed={:.1}s",
                        cycle,
                        s.candidates,
                        s.inserted_songs,
                        s.skipped_existing,
                        s.missing,
                        s.skipped_bad,
                        s.sections_upserted,
                        s.metadata_patched,
                        s.artifacts_written,
                        elapsed
                    );
                }
                Err(e) if self.settings.once => return Err(e),
                Err(e) => error!(cycle, error = %format!("{:#}", e), "sync cycle failed"),
            }

            if self.settings.once {
                return Ok(());
            }
            if *shutdown.borrow_and_update() {
                info!("interrupted, stopping after cycle {}", cycle);
                return Ok(());
            }

            let pause = Duration::from_secs(self.settings.poll_seconds.max(1));
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                Ok(()) = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("interrupted, stopping after cycle {}", cycle);
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Drive one full cycle and persist the checkpoint.
    pub async fn run_cycle(&mut self) -> Result<CycleSummary> {
        let mut cache = match self.cache.take() {
            Some(cache) => cache,
            None => RemoteIndexCache::rebuild(self.remote.as_ref()).await?,
        };
        let result = self.cycle_with(&mut cache).await;
        self.cache = Some(cache);
        result
    }

    async fn cycle_with(&mut self, cache: &mut RemoteIndexCache) -> Result<CycleSummary> {
        let remote = self.remote.as_ref();
        let dry_run = self.settings.dry_run;
        let sections_dir = self.settings.dataset.sections_path();
        let mut summary = CycleSummary::default();

        debug!(phase = ?CyclePhase::ReadCandidates);
        let shards = discover_shards(
            &self.settings.dataset.shard_dir(),
            &self.settings.dataset.shard_glob,
        )?;
        let mut cursors = WatermarkCursorSet::new(self.state.db_watermarks.clone());
        let selected = cursors.select_batch(&shards, self.settings.batch_size).await?;
        summary.candidates = selected.len() as u64;

        debug!(phase = ?CyclePhase::ResolveRecords, candidates = selected.len());
        let mut resolved: Vec<ResolvedSong> = Vec::new();
        for cand in &selected {
            cursors.advance(cand);
            if self.state.natural_key_to_song_id.contains_key(&cand.natural_key) {
                summary.skipped_existing += 1;
                continue;
            }
            match self.resolver.resolve(cand) {
                Ok(song) => resolved.push(song),
                Err(reason) => {
                    summary.missing += 1;
                    match reason {
                        MissingReason::Document => {
                            debug!(key = %cand.natural_key, doc = %cand.document_ref, "document missing or invalid")
                        }
                        MissingReason::Text => {
                            debug!(key = %cand.natural_key, "document has no usable text")
                        }
                    }
                }
            }
        }

        debug!(phase = ?CyclePhase::EnsureArtists, songs = resolved.len());
        if !resolved.is_empty() && !dry_run {
            let inputs: Vec<_> = resolved.iter().map(|s| s.artist.clone()).collect();
            let artists =
                ensure_artists(remote, cache, &inputs, self.settings.artist_chunk_size).await;
            debug!(
                created = artists.created,
                patched = artists.patched,
                failed = artists.failures.len(),
                "artists ensured"
            );
        }

        debug!(phase = ?CyclePhase::UpsertSongs);
        let mut section_rows: Vec<SectionRow> = Vec::new();
        let mut pending: Vec<ResolvedSong> = Vec::new();
        let mut duplicates: Vec<ResolvedSong> = Vec::new();
        let mut queued = HashSet::new();

        for mut song in resolved {
            let artist_id = match cache.artist_id(&song.artist.search_key) {
                Some(id) => id.to_string(),
                None if dry_run => {
                    summary.inserted_songs += 1;
                    self.emit_artifact(&sections_dir, &song, None, None, &mut summary);
                    continue;
                }
                None => {
                    warn!(key = %song.natural_key, artist = %song.artist.name, "artist unresolved, song not inserted");
                    summary.skipped_bad += 1;
                    self.emit_artifact(&sections_dir, &song, None, None, &mut summary);
                    continue;
                }
            };
            song.payload.artist_id = artist_id.clone();

            if let Some(song_id) = cache
                .song_id(&artist_id, &song.payload.title_search)
                .map(str::to_string)
            {
                self.state
                    .natural_key_to_song_id
                    .insert(song.natural_key.clone(), song_id.clone());
                summary.skipped_existing += 1;
                if !dry_run {
                    let payload = to_patch_payload(&song.payload.metadata);
                    match patch_with_fingerprint(remote, cache, Table::Songs, &song_id, payload)
                        .await
                    {
                        Ok(PatchOutcome::Patched) => summary.metadata_patched += 1,
                        Ok(PatchOutcome::Unchanged) => {}
                        Err(e) => {
                            warn!(song_id = %song_id, error = %e, "failed to patch song metadata")
                        }
                    }
                    section_rows.extend(build_section_rows(&song_id, &song.sources));
                }
                self.emit_artifact(
                    &sections_dir,
                    &song,
                    Some(&song_id),
                    Some(RESOLVED_VIA_INDEX),
                    &mut summary,
                );
                continue;
            }

            let identity = (artist_id, song.payload.title_search.clone());
            if queued.insert(identity) {
                pending.push(song);
            } else {
                duplicates.push(song);
            }
        }

        if dry_run {
            for song in pending.iter().chain(duplicates.iter()) {
                summary.inserted_songs += 1;
                self.emit_artifact(&sections_dir, song, None, None, &mut summary);
            }
        } else if !pending.is_empty() {
            let payloads: Vec<_> = pending.iter().map(|s| s.payload.clone()).collect();
            let (created, failures) =
                insert_songs_with_fallback(remote, &payloads, self.settings.song_chunk_size).await;
            debug!(created = created.len(), failed = failures.len(), "songs inserted");

            for song in &pending {
                let identity = (
                    song.payload.artist_id.clone(),
                    song.payload.title_search.clone(),
                );
                let Some(song_id) = created.get(&identity) else {
                    summary.skipped_bad += 1;
                    self.emit_artifact(&sections_dir, song, None, None, &mut summary);
                    continue;
                };
                self.state
                    .natural_key_to_song_id
                    .insert(song.natural_key.clone(), song_id.clone());
                cache.insert_song(&identity.0, &identity.1, song_id);
                cache.set_fingerprint(
                    Table::Songs,
                    song_id,
                    fingerprint(&to_patch_payload(&song.payload.metadata)),
                );
                summary.inserted_songs += 1;
                section_rows.extend(build_section_rows(song_id, &song.sources));
                self.emit_artifact(&sections_dir, song, Some(song_id), None, &mut summary);
            }

            // Same song twice in one batch: map the later ones to the new row.
            for song in &duplicates {
                let Some(song_id) = cache
                    .song_id(&song.payload.artist_id, &song.payload.title_search)
                    .map(str::to_string)
                else {
                    summary.skipped_bad += 1;
                    self.emit_artifact(&sections_dir, song, None, None, &mut summary);
                    continue;
                };
                self.state
                    .natural_key_to_song_id
                    .insert(song.natural_key.clone(), song_id.clone());
                summary.skipped_existing += 1;
                section_rows.extend(build_section_rows(&song_id, &song.sources));
                self.emit_artifact(
                    &sections_dir,
                    song,
                    Some(&song_id),
                    Some(RESOLVED_VIA_INDEX),
                    &mut summary,
                );
            }
        }

        debug!(phase = ?CyclePhase::UpsertSections, rows = section_rows.len());
        if !dry_run && !section_rows.is_empty() {
            let (written, failures) = upsert_sections_with_fallback(
                remote,
                section_rows,
                self.settings.section_chunk_size,
            )
            .await;
            summary.sections_upserted = written as u64;
            if !failures.is_empty() {
                warn!(failed = failures.len(), "some section rows were skipped");
            }
        }

        debug!(phase = ?CyclePhase::Persist);
        self.state.db_watermarks = cursors.into_marks();
        self.state.record_cycle(&summary, utc_now());
        self.state.save(&self.settings.dataset.state_path())?;
        Ok(summary)
    }

    fn emit_artifact(
        &self,
        sections_dir: &std::path::Path,
        song: &ResolvedSong,
        song_id: Option<&str>,
        resolved_via: Option<&'static str>,
        summary: &mut CycleSummary,
    ) {
        let mut artifact = SectionArtifact::new(song, song_id, utc_now());
        artifact.resolved_via = resolved_via;
        if self.settings.dry_run {
            artifact.dry_run = Some(true);
        }
        match write_artifact(sections_dir, &artifact) {
            Ok(_) => summary.artifacts_written += 1,
            Err(e) => error!(key = %song.natural_key, error = %format!("{:#}", e), "failed to write section artifact"),
        }
    }
}
