//! TOML configuration and credential loading.
//!
//! ```toml
//! [dataset]
//! root = "/srv/data/cifraclub"
//!
//! [sync]
//! batch_size = 1000
//! poll_seconds = 60
//!
//! [remote]
//! url_env = "SUPABASE_URL"
//! key_env = "SUPABASE_SERVICE_ROLE_KEY"
//! ```
//!
//! Credentials never live in the file: `[remote]` only names the
//! environment variables that hold them.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    /// Scraper output directory (contains `db/` and the song documents).
    pub root: PathBuf,
    #[serde(default = "default_shard_glob")]
    pub shard_glob: String,
    #[serde(default)]
    pub state_file: Option<PathBuf>,
    #[serde(default)]
    pub sections_dir: Option<PathBuf>,
}

fn default_shard_glob() -> String {
    "letter_*.sqlite3".to_string()
}

impl DatasetConfig {
    /// Directory holding the shard files.
    pub fn shard_dir(&self) -> PathBuf {
        self.root.join("db")
    }

    fn sync_root(&self) -> PathBuf {
        self.root.join("supabase_sync")
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| self.sync_root().join("state.json"))
    }

    pub fn sections_path(&self) -> PathBuf {
        self.sections_dir
            .clone()
            .unwrap_or_else(|| self.sync_root().join("sections"))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_poll_seconds")]
    pub poll_seconds: u64,
    /// Wipe remote songs and artists the first time the state is created.
    #[serde(default)]
    pub reset_on_first_run: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_seconds: default_poll_seconds(),
            reset_on_first_run: false,
        }
    }
}

fn default_batch_size() -> usize {
    1000
}
fn default_poll_seconds() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    #[serde(default = "default_url_env")]
    pub url_env: String,
    #[serde(default = "default_key_env")]
    pub key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_row_chunk")]
    pub artist_chunk_size: usize,
    #[serde(default = "default_row_chunk")]
    pub song_chunk_size: usize,
    #[serde(default = "default_section_chunk")]
    pub section_chunk_size: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url_env: default_url_env(),
            key_env: default_key_env(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            artist_chunk_size: default_row_chunk(),
            song_chunk_size: default_row_chunk(),
            section_chunk_size: default_section_chunk(),
        }
    }
}

fn default_url_env() -> String {
    "SUPABASE_URL".to_string()
}
fn default_key_env() -> String {
    "SUPABASE_SERVICE_ROLE_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    45
}
fn default_max_attempts() -> u32 {
    3
}
fn default_row_chunk() -> usize {
    200
}
fn default_section_chunk() -> usize {
    250
}

/// Base URL and service key for the remote store.
#[derive(Clone)]
pub struct Credentials {
    pub url: String,
    pub service_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("url", &self.url)
            .field("service_key", &"<redacted>")
            .finish()
    }
}

impl RemoteConfig {
    /// Read the credentials from the configured environment variables.
    ///
    /// # Errors
    ///
    /// Fails when either variable is unset or blank. This is fatal for
    /// the sync command.
    pub fn credentials(&self) -> Result<Credentials> {
        Ok(Credentials {
            url: required_env(&self.url_env)?,
            service_key: required_env(&self.key_env)?,
        })
    }
}

fn required_env(name: &str) -> Result<String> {
    let raw = std::env::var(name).unwrap_or_default();
    let value = clean_env_value(&raw);
    if value.is_empty() {
        bail!("Missing required env var: {}", name);
    }
    Ok(value)
}

/// Strip whitespace and one layer of surrounding quotes, as `.env` files
/// often leave them in.
fn clean_env_value(raw: &str) -> String {
    raw.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .trim()
        .to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.sync.batch_size == 0 {
        bail!("sync.batch_size must be >= 1");
    }
    if config.remote.max_attempts == 0 {
        bail!("remote.max_attempts must be >= 1");
    }
    if config.remote.artist_chunk_size == 0
        || config.remote.song_chunk_size == 0
        || config.remote.section_chunk_size == 0
    {
        bail!("remote chunk sizes must be >= 1");
    }
    if config.dataset.shard_glob.trim().is_empty() {
        bail!("dataset.shard_glob must not be empty");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("songbook-sync.toml");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "[dataset]\nroot = \"/data/set\"\n");
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.sync.batch_size, 1000);
        assert_eq!(cfg.sync.poll_seconds, 60);
        assert!(!cfg.sync.reset_on_first_run);
        assert_eq!(cfg.remote.max_attempts, 3);
        assert_eq!(cfg.remote.section_chunk_size, 250);
        assert_eq!(cfg.dataset.shard_glob, "letter_*.sqlite3");
        assert_eq!(
            cfg.dataset.state_path(),
            PathBuf::from("/data/set/supabase_sync/state.json")
        );
        assert_eq!(
            cfg.dataset.sections_path(),
            PathBuf::from("/data/set/supabase_sync/sections")
        );
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            "[dataset]\nroot = \"/d\"\n[sync]\nbatch_size = 0\n",
        );
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_missing_dataset_section_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "[sync]\nbatch_size = 5\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_clean_env_value_strips_quotes() {
        assert_eq!(clean_env_value("  \"https://x.supabase.co\" "), "https://x.supabase.co");
        assert_eq!(clean_env_value("'abc'"), "abc");
        assert_eq!(clean_env_value("   "), "");
    }

    #[test]
    fn test_missing_credentials_are_fatal() {
        let remote = RemoteConfig {
            url_env: "SONGBOOK_SYNC_TEST_UNSET_URL".into(),
            key_env: "SONGBOOK_SYNC_TEST_UNSET_KEY".into(),
            ..Default::default()
        };
        let err = remote.credentials().unwrap_err();
        assert!(err.to_string().contains("SONGBOOK_SYNC_TEST_UNSET_URL"));
    }
}
