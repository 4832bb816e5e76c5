use crate::error::{IndexerError, Result};
use log::warn;
use ragwatch_chunker::ChunkerConfig;
use ragwatch_vector_store::StoreConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Directory under the workspace root holding service state
pub const STATE_DIR_NAME: &str = ".ragwatch";

const ENV_QUEUE_SOFT_LIMIT: &str = "RAGWATCH_QUEUE_SOFT_LIMIT";
const ENV_SHUTDOWN_POLICY: &str = "RAGWATCH_SHUTDOWN_POLICY";
const ENV_WATCH: &str = "RAGWATCH_WATCH";
const ENV_FORCE_POLLING: &str = "RAGWATCH_FORCE_POLLING";
const ENV_RESCAN_INTERVAL_SECS: &str = "RAGWATCH_RESCAN_INTERVAL_SECS";
const ENV_MAX_FILE_SIZE_BYTES: &str = "RAGWATCH_MAX_FILE_SIZE_BYTES";
const ENV_STORE_PATH: &str = "RAGWATCH_STORE_PATH";
const ENV_COLLECTION: &str = "RAGWATCH_COLLECTION";

/// What happens to queued entries when the service stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    DrainRemaining,
    #[default]
    AbandonRemaining,
}

impl FromStr for ShutdownPolicy {
    type Err = IndexerError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "drain_remaining" | "drain" => Ok(Self::DrainRemaining),
            "abandon_remaining" | "abandon" => Ok(Self::AbandonRemaining),
            other => Err(IndexerError::Config(format!(
                "unknown shutdown policy '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// New paths block at this many pending entries; coalescing never blocks
    pub queue_soft_limit: usize,
    pub shutdown_policy: ShutdownPolicy,
    pub watch: bool,
    /// Use the polling backend instead of native notifications (network or container mounts)
    pub force_polling: bool,
    pub notify_poll_interval_ms: u64,
    /// Periodic rescan after a watcher failure; `0` disables
    pub rescan_interval_secs: Option<u64>,
    pub max_file_size_bytes: u64,
    pub max_file_retries: u32,
    pub exclude_globs: Vec<String>,
    pub allow_outside_workspace: bool,
    pub chunker: ChunkerConfig,
    pub store: StoreConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            queue_soft_limit: 1024,
            shutdown_policy: ShutdownPolicy::default(),
            watch: true,
            force_polling: false,
            notify_poll_interval_ms: 2000,
            rescan_interval_secs: Some(300),
            max_file_size_bytes: 1024 * 1024,
            max_file_retries: 0,
            exclude_globs: Vec::new(),
            allow_outside_workspace: false,
            chunker: ChunkerConfig::for_embeddings(),
            store: StoreConfig::default(),
        }
    }
}

impl IndexerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            IndexerError::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply `RAGWATCH_*` overrides read through `lookup`. Unparseable values are ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(limit) = parse_override::<usize>(&lookup, ENV_QUEUE_SOFT_LIMIT) {
            self.queue_soft_limit = limit;
        }
        if let Some(policy) = parse_override::<ShutdownPolicy>(&lookup, ENV_SHUTDOWN_POLICY) {
            self.shutdown_policy = policy;
        }
        if let Some(raw) = lookup(ENV_WATCH) {
            match parse_bool(&raw) {
                Some(watch) => self.watch = watch,
                None => warn!("Ignoring {ENV_WATCH}={raw}: expected a boolean"),
            }
        }
        if let Some(raw) = lookup(ENV_FORCE_POLLING) {
            match parse_bool(&raw) {
                Some(force) => self.force_polling = force,
                None => warn!("Ignoring {ENV_FORCE_POLLING}={raw}: expected a boolean"),
            }
        }
        if let Some(secs) = parse_override::<u64>(&lookup, ENV_RESCAN_INTERVAL_SECS) {
            self.rescan_interval_secs = Some(secs);
        }
        if let Some(bytes) = parse_override::<u64>(&lookup, ENV_MAX_FILE_SIZE_BYTES) {
            self.max_file_size_bytes = bytes;
        }
        if let Some(path) = lookup(ENV_STORE_PATH).filter(|p| !p.trim().is_empty()) {
            self.store.path = Some(PathBuf::from(path));
        }
        if let Some(name) = lookup(ENV_COLLECTION).filter(|n| !n.trim().is_empty()) {
            self.store.collection_name = name;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_soft_limit == 0 {
            return Err(IndexerError::Config(
                "queue_soft_limit must be > 0".to_string(),
            ));
        }
        if self.store.dimension == 0 {
            return Err(IndexerError::Config(
                "store.dimension must be > 0".to_string(),
            ));
        }
        if self.store.collection_name.trim().is_empty() {
            return Err(IndexerError::Config(
                "store.collection_name must not be empty".to_string(),
            ));
        }
        self.chunker
            .validate()
            .map_err(|e| IndexerError::Config(e.to_string()))
    }

    #[must_use]
    pub fn rescan_interval(&self) -> Option<Duration> {
        self.rescan_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    #[must_use]
    pub const fn notify_poll_interval(&self) -> Duration {
        Duration::from_millis(self.notify_poll_interval_ms)
    }

    /// Configured store path, or `<root>/.ragwatch/index.json`
    #[must_use]
    pub fn store_path(&self, root: &Path) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| default_store_path(root))
    }
}

#[must_use]
pub fn default_store_path(root: &Path) -> PathBuf {
    root.join(STATE_DIR_NAME).join("index.json")
}

fn parse_override<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {key}={raw}: invalid value");
            None
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
