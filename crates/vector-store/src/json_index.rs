use crate::config::StoreConfig;
use crate::error::{Result, VectorStoreError};
use crate::manager::IndexManager;
use crate::types::{IndexStatus, IndexedChunk};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};

pub const INDEX_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedIndex {
    schema_version: u32,
    collection: String,
    dimension: usize,
    files: BTreeMap<String, Vec<IndexedChunk>>,
}

#[derive(Debug, Default)]
struct IndexData {
    files: BTreeMap<String, Vec<IndexedChunk>>,
    chunk_count: usize,
    unsaved_mutations: usize,
}

/// Vector index kept in memory and optionally mirrored to a JSON document.
///
/// Commits happen under a single write lock, so a reader never observes a half-replaced
/// chunk set. Persistence writes a temp file and renames it over the previous document.
pub struct JsonVectorIndex {
    name: String,
    dimension: usize,
    path: Option<PathBuf>,
    autosave_every: usize,
    initialized: AtomicBool,
    data: RwLock<IndexData>,
    persist_lock: Mutex<()>,
}

impl JsonVectorIndex {
    /// Non-persistent index, mostly for tests and dry runs
    #[must_use]
    pub fn in_memory(name: impl Into<String>, dimension: usize) -> Self {
        Self::build(name.into(), dimension, None, 1)
    }

    /// Index persisted at `path`
    #[must_use]
    pub fn open(path: impl AsRef<Path>, name: impl Into<String>, dimension: usize) -> Self {
        Self::build(
            name.into(),
            dimension,
            Some(path.as_ref().to_path_buf()),
            StoreConfig::default().autosave_every,
        )
    }

    /// Build from config; `default_path` is used when the config leaves the path unset.
    #[must_use]
    pub fn from_config(config: &StoreConfig, default_path: &Path) -> Self {
        let path = config
            .path
            .clone()
            .unwrap_or_else(|| default_path.to_path_buf());
        Self::build(
            config.collection_name.clone(),
            config.dimension,
            Some(path),
            config.autosave_every,
        )
    }

    fn build(name: String, dimension: usize, path: Option<PathBuf>, autosave_every: usize) -> Self {
        Self {
            name,
            dimension,
            path,
            autosave_every: autosave_every.max(1),
            initialized: AtomicBool::new(false),
            data: RwLock::new(IndexData::default()),
            persist_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_autosave_every(mut self, mutations: usize) -> Self {
        self.autosave_every = mutations.max(1);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Committed chunks of one file, in commit order
    pub async fn chunks_for(&self, path: &str) -> Vec<IndexedChunk> {
        self.data
            .read()
            .await
            .files
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(VectorStoreError::NotInitialized)
        }
    }

    fn validate_chunks(&self, path: &str, chunks: &[IndexedChunk]) -> Result<()> {
        let mut seen = HashSet::with_capacity(chunks.len());
        for chunk in chunks {
            if chunk.source_path != path {
                return Err(VectorStoreError::InvalidChunk(format!(
                    "chunk {} belongs to {}, not {path}",
                    chunk.chunk_id, chunk.source_path
                )));
            }
            if chunk.vector.len() != self.dimension {
                return Err(VectorStoreError::InvalidChunk(format!(
                    "chunk {} has dimension {}, index expects {}",
                    chunk.chunk_id,
                    chunk.vector.len(),
                    self.dimension
                )));
            }
            if !seen.insert(chunk.chunk_id.as_str()) {
                return Err(VectorStoreError::InvalidChunk(format!(
                    "duplicate chunk id {} for {path}",
                    chunk.chunk_id
                )));
            }
        }
        Ok(())
    }

    async fn load_from_disk(&self, path: &Path) -> Result<IndexData> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                VectorStoreError::Initialization(format!(
                    "cannot create index directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::info!("Creating new index collection '{}' at {}", self.name, path.display());
                return Ok(IndexData::default());
            }
            Err(err) => {
                return Err(VectorStoreError::Initialization(format!(
                    "cannot read {}: {err}",
                    path.display()
                )))
            }
        };

        let persisted: PersistedIndex = serde_json::from_slice(&bytes).map_err(|e| {
            VectorStoreError::Initialization(format!("corrupt index {}: {e}", path.display()))
        })?;

        if persisted.schema_version != INDEX_SCHEMA_VERSION {
            return Err(VectorStoreError::Initialization(format!(
                "schema mismatch: index has version {}, expected {INDEX_SCHEMA_VERSION}",
                persisted.schema_version
            )));
        }
        if persisted.dimension != self.dimension {
            return Err(VectorStoreError::Initialization(format!(
                "schema mismatch: index has dimension {}, expected {}",
                persisted.dimension, self.dimension
            )));
        }
        if persisted.collection != self.name {
            return Err(VectorStoreError::Initialization(format!(
                "schema mismatch: index holds collection '{}', expected '{}'",
                persisted.collection, self.name
            )));
        }

        let chunk_count = persisted.files.values().map(Vec::len).sum();
        log::info!(
            "Loaded index collection '{}' ({} files, {chunk_count} chunks)",
            self.name,
            persisted.files.len()
        );
        Ok(IndexData {
            files: persisted.files,
            chunk_count,
            unsaved_mutations: 0,
        })
    }

    async fn persist(&self) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        let _guard = self.persist_lock.lock().await;
        let (bytes, captured) = {
            let data = self.data.read().await;
            if data.unsaved_mutations == 0 && path.exists() {
                return Ok(());
            }
            let persisted = PersistedIndex {
                schema_version: INDEX_SCHEMA_VERSION,
                collection: self.name.clone(),
                dimension: self.dimension,
                files: data.files.clone(),
            };
            (serde_json::to_vec(&persisted)?, data.unsaved_mutations)
        };

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;

        // mutations committed while writing stay dirty
        let mut data = self.data.write().await;
        data.unsaved_mutations = data.unsaved_mutations.saturating_sub(captured);
        log::debug!("Persisted index collection '{}' to {}", self.name, path.display());
        Ok(())
    }

    async fn after_mutation(&self) -> Result<()> {
        let due = {
            let mut data = self.data.write().await;
            data.unsaved_mutations += 1;
            data.unsaved_mutations >= self.autosave_every
        };
        if due {
            self.persist().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl IndexManager for JsonVectorIndex {
    async fn initialize(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        if self.dimension == 0 {
            return Err(VectorStoreError::Initialization(
                "index dimension must be > 0".to_string(),
            ));
        }

        let loaded = match self.path.as_deref() {
            Some(path) => self.load_from_disk(path).await?,
            None => IndexData::default(),
        };
        *self.data.write().await = loaded;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    async fn upsert_chunks(&self, path: &str, chunks: Vec<IndexedChunk>) -> Result<usize> {
        self.ensure_initialized()?;
        self.validate_chunks(path, &chunks)?;

        let committed = chunks.len();
        {
            let mut data = self.data.write().await;
            let previous = if chunks.is_empty() {
                data.files.remove(path)
            } else {
                data.files.insert(path.to_string(), chunks)
            };
            let previous = previous.map_or(0, |old| old.len());
            data.chunk_count = data.chunk_count + committed - previous;
        }
        self.after_mutation().await?;
        Ok(committed)
    }

    async fn delete_chunks(&self, path: &str) -> Result<usize> {
        self.ensure_initialized()?;

        let removed = {
            let mut data = self.data.write().await;
            let removed = data.files.remove(path).map_or(0, |old| old.len());
            data.chunk_count -= removed;
            removed
        };
        if removed > 0 {
            self.after_mutation().await?;
        }
        Ok(removed)
    }

    async fn get_status(&self) -> Result<IndexStatus> {
        self.ensure_initialized()?;
        let data = self.data.read().await;
        Ok(IndexStatus {
            count: data.chunk_count,
            name: self.name.clone(),
        })
    }

    async fn indexed_paths(&self) -> Result<Vec<String>> {
        self.ensure_initialized()?;
        Ok(self.data.read().await.files.keys().cloned().collect())
    }

    async fn close(&self) -> Result<()> {
        if !self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let flushed = self.persist().await;
        self.initialized.store(false, Ordering::Release);
        log::info!("Closed index collection '{}'", self.name);
        flushed
    }
}
