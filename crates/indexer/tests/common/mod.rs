#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use ragwatch_chunker::{Chunker, ChunkerConfig};
use ragwatch_indexer::{
    ChunkEmbedPipeline, ContentProcessor, IndexerConfig, IndexerError, ProgressSnapshot,
    StatusReporter, WorkspacePath, WorkspaceRoot,
};
use ragwatch_vector_store::{
    HashEmbedder, IndexManager, IndexStatus, IndexedChunk, JsonVectorIndex, VectorStoreError,
};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};

pub const DIM: usize = 16;
pub const TIMEOUT: Duration = Duration::from_secs(20);

pub fn workspace(files: &[(&str, &str)]) -> Result<(TempDir, WorkspaceRoot)> {
    let dir = tempfile::tempdir().context("create temp workspace")?;
    for (name, body) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, body).with_context(|| format!("write {name}"))?;
    }
    let root = WorkspaceRoot::new(dir.path())?;
    Ok((dir, root))
}

/// Watching off, no periodic rescans, small vectors
pub fn test_config() -> IndexerConfig {
    let mut config = IndexerConfig::default();
    config.watch = false;
    config.rescan_interval_secs = None;
    config.notify_poll_interval_ms = 100;
    config.store.dimension = DIM;
    config.chunker = ChunkerConfig {
        max_lines: 8,
        overlap_lines: 2,
        max_chars: 1000,
    };
    config
}

pub fn chunk_embed() -> ChunkEmbedPipeline {
    ChunkEmbedPipeline::new(
        Chunker::new(test_config().chunker),
        Arc::new(HashEmbedder::new(DIM)),
    )
}

pub fn pipeline() -> Arc<ChunkEmbedPipeline> {
    Arc::new(chunk_embed())
}

pub fn memory_store() -> Arc<JsonVectorIndex> {
    Arc::new(JsonVectorIndex::in_memory("test", DIM))
}

pub async fn wait_for(
    reporter: &StatusReporter,
    predicate: impl FnMut(&ProgressSnapshot) -> bool,
) -> Result<ProgressSnapshot> {
    tokio::time::timeout(TIMEOUT, reporter.wait_until(predicate))
        .await
        .with_context(|| {
            format!(
                "timed out waiting for service; last snapshot: {:?}",
                reporter.get_progress_snapshot()
            )
        })
}

/// Poll `check` until it holds or the timeout expires.
pub async fn eventually<F, Fut>(what: &str, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    anyhow::bail!("timed out waiting for {what}")
}

pub async fn indexed_paths(store: &dyn IndexManager) -> Vec<String> {
    store.indexed_paths().await.unwrap_or_default()
}

/// Store double with switchable failures, backed by an in-memory index.
#[derive(Default)]
pub struct StoreFaults {
    pub fail_initialize: bool,
    pub fail_status: bool,
    /// Upserts for paths containing this text fail as if the backend went away
    pub unavailable_on: Option<&'static str>,
}

pub struct ScriptedStore {
    inner: JsonVectorIndex,
    faults: StoreFaults,
}

impl ScriptedStore {
    pub fn new(faults: StoreFaults) -> Arc<Self> {
        Arc::new(Self {
            inner: JsonVectorIndex::in_memory("scripted", DIM),
            faults,
        })
    }
}

#[async_trait]
impl IndexManager for ScriptedStore {
    async fn initialize(&self) -> ragwatch_vector_store::Result<()> {
        if self.faults.fail_initialize {
            return Err(VectorStoreError::Initialization(
                "connection refused".to_string(),
            ));
        }
        self.inner.initialize().await
    }

    fn is_initialized(&self) -> bool {
        self.inner.is_initialized()
    }

    async fn upsert_chunks(
        &self,
        path: &str,
        chunks: Vec<IndexedChunk>,
    ) -> ragwatch_vector_store::Result<usize> {
        if self.faults.unavailable_on.is_some_and(|needle| path.contains(needle)) {
            return Err(VectorStoreError::Unavailable("backend went away".to_string()));
        }
        self.inner.upsert_chunks(path, chunks).await
    }

    async fn delete_chunks(&self, path: &str) -> ragwatch_vector_store::Result<usize> {
        self.inner.delete_chunks(path).await
    }

    async fn get_status(&self) -> ragwatch_vector_store::Result<IndexStatus> {
        if self.faults.fail_status {
            return Err(VectorStoreError::Unavailable("status endpoint down".to_string()));
        }
        self.inner.get_status().await
    }

    async fn indexed_paths(&self) -> ragwatch_vector_store::Result<Vec<String>> {
        self.inner.indexed_paths().await
    }

    async fn close(&self) -> ragwatch_vector_store::Result<()> {
        self.inner.close().await
    }
}

/// Fails for paths containing `needle`, either always or a fixed number of times.
pub struct FailingProcessor {
    inner: ChunkEmbedPipeline,
    needle: &'static str,
    remaining_failures: AtomicUsize,
    pub attempts: AtomicUsize,
}

impl FailingProcessor {
    pub fn always(needle: &'static str) -> Arc<Self> {
        Self::times(needle, usize::MAX)
    }

    pub fn times(needle: &'static str, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: chunk_embed(),
            needle,
            remaining_failures: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ContentProcessor for FailingProcessor {
    async fn process(
        &self,
        path: &WorkspacePath,
        content: &[u8],
    ) -> ragwatch_indexer::Result<Vec<IndexedChunk>> {
        if path.as_str().contains(self.needle) {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.remaining_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                if remaining != usize::MAX {
                    self.remaining_failures.fetch_sub(1, Ordering::SeqCst);
                }
                return Err(IndexerError::Other(format!("cannot embed {path}")));
            }
        }
        self.inner.process(path, content).await
    }
}

/// Blocks every call until the test hands out permits.
pub struct GatedProcessor {
    inner: ChunkEmbedPipeline,
    pub entered: Notify,
    pub gate: Semaphore,
}

impl GatedProcessor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: chunk_embed(),
            entered: Notify::new(),
            gate: Semaphore::new(0),
        })
    }

    pub fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

#[async_trait]
impl ContentProcessor for GatedProcessor {
    async fn process(
        &self,
        path: &WorkspacePath,
        content: &[u8],
    ) -> ragwatch_indexer::Result<Vec<IndexedChunk>> {
        self.entered.notify_one();
        self.gate
            .acquire()
            .await
            .map_err(|e| IndexerError::Other(e.to_string()))?
            .forget();
        self.inner.process(path, content).await
    }
}
