use crate::error::Result;
use crate::types::{IndexStatus, IndexedChunk};
use async_trait::async_trait;

/// Owner of the vector index and the only writer of persisted index state.
#[async_trait]
pub trait IndexManager: Send + Sync {
    /// Open the underlying storage. Fails with [`crate::VectorStoreError::Initialization`] when
    /// the storage is unreachable or its schema does not match.
    async fn initialize(&self) -> Result<()>;

    fn is_initialized(&self) -> bool;

    /// Replace the full chunk set of `path`. Readers see either the old set or the new one.
    /// Returns the number of chunks committed.
    async fn upsert_chunks(&self, path: &str, chunks: Vec<IndexedChunk>) -> Result<usize>;

    /// Remove every chunk of `path`; a no-op when nothing is indexed for it.
    /// Returns the number of chunks removed.
    async fn delete_chunks(&self, path: &str) -> Result<usize>;

    /// Committed chunk count and collection name.
    async fn get_status(&self) -> Result<IndexStatus>;

    /// Paths that currently have committed chunks.
    async fn indexed_paths(&self) -> Result<Vec<String>>;

    /// Flush and release the storage handle. Afterwards the store reports uninitialized.
    async fn close(&self) -> Result<()>;
}
