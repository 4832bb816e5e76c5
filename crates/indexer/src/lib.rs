//! # ragwatch indexer
//!
//! Keeps a vector index in step with a workspace directory.
//!
//! ## Pipeline
//!
//! ```text
//! Workspace
//!     │
//!     ├──> File Scanner (.gitignore aware, initial scan + rescans)
//!     │      └─> Processing Queue (dedup, coalescing, backpressure)
//!     │
//!     ├──> File Watcher (notify)
//!     │      └─> Processing Queue
//!     │
//!     └──> Orchestrator (single writer)
//!            ├─> Content Processor (chunk + embed)
//!            ├─> Index Store (upsert / delete)
//!            └─> Progress snapshot ──> Status Reporter ──> get-index-status
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use ragwatch_chunker::Chunker;
//! use ragwatch_indexer::{ChunkEmbedPipeline, IndexerConfig, IndexingService, WorkspaceRoot};
//! use ragwatch_vector_store::{HashEmbedder, JsonVectorIndex};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let root = WorkspaceRoot::new("/path/to/workspace")?;
//!     let config = IndexerConfig::default();
//!     let store = Arc::new(JsonVectorIndex::from_config(
//!         &config.store,
//!         &config.store_path(root.path()),
//!     ));
//!     let processor = Arc::new(ChunkEmbedPipeline::new(
//!         Chunker::new(config.chunker.clone()),
//!         Arc::new(HashEmbedder::new(config.store.dimension)),
//!     ));
//!
//!     let service = IndexingService::start(root, config, store, processor)?;
//!     let snapshot = service
//!         .status_reporter()
//!         .wait_until(|s| s.initial_scan_complete)
//!         .await;
//!     println!("Indexed {} files", snapshot.processed_files_count);
//!     service.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod processor;
mod queue;
mod scanner;
mod service;
mod state;
mod status;
mod watcher;
mod workspace;

pub use config::{default_store_path, IndexerConfig, ShutdownPolicy, STATE_DIR_NAME};
pub use error::{IndexerError, Result};
pub use processor::{chunk_id, ChunkEmbedPipeline, ContentProcessor};
pub use queue::{ChangeReason, EnqueueOutcome, ProcessingQueue, QueueEntry};
pub use scanner::{FileScanner, PathFilter};
pub use service::{IndexingService, ServiceExit};
pub use state::{ProgressHandle, ProgressSnapshot, ServiceState};
pub use status::{
    IndexStatusTool, StatusReporter, STORE_MISSING_SUGGESTION, STORE_READ_SUGGESTION,
};
pub use watcher::FileWatcher;
pub use workspace::{WorkspacePath, WorkspaceRoot};
