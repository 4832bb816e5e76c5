//! # ragwatch vector store
//!
//! The index store seam ([`IndexManager`]) and its default JSON-backed implementation, plus the
//! embedder seam used to turn chunk text into vectors.

mod config;
mod embedder;
mod error;
mod json_index;
mod manager;
mod types;

pub use config::StoreConfig;
pub use embedder::{Embedder, HashEmbedder};
pub use error::{Result, VectorStoreError};
pub use json_index::{JsonVectorIndex, INDEX_SCHEMA_VERSION};
pub use manager::IndexManager;
pub use types::{IndexStatus, IndexedChunk, IndexedChunkMetadata};
