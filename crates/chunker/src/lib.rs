//! # ragwatch chunker
//!
//! Splits workspace files into overlapping line windows ready for embedding.
//!
//! ```
//! use ragwatch_chunker::{Chunker, ChunkerConfig};
//!
//! let chunker = Chunker::new(ChunkerConfig::for_embeddings());
//! let chunks = chunker.chunk_str("fn main() {}\n", Some("src/main.rs")).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].metadata.language.as_deref(), Some("rust"));
//! ```

mod chunker;
mod config;
mod error;
mod language;

pub use chunker::{looks_binary, ChunkMetadata, Chunker, TextChunk};
pub use config::ChunkerConfig;
pub use error::{ChunkerError, Result};
pub use language::Language;
