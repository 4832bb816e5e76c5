use crate::error::{IndexerError, Result};
use crate::workspace::WorkspacePath;
use async_trait::async_trait;
use ragwatch_chunker::{Chunker, TextChunk};
use ragwatch_vector_store::{Embedder, IndexedChunk, IndexedChunkMetadata, VectorStoreError};
use std::sync::Arc;

const DEFAULT_EMBED_BATCH: usize = 32;

/// Turns one file's bytes into the complete chunk set for that file.
#[async_trait]
pub trait ContentProcessor: Send + Sync {
    async fn process(&self, path: &WorkspacePath, content: &[u8]) -> Result<Vec<IndexedChunk>>;
}

/// Default processor: line-window chunking followed by batched embedding.
pub struct ChunkEmbedPipeline {
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
}

impl ChunkEmbedPipeline {
    #[must_use]
    pub fn new(chunker: Chunker, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            chunker,
            embedder,
            batch_size: DEFAULT_EMBED_BATCH,
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    async fn embed_all(&self, chunks: &[TextChunk]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<&str> = batch.iter().map(|c| c.content.as_str()).collect();
            let embedded = self.embedder.embed_batch(&texts).await?;
            if embedded.len() != texts.len() {
                return Err(IndexerError::from(VectorStoreError::Embedding(format!(
                    "embedder '{}' returned {} vectors for {} texts",
                    self.embedder.model_id(),
                    embedded.len(),
                    texts.len()
                ))));
            }
            let expected = self.embedder.dimension();
            if let Some(bad) = embedded.iter().find(|v| v.len() != expected) {
                return Err(IndexerError::from(VectorStoreError::Embedding(format!(
                    "embedder '{}' returned a {}-dimensional vector, expected {expected}",
                    self.embedder.model_id(),
                    bad.len()
                ))));
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl ContentProcessor for ChunkEmbedPipeline {
    async fn process(&self, path: &WorkspacePath, content: &[u8]) -> Result<Vec<IndexedChunk>> {
        let chunks = self.chunker.chunk_bytes(content, Some(path.as_str()))?;
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = self.embed_all(&chunks).await?;
        let indexed = chunks
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(ordinal, (chunk, vector))| to_indexed(path, ordinal, chunk, vector))
            .collect();
        Ok(indexed)
    }
}

/// Stable id: same path, position and content give the same id across runs.
#[must_use]
pub fn chunk_id(path: &WorkspacePath, ordinal: usize, content_hash: &str) -> String {
    let short = content_hash.get(..16).unwrap_or(content_hash);
    format!("{}#{ordinal}:{short}", path.as_str())
}

fn to_indexed(path: &WorkspacePath, ordinal: usize, chunk: TextChunk, vector: Vec<f32>) -> IndexedChunk {
    let content_hash = blake3::hash(chunk.content.as_bytes()).to_hex().to_string();
    IndexedChunk {
        source_path: path.as_str().to_string(),
        chunk_id: chunk_id(path, ordinal, &content_hash),
        vector,
        metadata: IndexedChunkMetadata {
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            language: chunk.metadata.language,
            content: chunk.content,
            content_hash,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use ragwatch_chunker::ChunkerConfig;
    use ragwatch_vector_store::HashEmbedder;

    fn pipeline() -> ChunkEmbedPipeline {
        let chunker = Chunker::new(ChunkerConfig {
            max_lines: 3,
            overlap_lines: 1,
            max_chars: 200,
        });
        ChunkEmbedPipeline::new(chunker, Arc::new(HashEmbedder::new(16))).with_batch_size(2)
    }

    #[tokio::test]
    async fn produces_chunks_owned_by_the_path() {
        let path = WorkspacePath::parse("src/lib.rs").unwrap();
        let body = "fn a() {}\nfn b() {}\nfn c() {}\nfn d() {}\nfn e() {}\n";
        let chunks = pipeline().process(&path, body.as_bytes()).await.unwrap();

        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.source_path == "src/lib.rs"));
        assert!(chunks.iter().all(|c| c.vector.len() == 16));
        assert_eq!(chunks[0].metadata.language.as_deref(), Some("rust"));
        assert_eq!((chunks[1].metadata.start_line, chunks[1].metadata.end_line), (3, 5));
    }

    #[tokio::test]
    async fn reprocessing_is_deterministic() {
        let path = WorkspacePath::parse("notes.md").unwrap();
        let body = b"# title\n\nsome words\nmore words\n";
        let first = pipeline().process(&path, body).await.unwrap();
        let second = pipeline().process(&path, body).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn repeated_content_still_gets_unique_ids() {
        let path = WorkspacePath::parse("dup.txt").unwrap();
        let body = "same\nsame\nsame\nsame\nsame\nsame\nsame\n";
        let chunks = pipeline().process(&path, body.as_bytes()).await.unwrap();
        let mut ids: Vec<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        let total = ids.len();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }

    #[tokio::test]
    async fn binary_content_yields_nothing() {
        let path = WorkspacePath::parse("blob.bin").unwrap();
        let chunks = pipeline().process(&path, &[0, 159, 146, 150]).await.unwrap();
        assert!(chunks.is_empty());
    }

    struct ShortEmbedder;

    #[async_trait]
    impl Embedder for ShortEmbedder {
        fn model_id(&self) -> &str {
            "short"
        }

        fn dimension(&self) -> usize {
            8
        }

        async fn embed_batch(
            &self,
            texts: &[&str],
        ) -> ragwatch_vector_store::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.5; 4]).collect())
        }
    }

    #[tokio::test]
    async fn vectors_of_the_wrong_dimension_are_rejected() {
        let path = WorkspacePath::parse("a.txt").unwrap();
        let pipeline = ChunkEmbedPipeline::new(
            Chunker::new(ChunkerConfig::for_embeddings()),
            Arc::new(ShortEmbedder),
        );
        let err = pipeline.process(&path, b"hello
").await.unwrap_err();
        assert!(err.to_string().contains("4-dimensional vector, expected 8"));
    }

    #[tokio::test]
    async fn invalid_utf8_is_a_per_file_error() {
        let path = WorkspacePath::parse("latin1.txt").unwrap();
        let err = pipeline().process(&path, &[0xe9, 0x74, 0xe9]).await.unwrap_err();
        assert!(matches!(err, IndexerError::ChunkerError(_)));
        assert!(!err.is_fatal());
    }
}
