use crate::error::{Result, VectorStoreError};
use async_trait::async_trait;
use ndarray::Array1;

/// Turns text into fixed-size vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;
}

/// Deterministic feature-hashing embedder.
///
/// Each lowercase alphanumeric token is hashed into a signed bucket and the result is
/// L2-normalized. Same text, same vector; no model files required.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub const MODEL_ID: &'static str = "feature-hash-v1";

    #[must_use]
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = Array1::<f32>::zeros(self.dimension);
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let token = token.to_lowercase();
            let digest = blake3::hash(token.as_bytes());
            let mut head = [0u8; 8];
            head.copy_from_slice(&digest.as_bytes()[..8]);
            let bits = u64::from_le_bytes(head);
            #[allow(clippy::cast_possible_truncation)]
            let bucket = (bits % self.dimension as u64) as usize;
            let sign = if bits >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.dot(&vector).sqrt();
        if norm > 0.0 {
            vector /= norm;
        }
        vector.to_vec()
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        Self::MODEL_ID
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if self.dimension == 0 {
            return Err(VectorStoreError::Embedding(
                "embedding dimension must be > 0".to_string(),
            ));
        }
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn vectors_are_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(64);
        let batch = embedder
            .embed_batch(&["fn main() { println!(\"hi\") }", "fn main() { println!(\"hi\") }"])
            .await
            .unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], batch[1]);
        assert_eq!(batch[0].len(), 64);
        let norm: f32 = batch[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn empty_text_embeds_to_zero_vector() {
        let embedder = HashEmbedder::new(8);
        let batch = embedder.embed_batch(&["  ... "]).await.unwrap();
        assert!(batch[0].iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn zero_dimension_is_rejected() {
        let embedder = HashEmbedder::new(0);
        assert!(matches!(
            embedder.embed_batch(&["text"]).await,
            Err(VectorStoreError::Embedding(_))
        ));
    }
}
