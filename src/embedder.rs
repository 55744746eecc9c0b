//! Embedder seam: dense vectors for chunks and queries
//!
//! The embedding model is an external collaborator: anything producing a
//! fixed-dimension dense vector per text. The deterministic
//! [`HashEmbedder`] serves offline use and tests.

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("Query cannot be empty")]
    EmptyQuery,
    #[error("Embedding backend failed: {0}")]
    Backend(String),
}

/// Produces fixed-dimension dense vectors. Implementations that talk to a
/// remote service should batch internally; the indexer batches all chunks
/// of one file into a single call.
pub trait Embedder: Send + Sync {
    /// Dimension of every vector this embedder produces. Must equal the
    /// collection dimension.
    fn dimension(&self) -> usize;

    /// Embed a batch of chunk texts, one vector per input, input order
    /// preserved.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Embed a search query.
    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EmbedError::EmptyQuery);
        }
        let mut vectors = self.embed_batch(&[text])?;
        vectors
            .pop()
            .ok_or_else(|| EmbedError::Backend("empty batch result".into()))
    }
}

/// Deterministic token-hashing embedder.
///
/// Each lowercase alphanumeric token is hashed into a handful of vector
/// slots; the result is L2-normalized, so shared tokens yield high cosine
/// similarity. No model download, no network.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            // Four slots per token, sign taken from the high bit.
            for slot in digest.chunks_exact(8).take(4) {
                let raw = u64::from_le_bytes(slot.try_into().unwrap_or([0; 8]));
                let idx = (raw % self.dimension as u64) as usize;
                let sign = if raw & (1 << 63) == 0 { 1.0 } else { -1.0 };
                v[idx] += sign;
            }
        }
        normalize_l2(v)
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// L2 normalize a vector; the zero vector is returned unchanged.
pub fn normalize_l2(v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        v
    } else {
        v.into_iter().map(|x| x / norm).collect()
    }
}

/// Cosine similarity between two same-length vectors.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}
