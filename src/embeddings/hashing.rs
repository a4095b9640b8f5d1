//! Feature-hashing embedding provider.
//!
//! Maps each token (and each character trigram of each token) to a signed
//! bucket of a fixed-length vector, then L2-normalizes. No model download and
//! no network, so it works offline and gives deterministic vectors in tests.
//! Quality is lexical only; use Ollama or Model2Vec for real semantics.

use sha2::{Digest, Sha256};

use crate::error::Result;

use super::provider::EmbeddingProvider;
use super::text::tokenize;
use super::types::ProviderInfo;

/// Default output length.
pub const DEFAULT_DIMENSIONS: usize = 256;

/// Deterministic local embedding provider.
#[derive(Debug, Clone)]
pub struct HashingProvider {
    dimensions: usize,
}

impl HashingProvider {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(8),
        }
    }

    /// Embed synchronously; the async trait methods delegate here.
    #[must_use]
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimensions];

        for token in tokenize(text) {
            self.accumulate(&mut vector, token.as_bytes(), 1.0);

            let chars: Vec<char> = token.chars().collect();
            if chars.len() > 3 {
                for window in chars.windows(3) {
                    let gram: String = window.iter().collect();
                    self.accumulate(&mut vector, gram.as_bytes(), 0.5);
                }
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn accumulate(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let digest = Sha256::digest(feature);
        let mut bucket_bytes = [0u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = u64::from_le_bytes(bucket_bytes);

        #[allow(clippy::cast_possible_truncation)]
        let index = (bucket % self.dimensions as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign * weight;
    }
}

impl Default for HashingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

impl EmbeddingProvider for HashingProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "hashing".to_string(),
            model: format!("feature-hash-{}", self.dimensions),
            dimensions: self.dimensions,
            max_chars: 8192,
        }
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed(text))
    }

    async fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }
}
