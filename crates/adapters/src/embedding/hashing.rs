//! Offline feature-hashing embedder
//!
//! Maps word unigrams and bigrams into a fixed number of signed buckets and
//! L2-normalizes the result. No model, no network; identical text always
//! yields the identical vector.

use async_trait::async_trait;
use post_classifier_domain::{Embedder, EncodingError};
use sha2::{Digest, Sha256};

pub const DEFAULT_DIMENSIONS: usize = 256;

/// Deterministic bag-of-words embedder
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Result<Self, EncodingError> {
        if dimensions == 0 {
            return Err(EncodingError::Unavailable(
                "hashing embedder needs at least one dimension".to_string(),
            ));
        }
        Ok(Self { dimensions })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|token| !token.is_empty())
            .collect();

        let mut vector = vec![0.0_f32; self.dimensions];
        for token in &tokens {
            self.add_feature(&mut vector, token.as_bytes());
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.add_feature(&mut vector, bigram.as_bytes());
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in vector.iter_mut() {
                *value /= norm;
            }
        }
        vector
    }

    fn add_feature(&self, vector: &mut [f32], feature: &[u8]) {
        let digest = Sha256::digest(feature);
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let hash = u64::from_le_bytes(bytes);

        let bucket = (hash % self.dimensions as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_DIMENSIONS,
        }
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EncodingError> {
        Ok(self.vectorize(text))
    }

    fn provider(&self) -> &'static str {
        "hashing"
    }
}
