//! Stub embedder for offline mode and tests

use async_trait::async_trait;
use post_classifier_domain::{Embedder, EncodingError};

/// Embedder that returns a fixed vector or a fixed error
pub struct StubEmbedder {
    result: Result<Vec<f32>, EncodingError>,
}

impl StubEmbedder {
    /// No embedding capability: every call fails with `Unavailable`
    pub fn unavailable() -> Self {
        Self::with_error(EncodingError::Unavailable(
            "no embedding provider configured".to_string(),
        ))
    }

    /// Every call fails with `error`
    pub fn with_error(error: EncodingError) -> Self {
        Self { result: Err(error) }
    }

    /// Every text embeds to `vector`
    pub fn with_vector(vector: Vec<f32>) -> Self {
        Self { result: Ok(vector) }
    }
}

impl Default for StubEmbedder {
    fn default() -> Self {
        Self::unavailable()
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EncodingError> {
        self.result.clone()
    }

    fn provider(&self) -> &'static str {
        "none"
    }
}
