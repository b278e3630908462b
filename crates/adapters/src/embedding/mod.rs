//! Embedding provider adapters

pub mod hashing;
pub mod ollama;
pub mod openai;
pub mod stub;

pub use hashing::HashingEmbedder;
pub use ollama::OllamaEmbedder;
pub use openai::OpenAiEmbedder;
pub use stub::StubEmbedder;

use post_classifier_domain::EncodingError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Common embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingProviderConfig {
    /// Model name/ID
    pub model: String,
    /// Requested vector dimension, where the provider supports one
    pub dimensions: Option<usize>,
    /// HTTP request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for EmbeddingProviderConfig {
    fn default() -> Self {
        Self {
            model: "nomic-embed-text".to_string(),
            dimensions: None,
            timeout_secs: 30,
        }
    }
}

fn http_client(timeout_secs: u64) -> Result<Client, EncodingError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| EncodingError::Unavailable(format!("Failed to build HTTP client: {}", e)))
}

fn request_error(error: reqwest::Error) -> EncodingError {
    if error.is_timeout() {
        EncodingError::Timeout
    } else {
        EncodingError::Api(error.to_string())
    }
}
