//! Ollama local embedding adapter

use async_trait::async_trait;
use post_classifier_domain::{Embedder, EncodingError};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{EmbeddingProviderConfig, http_client, request_error};

/// Embedder backed by a local Ollama server
pub struct OllamaEmbedder {
    client: Client,
    base_url: String,
    config: EmbeddingProviderConfig,
}

impl OllamaEmbedder {
    pub fn new(config: EmbeddingProviderConfig) -> Result<Self, EncodingError> {
        Self::with_base_url("http://localhost:11434".to_string(), config)
    }

    pub fn with_base_url(
        base_url: String,
        config: EmbeddingProviderConfig,
    ) -> Result<Self, EncodingError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            config,
        })
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EncodingError> {
        let request = OllamaRequest {
            model: &self.config.model,
            prompt: text,
        };

        let url = format!("{}/api/embeddings", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(request_error)?;

        if response.status() == 429 {
            return Err(EncodingError::RateLimited);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EncodingError::Api(format!(
                "API returned {}: {}",
                status, body
            )));
        }

        let api_response: OllamaResponse = response
            .json()
            .await
            .map_err(|e| EncodingError::InvalidFormat(e.to_string()))?;

        if api_response.embedding.is_empty() {
            return Err(EncodingError::Empty);
        }

        Ok(api_response.embedding)
    }

    fn provider(&self) -> &'static str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_embed_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .and(body_partial_json(serde_json::json!({
                "model": "nomic-embed-text",
                "prompt": "How to tokenize\n\nbody"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "embedding": [0.5, -0.25, 1.0] })),
            )
            .mount(&mock_server)
            .await;

        let embedder =
            OllamaEmbedder::with_base_url(mock_server.uri(), EmbeddingProviderConfig::default())
                .unwrap();

        let vector = embedder.embed("How to tokenize\n\nbody").await.unwrap();

        assert_eq!(vector, vec![0.5, -0.25, 1.0]);
    }

    #[tokio::test]
    async fn test_embed_api_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
            .mount(&mock_server)
            .await;

        let embedder =
            OllamaEmbedder::with_base_url(mock_server.uri(), EmbeddingProviderConfig::default())
                .unwrap();

        let result = embedder.embed("text").await;

        assert!(matches!(result, Err(EncodingError::Api(message)) if message.contains("model not loaded")));
    }

    #[tokio::test]
    async fn test_empty_embedding() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&mock_server)
            .await;

        let embedder =
            OllamaEmbedder::with_base_url(mock_server.uri(), EmbeddingProviderConfig::default())
                .unwrap();

        assert!(matches!(
            embedder.embed("text").await,
            Err(EncodingError::Empty)
        ));
    }
}
