//! OpenAI embeddings API adapter

use async_trait::async_trait;
use post_classifier_domain::{Embedder, EncodingError};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{EmbeddingProviderConfig, http_client, request_error};

/// Embedder using the OpenAI `/embeddings` endpoint. Batches are sent as a
/// single request.
pub struct OpenAiEmbedder {
    client: Client,
    api_key: SecretString,
    base_url: String,
    config: EmbeddingProviderConfig,
}

impl OpenAiEmbedder {
    pub fn new(api_key: SecretString, config: EmbeddingProviderConfig) -> Result<Self, EncodingError> {
        Self::with_base_url(api_key, "https://api.openai.com/v1".to_string(), config)
    }

    pub fn with_base_url(
        api_key: SecretString,
        base_url: String,
        config: EmbeddingProviderConfig,
    ) -> Result<Self, EncodingError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            config,
        })
    }

    async fn call_api(&self, input: &[String]) -> Result<Vec<Vec<f32>>, EncodingError> {
        let request = OpenAiRequest {
            model: &self.config.model,
            input,
            dimensions: self.config.dimensions,
        };

        let url = format!("{}/embeddings", self.base_url);

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
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

        let mut api_response: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| EncodingError::InvalidFormat(e.to_string()))?;

        if api_response.data.len() != input.len() {
            return Err(EncodingError::InvalidFormat(format!(
                "expected {} embeddings, got {}",
                input.len(),
                api_response.data.len()
            )));
        }

        // Results may come back out of order
        api_response.data.sort_by_key(|item| item.index);
        Ok(api_response
            .data
            .into_iter()
            .map(|item| item.embedding)
            .collect())
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EncodingError> {
        self.call_api(&[text.to_string()])
            .await?
            .pop()
            .ok_or(EncodingError::Empty)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EncodingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.call_api(texts).await
    }

    fn provider(&self) -> &'static str {
        "openai"
    }
}
