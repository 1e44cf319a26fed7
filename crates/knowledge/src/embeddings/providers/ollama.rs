//! Ollama embedding provider.
//!
//! Calls `/api/embeddings` on a local Ollama runtime, one text per request.

use crate::embeddings::provider::{check_dimensions, EmbeddingProvider};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use threadwise_core::{AppError, AppResult};
use threadwise_llm::providers::status_error;
use tracing::{debug, instrument};

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const EMBEDDING_ENDPOINT: &str = "/api/embeddings";
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Ollama embedding provider.
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: Client,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl OllamaEmbedder {
    /// Create a provider. `base_url` defaults to `OLLAMA_URL` or the local
    /// runtime.
    pub fn new(
        base_url: Option<&str>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = base_url
            .map(str::to_string)
            .or_else(|| std::env::var("OLLAMA_URL").ok())
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            dimensions,
        })
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[instrument(skip(self, text), fields(text_len = text.len(), model = %self.model))]
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(AppError::Validation("Cannot embed empty text".to_string()));
        }

        let url = format!("{}{}", self.base_url, EMBEDDING_ENDPOINT);
        let request = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::FatalService(format!("Failed to reach Ollama: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(status_error("Ollama", status, &error_text));
        }

        let body: EmbeddingResponse = response.json().await.map_err(|e| {
            AppError::FatalService(format!("Failed to parse Ollama response: {}", e))
        })?;

        check_dimensions(self, &body.embedding)?;
        debug!("Generated {} dimensional embedding", body.embedding.len());

        Ok(body.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_base_url_wins() {
        let provider =
            OllamaEmbedder::new(Some("http://gpu-box:11434/"), "nomic-embed-text", 768).unwrap();
        assert_eq!(provider.base_url, "http://gpu-box:11434");
        assert_eq!(provider.provider_name(), "ollama");
        assert_eq!(provider.model_name(), "nomic-embed-text");
        assert_eq!(provider.dimensions(), 768);
    }

    #[test]
    fn test_request_shape() {
        let value = serde_json::to_value(EmbeddingRequest {
            model: "nomic-embed-text",
            prompt: "hello",
        })
        .unwrap();
        assert_eq!(value, serde_json::json!({"model": "nomic-embed-text", "prompt": "hello"}));
    }

    #[tokio::test]
    async fn test_empty_text_rejected_without_request() {
        // Unroutable address; the request must never be sent
        let provider = OllamaEmbedder::new(Some("http://127.0.0.1:9"), "m", 4).unwrap();
        assert!(matches!(
            provider.embed("   ").await,
            Err(AppError::Validation(_))
        ));
    }
}
