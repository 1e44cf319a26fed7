//! Gemini embedding provider (`models/{model}:embedContent`).

use crate::embeddings::provider::{check_dimensions, EmbeddingProvider};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use threadwise_core::{AppError, AppResult};
use threadwise_llm::providers::gemini::DEFAULT_GEMINI_BASE_URL;
use threadwise_llm::providers::status_error;
use tracing::{debug, instrument};

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: String,
    content: Content<'a>,
    output_dimensionality: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: EmbeddingValues,
}

/// Gemini embedding provider.
#[derive(Debug, Clone)]
pub struct GeminiEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl GeminiEmbedder {
    pub fn new(
        base_url: Option<&str>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let model: String = model.into();
        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or(DEFAULT_GEMINI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.into(),
            model: model.strip_prefix("models/").unwrap_or(&model).to_string(),
            dimensions,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:embedContent", self.base_url, self.model)
    }

    fn request<'a>(&self, text: &'a str) -> EmbedContentRequest<'a> {
        EmbedContentRequest {
            model: format!("models/{}", self.model),
            content: Content {
                parts: vec![Part { text }],
            },
            output_dimensionality: self.dimensions,
        }
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for GeminiEmbedder {
    fn provider_name(&self) -> &str {
        "gemini"
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

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request(text))
            .send()
            .await
            .map_err(|e| AppError::FatalService(format!("Failed to reach Gemini: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(status_error("Gemini", status, &error_text));
        }

        let body: EmbedContentResponse = response.json().await.map_err(|e| {
            AppError::FatalService(format!("Failed to parse Gemini response: {}", e))
        })?;

        check_dimensions(self, &body.embedding.values)?;
        debug!("Generated {} dimensional embedding", body.embedding.values.len());

        Ok(body.embedding.values)
    }
}
