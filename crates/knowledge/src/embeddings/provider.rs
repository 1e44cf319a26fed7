//! Embedding provider trait and factory.

use crate::embeddings::providers::{GeminiEmbedder, MockProvider, OllamaEmbedder};
use crate::embeddings::retry::{RetryPolicy, RetryingEmbedder};
use std::sync::Arc;
use threadwise_core::{AppConfig, AppError, AppResult};

/// Trait for embedding providers.
///
/// Implementations classify their failures: rate limiting and overload are
/// [`AppError::TransientService`], a vector of the wrong length is
/// [`AppError::Config`], anything else is [`AppError::FatalService`].
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    /// Get provider name (e.g., "mock", "ollama", "gemini")
    fn provider_name(&self) -> &str;

    /// Get model identifier
    fn model_name(&self) -> &str;

    /// Get embedding dimensions
    fn dimensions(&self) -> usize;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>>;
}

/// Reject a vector whose length differs from the configured dimensionality.
pub fn check_dimensions(provider: &dyn EmbeddingProvider, embedding: &[f32]) -> AppResult<()> {
    if embedding.len() != provider.dimensions() {
        return Err(AppError::Config(format!(
            "{} model '{}' returned {} dimensions, expected {}",
            provider.provider_name(),
            provider.model_name(),
            embedding.len(),
            provider.dimensions()
        )));
    }
    Ok(())
}

/// Create the configured embedding provider wrapped in the retry policy.
pub fn create_provider(config: &AppConfig) -> AppResult<Arc<dyn EmbeddingProvider>> {
    let dimensions = config.rag.embedding_dimensions;
    let provider = config.embedding_provider.as_str();
    let model = config.embedding_model.clone();
    let endpoint = config.endpoint_for(provider);

    tracing::debug!(
        "Creating embedding provider: provider={}, model={}, dimensions={}",
        provider,
        model,
        dimensions
    );

    let inner: Arc<dyn EmbeddingProvider> = match provider {
        "mock" => Arc::new(MockProvider::new(dimensions)),
        "ollama" => Arc::new(OllamaEmbedder::new(
            endpoint.as_deref(),
            model,
            dimensions,
        )?),
        "gemini" => {
            let api_key = config.resolve_api_key("gemini").ok_or_else(|| {
                AppError::Config(
                    "Gemini embeddings require GEMINI_API_KEY or GOOGLE_API_KEY".to_string(),
                )
            })?;
            Arc::new(GeminiEmbedder::new(
                endpoint.as_deref(),
                api_key,
                model,
                dimensions,
            )?)
        }
        other => {
            return Err(AppError::Config(format!(
                "Unknown embedding provider: '{}'. Supported providers: mock, ollama, gemini",
                other
            )))
        }
    };

    Ok(Arc::new(RetryingEmbedder::new(
        inner,
        RetryPolicy::from_settings(&config.rag),
    )))
}
