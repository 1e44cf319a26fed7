//! LLM provider factory.
//!
//! Builds a chat client from a provider name, an optional endpoint override
//! and an optional API key.

use crate::client::LlmClient;
use crate::providers::{GeminiClient, OllamaClient};
use crate::types::ProviderType;
use std::sync::Arc;
use threadwise_core::{AppError, AppResult};

/// Create an LLM client based on the provider name.
///
/// # Errors
/// Returns [`AppError::Config`] if the provider is unknown or a required
/// API key is missing.
pub fn create_client(
    provider: &str,
    endpoint: Option<&str>,
    api_key: Option<&str>,
) -> AppResult<Arc<dyn LlmClient>> {
    let provider_type = ProviderType::parse(provider)
        .ok_or_else(|| AppError::Config(format!("Unknown provider: {}", provider)))?;

    tracing::debug!(provider = provider_type.as_str(), "Creating LLM client");

    match provider_type {
        ProviderType::Ollama => {
            let base_url = endpoint.unwrap_or("http://localhost:11434");
            Ok(Arc::new(OllamaClient::with_base_url(base_url)))
        }
        ProviderType::Gemini => {
            let api_key = api_key.filter(|k| !k.is_empty()).ok_or_else(|| {
                AppError::Config("Gemini provider requires an API key".to_string())
            })?;
            let client = match endpoint {
                Some(url) => GeminiClient::with_base_url(api_key, url),
                None => GeminiClient::new(api_key),
            };
            Ok(Arc::new(client))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_ollama_client() {
        let client = create_client("ollama", None, None).unwrap();
        assert_eq!(client.provider_name(), "ollama");
    }

    #[test]
    fn test_create_ollama_with_custom_endpoint() {
        let client = create_client("ollama", Some("http://localhost:8080"), None);
        assert!(client.is_ok());
    }

    #[test]
    fn test_gemini_requires_api_key() {
        assert!(matches!(
            create_client("gemini", None, None),
            Err(AppError::Config(_))
        ));
        assert!(matches!(
            create_client("gemini", None, Some("")),
            Err(AppError::Config(_))
        ));
        let client = create_client("gemini", None, Some("secret")).unwrap();
        assert_eq!(client.provider_name(), "gemini");
    }

    #[test]
    fn test_unknown_provider() {
        match create_client("unknown", None, None) {
            Err(AppError::Config(msg)) => assert!(msg.contains("Unknown provider")),
            _ => panic!("Expected config error for unknown provider"),
        }
    }
}
