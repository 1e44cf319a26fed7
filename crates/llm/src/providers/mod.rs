//! Generation backend implementations and shared HTTP helpers.

pub mod gemini;
pub mod lines;
pub mod ollama;

pub use gemini::GeminiClient;
pub use ollama::OllamaClient;

use reqwest::StatusCode;
use threadwise_core::AppError;

/// Classify a non-success HTTP status from a model backend.
///
/// Rate limiting and overload are transient; rejected credentials are a
/// configuration problem; everything else is a fatal service error.
pub fn status_error(provider: &str, status: StatusCode, body: &str) -> AppError {
    let message = format!("{} API error ({}): {}", provider, status, body.trim());
    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            AppError::TransientService(message)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AppError::Config(message),
        _ => AppError::FatalService(message),
    }
}
