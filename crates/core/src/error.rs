//! Error types for threadwise.
//!
//! A single error enum covers every failure class in the pipeline. The
//! variants mirror how each class is handled: validation failures are
//! rejected up front, transient service failures are retried, retrieval
//! failures degrade to an ungrounded answer, configuration failures are
//! fatal, and protocol failures are logged and skipped by the decoder.

use thiserror::Error;

/// Unified error type for threadwise.
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing or malformed inbound request
    #[error("Validation error: {0}")]
    Validation(String),

    /// Backend busy or rate limited; safe to retry
    #[error("Transient service error: {0}")]
    TransientService(String),

    /// Backend failure that must not be retried
    #[error("Service error: {0}")]
    FatalService(String),

    /// Retry budget spent on transient failures
    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    /// Ranking backend failure
    #[error("Retrieval backend error: {0}")]
    RetrievalBackend(String),

    /// Missing credentials, dimension mismatch and other fatal setup errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed sidecar frame on the response stream
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// LLM provider errors
    #[error("LLM error: {0}")]
    Llm(String),

    /// Corpus index and ingestion errors
    #[error("Knowledge error: {0}")]
    Knowledge(String),

    /// Prompt system errors
    #[error("Prompt error: {0}")]
    Prompt(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// Whether the operation that produced this error may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::TransientService(_))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
