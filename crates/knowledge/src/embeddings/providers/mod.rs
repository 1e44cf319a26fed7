//! Embedding provider implementations.

pub mod gemini;
pub mod mock;
pub mod ollama;

pub use gemini::GeminiEmbedder;
pub use mock::MockProvider;
pub use ollama::OllamaEmbedder;
