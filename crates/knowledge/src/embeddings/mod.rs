//! Embedding generation for queries and corpus chunks.

pub mod provider;
pub mod providers;
pub mod retry;

pub use provider::{check_dimensions, create_provider, EmbeddingProvider};
pub use retry::{RetryPolicy, RetryingEmbedder};
