//! Chat generation crate for Threadwise.
//!
//! Provides a provider-agnostic streaming chat abstraction along with the
//! conversation-history rules every backend relies on.
//!
//! # Providers
//! - **Ollama**: Local LLM runtime (default)
//! - **Gemini**: Google Generative Language API
//!
//! # Example
//! ```no_run
//! use futures::StreamExt;
//! use threadwise_llm::{ChatRequest, LlmClient, providers::OllamaClient};
//!
//! # async fn example() -> threadwise_core::AppResult<()> {
//! let client = OllamaClient::new();
//! let request = ChatRequest::new("How do I apply for NYSC?", "llama3.2");
//! let mut stream = client.stream_chat(&request).await?;
//! while let Some(chunk) = stream.next().await {
//!     print!("{}", chunk?.content);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod factory;
pub mod history;
pub mod providers;
pub mod types;

// Re-export main types
pub use client::{ChatRequest, LlmClient, LlmStream, LlmStreamChunk, LlmUsage};
pub use factory::create_client;
pub use history::{normalize_history, trailing_window};
pub use providers::{GeminiClient, OllamaClient};
pub use types::{ChatRole, ChatTurn, ProviderType, RawTurn};
