//! Retry with exponential backoff for transient backend failures.

use crate::embeddings::provider::EmbeddingProvider;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use threadwise_core::{AppError, AppResult, RagSettings};

/// Backoff schedule for transient failures.
///
/// Attempt `n` (1-based) that fails transiently is followed by a sleep of
/// `base_delay * 2^(n-1)`, except after the last attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_settings(settings: &RagSettings) -> Self {
        Self::new(
            settings.retry_attempts,
            Duration::from_millis(settings.retry_base_delay_ms),
        )
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Run `op` until it succeeds, fails non-transiently, or the attempt
    /// budget is spent.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    if attempt >= max_attempts {
                        tracing::warn!("{} failed after {} attempts: {}", label, attempt, e);
                        return Err(AppError::RetryExhausted {
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }

                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        "{} busy (attempt {}/{}), retrying in {}ms: {}",
                        label,
                        attempt,
                        max_attempts,
                        delay.as_millis(),
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Embedding provider decorator that retries transient failures.
#[derive(Debug)]
pub struct RetryingEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    policy: RetryPolicy,
}

impl RetryingEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for RetryingEmbedder {
    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        let inner = &self.inner;
        self.policy
            .run("Embedding request", move || inner.embed(text))
            .await
    }
}
