//! Hybrid (vector + lexical) retrieval.
//!
//! The retriever cleans the query text and hands both the embedding and the
//! text to a single ranking call, so the backend can combine vector
//! similarity with keyword relevance in one pass.

use crate::rag::types::RetrievedItem;
use std::sync::Arc;
use threadwise_core::{AppError, AppResult, RagSettings};

/// Default minimum cosine similarity.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.1;

/// Default number of passages returned.
pub const DEFAULT_TOP_K: usize = 5;

/// One ranking call.
#[derive(Debug, Clone, PartialEq)]
pub struct RankRequest {
    pub embedding: Vec<f32>,

    /// Items with cosine similarity below this are excluded
    pub threshold: f32,

    pub limit: usize,

    /// Cleaned query text; empty means vector-only ranking
    pub text: String,
}

/// A store that can rank passages for a query.
#[async_trait::async_trait]
pub trait RankingBackend: Send + Sync {
    /// Return at most `request.limit` items ordered by descending score.
    async fn rank(&self, request: RankRequest) -> AppResult<Vec<RetrievedItem>>;
}

/// Reduce a free-text query to words and whitespace.
///
/// Every character that is not alphanumeric, `_` or whitespace becomes a
/// space, whitespace runs collapse to one space, and the result is trimmed.
/// An all-punctuation query becomes the empty string.
pub fn clean_query(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Retriever over a ranking backend.
pub struct HybridRetriever {
    backend: Arc<dyn RankingBackend>,
    threshold: f32,
    degrade_on_failure: bool,
}

impl HybridRetriever {
    pub fn new(backend: Arc<dyn RankingBackend>) -> Self {
        Self {
            backend,
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            degrade_on_failure: true,
        }
    }

    pub fn from_settings(backend: Arc<dyn RankingBackend>, settings: &RagSettings) -> Self {
        Self::new(backend)
            .with_threshold(settings.similarity_threshold)
            .with_degrade_on_failure(settings.degrade_on_retrieval_failure)
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// When set, backend failures yield an empty result instead of an error.
    pub fn with_degrade_on_failure(mut self, degrade: bool) -> Self {
        self.degrade_on_failure = degrade;
        self
    }

    /// Rank passages for a query.
    ///
    /// Configuration errors (such as an embedding of the wrong
    /// dimensionality) always propagate. Other backend failures either
    /// degrade to an empty result or surface as
    /// [`AppError::RetrievalBackend`].
    pub async fn search(
        &self,
        embedding: &[f32],
        query_text: &str,
        limit: usize,
    ) -> AppResult<Vec<RetrievedItem>> {
        let text = clean_query(query_text);
        if text.is_empty() {
            tracing::debug!("Query has no searchable words; ranking by vector only");
        }

        let request = RankRequest {
            embedding: embedding.to_vec(),
            threshold: self.threshold,
            limit,
            text,
        };

        match self.backend.rank(request).await {
            Ok(mut items) => {
                items.retain(|item| item.similarity >= self.threshold);
                items.truncate(limit);
                tracing::debug!("Retrieved {} passages (limit {})", items.len(), limit);
                Ok(items)
            }
            Err(e @ AppError::Config(_)) => Err(e),
            Err(e) if self.degrade_on_failure => {
                tracing::warn!("Retrieval failed, answering without context: {}", e);
                Ok(Vec::new())
            }
            Err(AppError::RetrievalBackend(msg)) => Err(AppError::RetrievalBackend(msg)),
            Err(e) => Err(AppError::RetrievalBackend(e.to_string())),
        }
    }
}
