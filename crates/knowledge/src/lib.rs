//! Forum corpus indexing and retrieval-augmented answering.
//!
//! Threads are chunked, embedded and stored in a local SQLite index at
//! ingestion time. At question time the [`rag::ChatPipeline`] embeds the
//! question, ranks passages with a hybrid vector + BM25 score, grounds the
//! generation backend in the best passages and streams the answer behind a
//! citation sidecar.

pub mod chunker;
pub mod embeddings;
pub mod index;
pub mod ingest;
pub mod progress;
pub mod rag;
pub mod types;

#[cfg(test)]
mod tests;

pub use embeddings::{create_provider, EmbeddingProvider, RetryPolicy, RetryingEmbedder};
pub use index::SqliteIndex;
pub use ingest::{ingest_corpus, IngestOptions};
pub use progress::{ProgressEvent, ProgressReporter};
pub use rag::{ChatPipeline, ChatRequest, DecodeEvent, Framing, Sidecar, SidecarDecoder};
pub use types::{ForumChunk, ForumPost, ForumThread, IndexStats, IngestStats};

use std::path::Path;
use std::sync::Arc;
use threadwise_core::{AppConfig, AppError, AppResult};

/// Ingest the dumps at `path` into the workspace index.
///
/// With `reset`, the existing index file is removed first, which also
/// recovers from an index built with a different dimensionality.
pub async fn ingest(
    config: &AppConfig,
    path: &Path,
    reset: bool,
    progress: &ProgressReporter,
) -> AppResult<IngestStats> {
    let index_path = config.index_path();

    if reset {
        tracing::info!("Resetting corpus index");
        SqliteIndex::destroy(&index_path)?;
    }

    let index = SqliteIndex::open(&index_path, config.rag.embedding_dimensions)?;
    let embedder = create_provider(config)?;

    ingest_corpus(
        path,
        embedder.as_ref(),
        &index,
        &IngestOptions::from_settings(&config.rag),
        progress,
    )
    .await
}

/// Statistics for the workspace index, `None` if nothing was ingested yet.
pub fn stats(config: &AppConfig) -> AppResult<Option<IndexStats>> {
    SqliteIndex::inspect(&config.index_path())
}

/// Delete the workspace index. Returns whether one existed.
pub fn clean(config: &AppConfig) -> AppResult<bool> {
    SqliteIndex::destroy(&config.index_path())
}

/// Build the chat pipeline over the workspace index.
pub fn open_pipeline(config: &AppConfig, framing: Framing) -> AppResult<ChatPipeline> {
    let index_path = config.index_path();
    if !index_path.exists() {
        return Err(AppError::Knowledge(format!(
            "No corpus index at {:?}. Run 'threadwise knowledge ingest' first.",
            index_path
        )));
    }

    let index = Arc::new(SqliteIndex::open(
        &index_path,
        config.rag.embedding_dimensions,
    )?);

    ChatPipeline::from_config(config, index, framing)
}
