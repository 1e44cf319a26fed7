//! Retrieval and citation types.

use serde::{Deserialize, Serialize};

/// Where a retrieved passage came from. Serialized as-is into the sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationMetadata {
    pub url: String,
    pub title: String,
    pub author: String,
    pub date: String,
    pub forum: String,
}

/// A passage returned by the ranking backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedItem {
    /// Chunk text
    pub content: String,

    pub metadata: CitationMetadata,

    /// Cosine similarity between query and chunk embeddings
    pub similarity: f32,

    /// Combined hybrid relevance; results are ordered by this
    pub score: f32,
}

/// One entry of the sidecar's source list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub metadata: CitationMetadata,
}

/// Citation frame sent ahead of the generated answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sidecar {
    pub sources: Vec<SourceRef>,
}

impl Sidecar {
    /// Citations for the given retrieval results, in retrieval order.
    pub fn from_items(items: &[RetrievedItem]) -> Self {
        Self {
            sources: items
                .iter()
                .map(|item| SourceRef {
                    metadata: item.metadata.clone(),
                })
                .collect(),
        }
    }

    pub fn citations(&self) -> impl Iterator<Item = &CitationMetadata> {
        self.sources.iter().map(|s| &s.metadata)
    }
}
