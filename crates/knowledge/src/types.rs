//! Corpus and index type definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One archived forum thread as produced by the crawler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForumThread {
    pub url: String,

    pub title: String,

    #[serde(default)]
    pub forum_name: String,

    #[serde(default)]
    pub posts: Vec<ForumPost>,
}

/// One post inside a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForumPost {
    #[serde(default)]
    pub author: String,

    #[serde(default)]
    pub date: String,

    #[serde(default)]
    pub content: String,
}

/// An indexed slice of a forum post.
///
/// `chunk_index` is the position of this chunk among all chunks produced for
/// its post, counted before short chunks are filtered out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForumChunk {
    pub content: String,
    pub source_url: String,
    pub title: String,
    pub author: String,
    pub date: String,
    pub forum_name: String,
    pub chunk_index: u32,
}

impl ForumChunk {
    /// Text sent to the embedding model. Thread and post metadata are
    /// prefixed so queries mentioning a title or author match the chunk.
    pub fn embedding_text(&self) -> String {
        format!(
            "Title: {}\nAuthor: {}\nDate: {}\nForum: {}\nContent: {}",
            self.title, self.author, self.date, self.forum_name, self.content
        )
    }
}

/// A chunk paired with its embedding, ready for insertion.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk: ForumChunk,
    pub embedding_text: String,
    pub embedding: Vec<f32>,
}

/// Statistics for the corpus index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    /// Distinct threads with at least one chunk
    pub threads: u64,

    /// Total chunks stored
    pub chunks: u64,

    /// Embedding dimensionality recorded for the index
    pub dimensions: usize,

    /// Last time a thread was written
    pub last_ingested_at: Option<DateTime<Utc>>,

    /// Size of the database file in bytes
    pub db_size_bytes: u64,
}

/// Statistics from an ingestion run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestStats {
    /// Threads with at least one stored chunk
    pub threads: u32,

    /// Chunks embedded and stored
    pub chunks_embedded: u32,

    /// Chunks dropped for being too short
    pub chunks_skipped: u32,

    /// Chunks whose embedding failed
    pub failures: u32,

    /// Wall-clock duration
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
