//! SQLite-backed corpus index with hybrid ranking.
//!
//! Chunks are stored with their embedding (little-endian `f32` blob) and the
//! text that was embedded. Ranking loads candidate rows, scores them by
//! cosine similarity, and blends in a BM25 keyword score normalized against
//! the best lexical match among the candidates.

use crate::rag::retriever::{RankRequest, RankingBackend};
use crate::rag::types::{CitationMetadata, RetrievedItem};
use crate::types::{IndexStats, IndexedChunk};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use threadwise_core::{AppError, AppResult};

/// Weight of vector similarity in the combined score.
pub const VECTOR_WEIGHT: f32 = 0.7;

/// Weight of normalized keyword relevance in the combined score.
pub const LEXICAL_WEIGHT: f32 = 0.3;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS chunks (
        id TEXT PRIMARY KEY,
        source_url TEXT NOT NULL,
        title TEXT NOT NULL,
        author TEXT NOT NULL,
        date TEXT NOT NULL,
        forum TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        content TEXT NOT NULL,
        embedding_text TEXT NOT NULL,
        embedding BLOB NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source_url);
"#;

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> AppError + '_ {
    move |e| AppError::Knowledge(format!("{}: {}", context, e))
}

/// Corpus index stored in a single SQLite file.
pub struct SqliteIndex {
    conn: Mutex<Connection>,
    dimensions: usize,
    path: Option<PathBuf>,
}

impl SqliteIndex {
    /// Open (or create) the index at `db_path` for embeddings of the given
    /// dimensionality.
    ///
    /// # Errors
    /// [`AppError::Config`] if the index was built with a different
    /// dimensionality.
    pub fn open(db_path: &Path, dimensions: usize) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Knowledge(format!("Failed to create index directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path).map_err(db_err("Failed to open SQLite index"))?;
        let index = Self::init(conn, dimensions, Some(db_path.to_path_buf()))?;

        tracing::debug!("Opened corpus index at {:?} ({} dims)", db_path, dimensions);
        Ok(index)
    }

    /// In-memory index, used by tests and one-off runs.
    pub fn open_in_memory(dimensions: usize) -> AppResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(db_err("Failed to open in-memory index"))?;
        Self::init(conn, dimensions, None)
    }

    fn init(conn: Connection, dimensions: usize, path: Option<PathBuf>) -> AppResult<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(db_err("Failed to create tables"))?;

        match read_meta(&conn, "dimensions")? {
            Some(stored) => {
                let stored: usize = stored.parse().map_err(|_| {
                    AppError::Knowledge(format!("Corrupt dimensions entry: {}", stored))
                })?;
                if stored != dimensions {
                    return Err(AppError::Config(format!(
                        "Index was built with {}-dimensional embeddings but the embedding provider is configured for {}. \
                         Run `threadwise knowledge clean` and re-ingest, or restore the original embedding settings.",
                        stored, dimensions
                    )));
                }
            }
            None => write_meta(&conn, "dimensions", &dimensions.to_string())?,
        }

        Ok(Self {
            conn: Mutex::new(conn),
            dimensions,
            path,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Knowledge("Index connection lock poisoned".to_string()))
    }

    fn check_dimensions(&self, len: usize, what: &str) -> AppResult<()> {
        if len != self.dimensions {
            return Err(AppError::Config(format!(
                "{} has {} dimensions but the index expects {}",
                what, len, self.dimensions
            )));
        }
        Ok(())
    }

    /// Replace every stored chunk of `source_url` with `rows`, atomically.
    ///
    /// Returns the number of rows written.
    pub fn insert_thread(&self, source_url: &str, rows: &[IndexedChunk]) -> AppResult<usize> {
        for row in rows {
            self.check_dimensions(row.embedding.len(), "Chunk embedding")?;
        }

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(db_err("Failed to begin transaction"))?;

        tx.execute("DELETE FROM chunks WHERE source_url = ?1", params![source_url])
            .map_err(db_err("Failed to clear previous thread rows"))?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO chunks
                     (id, source_url, title, author, date, forum, chunk_index, content, embedding_text, embedding)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                )
                .map_err(db_err("Failed to prepare insert"))?;

            for row in rows {
                let chunk = &row.chunk;
                stmt.execute(params![
                    chunk_id(row),
                    chunk.source_url,
                    chunk.title,
                    chunk.author,
                    chunk.date,
                    chunk.forum_name,
                    chunk.chunk_index as i64,
                    chunk.content,
                    row.embedding_text,
                    embedding_to_bytes(&row.embedding),
                ])
                .map_err(db_err("Failed to insert chunk"))?;
            }
        }

        write_meta(&tx, "last_ingested_at", &Utc::now().to_rfc3339())?;
        tx.commit().map_err(db_err("Failed to commit thread"))?;

        tracing::debug!("Stored {} chunks for {}", rows.len(), source_url);
        Ok(rows.len())
    }

    /// Current statistics.
    pub fn stats(&self) -> AppResult<IndexStats> {
        let conn = self.lock()?;
        read_stats(&conn, self.path.as_deref())
    }

    /// Statistics for the index at `db_path` without checking its
    /// dimensionality. `None` when no index exists.
    pub fn inspect(db_path: &Path) -> AppResult<Option<IndexStats>> {
        if !db_path.exists() {
            return Ok(None);
        }
        let conn = Connection::open(db_path).map_err(db_err("Failed to open SQLite index"))?;
        conn.execute_batch(SCHEMA)
            .map_err(db_err("Failed to create tables"))?;
        read_stats(&conn, Some(db_path)).map(Some)
    }

    /// Delete the index file. Returns whether one existed.
    pub fn destroy(db_path: &Path) -> AppResult<bool> {
        if !db_path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(db_path)?;
        tracing::info!("Removed corpus index at {:?}", db_path);
        Ok(true)
    }

    fn rank_rows(&self, request: &RankRequest) -> AppResult<Vec<RetrievedItem>> {
        self.check_dimensions(request.embedding.len(), "Query embedding")?;

        let rows = {
            let conn = self.lock()?;
            load_rows(&conn)?
        };

        let query_tokens = tokenize(&request.text);
        let doc_tokens: Vec<Vec<String>> = rows.iter().map(|r| tokenize(&r.content)).collect();
        let corpus = Bm25Corpus::new(&doc_tokens);

        let candidates: Vec<(usize, f32, f32)> = rows
            .iter()
            .enumerate()
            .filter_map(|(i, row)| {
                let similarity = cosine_similarity(&request.embedding, &row.embedding);
                if similarity < request.threshold {
                    return None;
                }
                let lexical = corpus.score(&query_tokens, &doc_tokens[i]);
                Some((i, similarity, lexical))
            })
            .collect();

        let best_lexical = candidates
            .iter()
            .map(|&(_, _, lexical)| lexical)
            .fold(0.0f32, f32::max);

        let mut scored: Vec<(usize, f32, f32)> = candidates
            .into_iter()
            .map(|(i, similarity, lexical)| {
                let normalized = if best_lexical > 0.0 {
                    lexical / best_lexical
                } else {
                    0.0
                };
                (i, similarity, VECTOR_WEIGHT * similarity + LEXICAL_WEIGHT * normalized)
            })
            .collect();

        scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(request.limit);

        let mut rows: Vec<Option<StoredRow>> = rows.into_iter().map(Some).collect();
        let items = scored
            .into_iter()
            .filter_map(|(i, similarity, score)| {
                rows[i].take().map(|row| RetrievedItem {
                    content: row.content,
                    metadata: row.metadata,
                    similarity,
                    score,
                })
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            "Ranked {} of {} chunks (threshold {}, lexical terms {})",
            items.len(),
            doc_tokens.len(),
            request.threshold,
            query_tokens.len()
        );

        Ok(items)
    }
}

#[async_trait::async_trait]
impl RankingBackend for SqliteIndex {
    async fn rank(&self, request: RankRequest) -> AppResult<Vec<RetrievedItem>> {
        self.rank_rows(&request).map_err(|e| match e {
            AppError::Knowledge(msg) => AppError::RetrievalBackend(msg),
            other => other,
        })
    }
}

struct StoredRow {
    content: String,
    metadata: CitationMetadata,
    embedding: Vec<f32>,
}

fn load_rows(conn: &Connection) -> AppResult<Vec<StoredRow>> {
    let mut stmt = conn
        .prepare("SELECT source_url, title, author, date, forum, content, embedding FROM chunks")
        .map_err(db_err("Failed to prepare query"))?;

    let rows = stmt
        .query_map([], |row| {
            let bytes: Vec<u8> = row.get(6)?;
            Ok((
                CitationMetadata {
                    url: row.get(0)?,
                    title: row.get(1)?,
                    author: row.get(2)?,
                    date: row.get(3)?,
                    forum: row.get(4)?,
                },
                row.get::<_, String>(5)?,
                bytes,
            ))
        })
        .map_err(db_err("Failed to query chunks"))?;

    let mut out = Vec::new();
    for row in rows {
        let (metadata, content, bytes) = row.map_err(db_err("Failed to read chunk"))?;
        match bytes_to_embedding(&bytes) {
            Some(embedding) => out.push(StoredRow {
                content,
                metadata,
                embedding,
            }),
            None => tracing::warn!("Skipping chunk with corrupt embedding from {}", metadata.url),
        }
    }
    Ok(out)
}

fn read_meta(conn: &Connection, key: &str) -> AppResult<Option<String>> {
    conn.query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
        row.get(0)
    })
    .optional()
    .map_err(db_err("Failed to read index metadata"))
}

fn write_meta(conn: &Connection, key: &str, value: &str) -> AppResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
        params![key, value],
    )
    .map_err(db_err("Failed to write index metadata"))?;
    Ok(())
}

fn read_stats(conn: &Connection, path: Option<&Path>) -> AppResult<IndexStats> {
    let count = |sql: &str| -> AppResult<u64> {
        conn.query_row(sql, [], |row| row.get::<_, i64>(0))
            .map(|v| v as u64)
            .map_err(db_err("Failed to count chunks"))
    };

    let threads = count("SELECT COUNT(DISTINCT source_url) FROM chunks")?;
    let chunks = count("SELECT COUNT(*) FROM chunks")?;
    let dimensions = read_meta(conn, "dimensions")?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let last_ingested_at = read_meta(conn, "last_ingested_at")?
        .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
        .map(|dt| dt.with_timezone(&Utc));
    let db_size_bytes = path
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(IndexStats {
        threads,
        chunks,
        dimensions,
        last_ingested_at,
        db_size_bytes,
    })
}

/// Stable row id, so re-ingesting a thread overwrites rather than duplicates.
fn chunk_id(row: &IndexedChunk) -> String {
    let chunk = &row.chunk;
    let mut hasher = Sha256::new();
    for part in [
        chunk.source_url.as_str(),
        chunk.author.as_str(),
        chunk.date.as_str(),
        chunk.chunk_index.to_string().as_str(),
        chunk.content.as_str(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// Calculate cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
        .collect()
}

/// Document frequencies and length statistics for BM25.
struct Bm25Corpus {
    doc_count: f32,
    avg_len: f32,
    df: HashMap<String, usize>,
}

impl Bm25Corpus {
    const K1: f32 = 1.2;
    const B: f32 = 0.75;

    fn new(docs: &[Vec<String>]) -> Self {
        let mut df = HashMap::new();
        for tokens in docs {
            let unique: HashSet<&String> = tokens.iter().collect();
            for token in unique {
                *df.entry(token.clone()).or_insert(0) += 1;
            }
        }
        let total_len: usize = docs.iter().map(Vec::len).sum();
        Self {
            doc_count: docs.len() as f32,
            avg_len: total_len as f32 / docs.len().max(1) as f32,
            df,
        }
    }

    fn score(&self, query: &[String], doc: &[String]) -> f32 {
        if query.is_empty() || doc.is_empty() {
            return 0.0;
        }

        let mut tf: HashMap<&str, usize> = HashMap::new();
        for token in doc {
            *tf.entry(token.as_str()).or_insert(0) += 1;
        }

        let doc_len = doc.len() as f32;
        let unique_query: HashSet<&String> = query.iter().collect();
        unique_query
            .into_iter()
            .filter_map(|term| {
                let freq = *tf.get(term.as_str())? as f32;
                let df = self.df.get(term).copied().unwrap_or(0) as f32;
                let idf = (1.0 + (self.doc_count - df + 0.5) / (df + 0.5)).ln();
                let norm = Self::K1 * (1.0 - Self::B + Self::B * doc_len / self.avg_len.max(1e-3));
                Some(idf * freq * (Self::K1 + 1.0) / (freq + norm))
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ForumChunk;
    use tempfile::TempDir;

    fn row(url: &str, index: u32, content: &str, embedding: Vec<f32>) -> IndexedChunk {
        let chunk = ForumChunk {
            content: content.to_string(),
            source_url: url.to_string(),
            title: format!("Thread {}", url),
            author: "ada".to_string(),
            date: "2019-04-18".to_string(),
            forum_name: "Jobs".to_string(),
            chunk_index: index,
        };
        IndexedChunk {
            embedding_text: chunk.embedding_text(),
            chunk,
            embedding,
        }
    }

    fn request(embedding: Vec<f32>, text: &str) -> RankRequest {
        RankRequest {
            embedding,
            threshold: 0.1,
            limit: 5,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_rank_by_similarity() {
        let index = SqliteIndex::open_in_memory(3).unwrap();
        index
            .insert_thread(
                "t1",
                &[
                    row("t1", 0, "close match", vec![1.0, 0.0, 0.0]),
                    row("t1", 1, "partial match", vec![0.7, 0.7, 0.0]),
                    row("t1", 2, "orthogonal", vec![0.0, 0.0, 1.0]),
                ],
            )
            .unwrap();

        let items = index.rank(request(vec![1.0, 0.0, 0.0], "")).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].content, "close match");
        assert!(items[0].score >= items[1].score);
        assert!(items.iter().all(|i| i.similarity >= 0.1));
        assert_eq!(items[0].metadata.forum, "Jobs");
    }

    #[tokio::test]
    async fn test_keyword_match_breaks_vector_tie() {
        let index = SqliteIndex::open_in_memory(2).unwrap();
        index
            .insert_thread(
                "t1",
                &[
                    row("t1", 0, "camp registration opens soon", vec![1.0, 0.1]),
                    row("t1", 1, "the minimum wage is thirty thousand", vec![1.0, 0.1]),
                ],
            )
            .unwrap();

        let items = index
            .rank(request(vec![1.0, 0.1], "minimum wage"))
            .await
            .unwrap();
        assert_eq!(items[0].content, "the minimum wage is thirty thousand");
        assert!((items[0].score - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_limit_is_respected() {
        let index = SqliteIndex::open_in_memory(2).unwrap();
        let rows: Vec<IndexedChunk> = (0..8)
            .map(|i| row("t1", i, &format!("post {}", i), vec![1.0, i as f32 * 0.1]))
            .collect();
        index.insert_thread("t1", &rows).unwrap();

        let items = index.rank(request(vec![1.0, 0.0], "post")).await.unwrap();
        assert_eq!(items.len(), 5);
    }

    #[tokio::test]
    async fn test_query_dimension_mismatch_is_config_error() {
        let index = SqliteIndex::open_in_memory(3).unwrap();
        assert!(matches!(
            index.rank(request(vec![1.0, 0.0], "q")).await,
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_insert_dimension_mismatch_is_config_error() {
        let index = SqliteIndex::open_in_memory(3).unwrap();
        let result = index.insert_thread("t1", &[row("t1", 0, "x", vec![1.0])]);
        assert!(matches!(result, Err(AppError::Config(_))));
        assert_eq!(index.stats().unwrap().chunks, 0);
    }

    #[test]
    fn test_reopen_with_other_dimensions_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("index.sqlite");

        SqliteIndex::open(&path, 768).unwrap();
        assert!(SqliteIndex::open(&path, 768).is_ok());
        assert!(matches!(
            SqliteIndex::open(&path, 3072),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_reinserting_thread_replaces_rows() {
        let index = SqliteIndex::open_in_memory(2).unwrap();
        index
            .insert_thread("t1", &[row("t1", 0, "a", vec![1.0, 0.0]), row("t1", 1, "b", vec![1.0, 0.0])])
            .unwrap();
        index
            .insert_thread("t1", &[row("t1", 0, "a2", vec![1.0, 0.0])])
            .unwrap();
        index
            .insert_thread("t2", &[row("t2", 0, "c", vec![0.0, 1.0])])
            .unwrap();

        let stats = index.stats().unwrap();
        assert_eq!(stats.threads, 2);
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.dimensions, 2);
        assert!(stats.last_ingested_at.is_some());
    }

    #[test]
    fn test_inspect_and_destroy() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/index.sqlite");

        assert!(SqliteIndex::inspect(&path).unwrap().is_none());
        {
            let index = SqliteIndex::open(&path, 2).unwrap();
            index
                .insert_thread("t1", &[row("t1", 0, "a", vec![1.0, 0.0])])
                .unwrap();
        }

        let stats = SqliteIndex::inspect(&path).unwrap().unwrap();
        assert_eq!(stats.chunks, 1);
        assert!(stats.db_size_bytes > 0);

        assert!(SqliteIndex::destroy(&path).unwrap());
        assert!(!SqliteIndex::destroy(&path).unwrap());
        assert!(SqliteIndex::inspect(&path).unwrap().is_none());
    }

    #[test]
    fn test_embedding_bytes_roundtrip_rejects_bad_length() {
        let bytes = embedding_to_bytes(&[0.25, -1.5]);
        assert_eq!(bytes_to_embedding(&bytes), Some(vec![0.25, -1.5]));
        assert_eq!(bytes_to_embedding(&bytes[..5]), None);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 0.001);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 0.001);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_bm25_prefers_documents_with_query_terms() {
        let docs = vec![tokenize("minimum wage news"), tokenize("camp kit list")];
        let corpus = Bm25Corpus::new(&docs);
        let query = tokenize("Minimum wage");
        assert!(corpus.score(&query, &docs[0]) > 0.0);
        assert_eq!(corpus.score(&query, &docs[1]), 0.0);
    }
}
