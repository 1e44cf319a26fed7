//! Corpus ingestion: thread dumps → chunks → embeddings → index.
//!
//! Dumps are JSON arrays of threads as written by the crawler. Every post is
//! chunked on its own, short chunks are skipped, and each remaining chunk is
//! embedded with its thread metadata prefixed. Embedding runs sequentially
//! with a pacing delay between calls. A thread's rows are written in one
//! transaction once all of its chunks have been embedded.

use crate::chunker::{chunk_text, is_short, DEFAULT_CHUNK_MAX_LENGTH, DEFAULT_MIN_CHUNK_LENGTH};
use crate::embeddings::EmbeddingProvider;
use crate::index::SqliteIndex;
use crate::progress::ProgressReporter;
use crate::types::{ForumChunk, ForumThread, IndexedChunk, IngestStats};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use threadwise_core::{AppError, AppResult, RagSettings};
use walkdir::WalkDir;

/// Chunking and pacing for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub chunk_max_length: usize,
    pub min_chunk_length: usize,
    /// Pause after every successful embedding call
    pub pacing: Duration,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            chunk_max_length: DEFAULT_CHUNK_MAX_LENGTH,
            min_chunk_length: DEFAULT_MIN_CHUNK_LENGTH,
            pacing: Duration::from_millis(500),
        }
    }
}

impl IngestOptions {
    pub fn from_settings(settings: &RagSettings) -> Self {
        Self {
            chunk_max_length: settings.chunk_max_length,
            min_chunk_length: settings.min_chunk_length,
            pacing: Duration::from_millis(settings.pacing_ms),
        }
    }
}

/// Dump files to ingest: `path` itself, or every `*.json` file below it.
pub fn discover_dumps(path: &Path) -> AppResult<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    if !path.is_dir() {
        return Err(AppError::Knowledge(format!(
            "Corpus path does not exist: {:?}",
            path
        )));
    }

    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        })
        .collect();
    files.sort();

    Ok(files)
}

/// Parse one dump file.
pub fn load_threads(file: &Path) -> AppResult<Vec<ForumThread>> {
    let contents = std::fs::read_to_string(file)?;
    serde_json::from_str(&contents).map_err(|e| {
        AppError::Knowledge(format!("Failed to parse thread dump {:?}: {}", file, e))
    })
}

/// Chunk every post of a thread. Returns the kept chunks and the number
/// skipped as too short.
pub fn chunk_thread(thread: &ForumThread, options: &IngestOptions) -> (Vec<ForumChunk>, usize) {
    let mut chunks = Vec::new();
    let mut skipped = 0;

    for post in &thread.posts {
        for (i, piece) in chunk_text(&post.content, options.chunk_max_length)
            .into_iter()
            .enumerate()
        {
            if is_short(&piece, options.min_chunk_length) {
                skipped += 1;
                continue;
            }

            chunks.push(ForumChunk {
                content: piece,
                source_url: thread.url.clone(),
                title: thread.title.clone(),
                author: post.author.clone(),
                date: post.date.clone(),
                forum_name: thread.forum_name.clone(),
                chunk_index: i as u32,
            });
        }
    }

    (chunks, skipped)
}

/// Ingest every thread found at `path` into `index`.
///
/// Per-chunk embedding failures are logged and counted. Configuration
/// errors, such as a provider returning vectors of the wrong
/// dimensionality, abort the run.
pub async fn ingest_corpus(
    path: &Path,
    embedder: &dyn EmbeddingProvider,
    index: &SqliteIndex,
    options: &IngestOptions,
    progress: &ProgressReporter,
) -> AppResult<IngestStats> {
    let start = Instant::now();
    tracing::info!(
        "Ingesting {:?} with {}/{}",
        path,
        embedder.provider_name(),
        embedder.model_name()
    );

    let files = discover_dumps(path)?;
    progress.discover(files.len() as u64, &path.display().to_string());

    let mut threads = Vec::new();
    for (i, file) in files.iter().enumerate() {
        match load_threads(file) {
            Ok(loaded) => {
                progress.parse(
                    i as u64 + 1,
                    files.len() as u64,
                    &file.display().to_string(),
                    loaded.len(),
                );
                threads.extend(loaded);
            }
            // A single unreadable dump should not sink a directory run
            Err(e) if files.len() > 1 => tracing::warn!("Skipping {:?}: {}", file, e),
            Err(e) => return Err(e),
        }
    }

    let mut stats = IngestStats::default();
    let total_threads = threads.len() as u64;

    for (i, thread) in threads.iter().enumerate() {
        let (chunks, skipped) = chunk_thread(thread, options);
        stats.chunks_skipped += skipped as u32;
        progress.embed(i as u64 + 1, total_threads, &thread.title, chunks.len());
        tracing::debug!(
            "Processing \"{}\": {} chunks, {} skipped",
            thread.title,
            chunks.len(),
            skipped
        );

        let mut rows = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let embedding_text = chunk.embedding_text();
            match embedder.embed(&embedding_text).await {
                Ok(embedding) => {
                    rows.push(IndexedChunk {
                        chunk,
                        embedding_text,
                        embedding,
                    });
                    if !options.pacing.is_zero() {
                        tokio::time::sleep(options.pacing).await;
                    }
                }
                Err(e @ AppError::Config(_)) => return Err(e),
                Err(e) => {
                    tracing::error!(
                        "Failed to embed chunk {} of \"{}\": {}",
                        chunk.chunk_index,
                        thread.title,
                        e
                    );
                    stats.failures += 1;
                }
            }
        }

        if rows.is_empty() {
            continue;
        }

        progress.index(rows.len(), &thread.url);
        match index.insert_thread(&thread.url, &rows) {
            Ok(written) => {
                stats.threads += 1;
                stats.chunks_embedded += written as u32;
            }
            Err(e @ AppError::Config(_)) => return Err(e),
            Err(e) => {
                tracing::error!("Failed to store \"{}\": {}", thread.title, e);
                stats.failures += rows.len() as u32;
            }
        }
    }

    stats.duration = start.elapsed();

    let index_stats = index.stats()?;
    tracing::info!(
        "Ingestion finished: {} threads, {} chunks embedded, {} skipped, {} failures in {:.1}s (index now holds {} chunks)",
        stats.threads,
        stats.chunks_embedded,
        stats.chunks_skipped,
        stats.failures,
        stats.duration.as_secs_f64(),
        index_stats.chunks
    );

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::providers::MockProvider;
    use crate::types::ForumPost;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const PARAGRAPH: &str = "The federal government approved a new national minimum wage of thirty thousand naira per month for all workers.";

    fn thread(url: &str, posts: &[&str]) -> ForumThread {
        ForumThread {
            url: url.to_string(),
            title: "Minimum wage".to_string(),
            forum_name: "Jobs".to_string(),
            posts: posts
                .iter()
                .map(|content| ForumPost {
                    author: "ada".to_string(),
                    date: "2019-04-18".to_string(),
                    content: content.to_string(),
                })
                .collect(),
        }
    }

    fn no_pacing() -> IngestOptions {
        IngestOptions {
            pacing: Duration::ZERO,
            ..IngestOptions::default()
        }
    }

    fn write_dump(dir: &Path, name: &str, threads: &[ForumThread]) -> PathBuf {
        let file = dir.join(name);
        std::fs::write(&file, serde_json::to_string(threads).unwrap()).unwrap();
        file
    }

    #[derive(Debug)]
    struct FailingEvery {
        inner: MockProvider,
        calls: AtomicUsize,
        nth: usize,
        error: fn() -> AppError,
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for FailingEvery {
        fn provider_name(&self) -> &str {
            "failing"
        }

        fn model_name(&self) -> &str {
            "test"
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call % self.nth == 0 {
                return Err((self.error)());
            }
            self.inner.embed(text).await
        }
    }

    #[test]
    fn test_chunk_thread_keeps_metadata_and_skips_short() {
        let t = thread("https://forum.example/t/1", &[PARAGRAPH, "Thanks!"]);
        let (chunks, skipped) = chunk_thread(&t, &IngestOptions::default());

        assert_eq!(chunks.len(), 1);
        assert_eq!(skipped, 1);
        assert_eq!(chunks[0].source_url, "https://forum.example/t/1");
        assert_eq!(chunks[0].forum_name, "Jobs");
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn test_chunk_index_counts_before_filtering() {
        let options = IngestOptions {
            chunk_max_length: 112,
            ..no_pacing()
        };
        let content = format!("ok\n{}", PARAGRAPH);
        // "ok" and the paragraph do not fit together, so "ok" is chunk 0
        // and is then dropped as too short
        let (chunks, skipped) = chunk_thread(&thread("u", &[&content]), &options);
        assert_eq!(skipped, 1);
        assert_eq!(chunks[0].chunk_index, 1);
    }

    #[test]
    fn test_discover_dumps_filters_json() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("b.json"), "[]").unwrap();
        std::fs::write(dir.path().join("nested/a.JSON"), "[]").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "skip").unwrap();

        let files = discover_dumps(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(discover_dumps(&dir.path().join("missing")).is_err());
    }

    #[tokio::test]
    async fn test_ingest_corpus_populates_index() {
        let dir = TempDir::new().unwrap();
        let dump = write_dump(
            dir.path(),
            "threads.json",
            &[
                thread("https://forum.example/t/1", &[PARAGRAPH]),
                thread("https://forum.example/t/2", &["Too short."]),
            ],
        );

        let embedder = MockProvider::new(64);
        let index = SqliteIndex::open_in_memory(64).unwrap();
        let stats = ingest_corpus(&dump, &embedder, &index, &no_pacing(), &ProgressReporter::noop())
            .await
            .unwrap();

        assert_eq!(stats.threads, 1);
        assert_eq!(stats.chunks_embedded, 1);
        assert_eq!(stats.chunks_skipped, 1);
        assert_eq!(stats.failures, 0);
        assert_eq!(index.stats().unwrap().chunks, 1);
    }

    #[tokio::test]
    async fn test_reingest_replaces_thread_rows() {
        let dir = TempDir::new().unwrap();
        let dump = write_dump(dir.path(), "t.json", &[thread("u1", &[PARAGRAPH])]);

        let embedder = MockProvider::new(32);
        let index = SqliteIndex::open_in_memory(32).unwrap();
        for _ in 0..2 {
            ingest_corpus(&dump, &embedder, &index, &no_pacing(), &ProgressReporter::noop())
                .await
                .unwrap();
        }
        assert_eq!(index.stats().unwrap().chunks, 1);
    }

    #[tokio::test]
    async fn test_embedding_failures_are_counted() {
        let dir = TempDir::new().unwrap();
        let posts: Vec<String> = (1..=4).map(|n| format!("{} Post {}.", PARAGRAPH, n)).collect();
        let posts: Vec<&str> = posts.iter().map(String::as_str).collect();
        let dump = write_dump(dir.path(), "t.json", &[thread("u1", &posts)]);

        let embedder = FailingEvery {
            inner: MockProvider::new(16),
            calls: AtomicUsize::new(0),
            nth: 2,
            error: || AppError::RetryExhausted {
                attempts: 3,
                last_error: "503".to_string(),
            },
        };
        let index = SqliteIndex::open_in_memory(16).unwrap();
        let stats = ingest_corpus(&dump, &embedder, &index, &no_pacing(), &ProgressReporter::noop())
            .await
            .unwrap();

        assert_eq!(stats.chunks_embedded, 2);
        assert_eq!(stats.failures, 2);
    }

    #[tokio::test]
    async fn test_config_error_aborts() {
        let dir = TempDir::new().unwrap();
        let dump = write_dump(dir.path(), "t.json", &[thread("u1", &[PARAGRAPH])]);

        let embedder = FailingEvery {
            inner: MockProvider::new(16),
            calls: AtomicUsize::new(0),
            nth: 1,
            error: || AppError::Config("dimension mismatch".to_string()),
        };
        let index = SqliteIndex::open_in_memory(16).unwrap();
        let result =
            ingest_corpus(&dump, &embedder, &index, &no_pacing(), &ProgressReporter::noop()).await;

        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_between_embeddings() {
        let dir = TempDir::new().unwrap();
        let dump = write_dump(dir.path(), "t.json", &[thread("u1", &[PARAGRAPH, PARAGRAPH])]);

        let embedder = MockProvider::new(16);
        let index = SqliteIndex::open_in_memory(16).unwrap();
        let started = tokio::time::Instant::now();
        ingest_corpus(
            &dump,
            &embedder,
            &index,
            &IngestOptions::default(),
            &ProgressReporter::noop(),
        )
        .await
        .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(1000));
    }
}
