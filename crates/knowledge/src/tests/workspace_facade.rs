//! Workspace-level ingest, stats, clean and pipeline opening.

use crate::progress::ProgressReporter;
use crate::rag::stream::Framing;
use tempfile::TempDir;
use threadwise_core::{AppConfig, AppError};

const DUMP: &str = r#"[
  {
    "url": "https://forum.example/t/nysc-allowance",
    "title": "NYSC allowance increase",
    "forumName": "Jobs",
    "posts": [
      {"author": "corper", "date": "2019-05-02", "content": "The NYSC allowance is going up to thirty three thousand naira from next month, according to the directorate."},
      {"author": "ok", "date": "2019-05-02", "content": "ok"}
    ]
  }
]"#;

fn workspace_config(temp: &TempDir) -> AppConfig {
    let mut config = AppConfig {
        workspace: temp.path().to_path_buf(),
        embedding_provider: "mock".to_string(),
        embedding_model: "trigram-v1".to_string(),
        ..AppConfig::default()
    };
    config.rag.embedding_dimensions = 64;
    config.rag.pacing_ms = 0;
    config
}

#[tokio::test]
async fn test_ingest_stats_and_clean() {
    let temp = TempDir::new().unwrap();
    let config = workspace_config(&temp);
    let dump = temp.path().join("threads.json");
    std::fs::write(&dump, DUMP).unwrap();

    assert!(crate::stats(&config).unwrap().is_none());

    let ingested = crate::ingest(&config, &dump, false, &ProgressReporter::noop())
        .await
        .unwrap();
    assert_eq!(ingested.threads, 1);
    assert_eq!(ingested.chunks_embedded, 1);

    let stats = crate::stats(&config).unwrap().unwrap();
    assert_eq!(stats.threads, 1);
    assert_eq!(stats.chunks, 1);
    assert_eq!(stats.dimensions, 64);

    assert!(crate::clean(&config).unwrap());
    assert!(!crate::clean(&config).unwrap());
    assert!(crate::stats(&config).unwrap().is_none());
}

#[tokio::test]
async fn test_reset_recovers_from_dimension_change() {
    let temp = TempDir::new().unwrap();
    let mut config = workspace_config(&temp);
    let dump = temp.path().join("threads.json");
    std::fs::write(&dump, DUMP).unwrap();

    crate::ingest(&config, &dump, false, &ProgressReporter::noop())
        .await
        .unwrap();

    config.rag.embedding_dimensions = 32;
    let mismatch = crate::ingest(&config, &dump, false, &ProgressReporter::noop()).await;
    assert!(matches!(mismatch, Err(AppError::Config(_))));

    crate::ingest(&config, &dump, true, &ProgressReporter::noop())
        .await
        .unwrap();
    assert_eq!(crate::stats(&config).unwrap().unwrap().dimensions, 32);
}

#[test]
fn test_open_pipeline_requires_index() {
    let temp = TempDir::new().unwrap();
    let config = workspace_config(&temp);

    let missing = crate::open_pipeline(&config, Framing::Sentinel);
    assert!(matches!(missing, Err(AppError::Knowledge(_))));
}

#[tokio::test]
async fn test_open_pipeline_after_ingest() {
    let temp = TempDir::new().unwrap();
    let config = workspace_config(&temp);
    let dump = temp.path().join("threads.json");
    std::fs::write(&dump, DUMP).unwrap();

    crate::ingest(&config, &dump, false, &ProgressReporter::noop())
        .await
        .unwrap();

    let pipeline = crate::open_pipeline(&config, Framing::LengthPrefixed).unwrap();
    assert_eq!(pipeline.framing(), Framing::LengthPrefixed);
}
