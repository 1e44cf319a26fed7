//! Knowledge command handler.
//!
//! Manages the workspace corpus index.

use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use threadwise_core::{config::AppConfig, AppResult};
use threadwise_knowledge::ProgressReporter;

/// Corpus index management
#[derive(Args, Debug)]
pub struct KnowledgeCommand {
    #[command(subcommand)]
    pub action: KnowledgeAction,
}

#[derive(Subcommand, Debug)]
pub enum KnowledgeAction {
    /// Chunk, embed and index forum thread dumps
    Ingest(KnowledgeIngestCommand),
    /// Show corpus index statistics
    Stats(KnowledgeStatsCommand),
    /// Delete the corpus index
    Clean(KnowledgeCleanCommand),
}

/// Ingest thread dumps
#[derive(Args, Debug)]
pub struct KnowledgeIngestCommand {
    /// A thread dump (JSON) or a directory of dumps
    pub path: PathBuf,

    /// Delete the existing index before ingesting
    #[arg(long)]
    pub reset: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl KnowledgeIngestCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing knowledge ingest command for {:?}", self.path);
        config.validate()?;

        let progress = if self.json {
            ProgressReporter::noop()
        } else {
            ProgressReporter::new(Arc::new(|event| eprintln!("{}", event.format_simple())))
        };

        let stats = threadwise_knowledge::ingest(config, &self.path, self.reset, &progress).await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        } else {
            println!(
                "Ingested {} threads ({} chunks embedded, {} skipped, {} failed) in {:.1}s",
                stats.threads,
                stats.chunks_embedded,
                stats.chunks_skipped,
                stats.failures,
                stats.duration.as_secs_f64()
            );
        }

        Ok(())
    }
}

/// Show corpus index stats
#[derive(Args, Debug)]
pub struct KnowledgeStatsCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl KnowledgeStatsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing knowledge stats command");

        let Some(stats) = threadwise_knowledge::stats(config)? else {
            if self.json {
                println!("null");
            } else {
                println!("No corpus index at {:?}", config.index_path());
            }
            return Ok(());
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        } else {
            println!("Corpus index: {:?}", config.index_path());
            println!("  Threads: {}", stats.threads);
            println!("  Chunks: {}", stats.chunks);
            println!("  Dimensions: {}", stats.dimensions);
            println!("  DB size: {} bytes", stats.db_size_bytes);
            if let Some(last) = stats.last_ingested_at {
                println!("  Last ingest: {}", last);
            }
        }

        Ok(())
    }
}

/// Delete the corpus index
#[derive(Args, Debug)]
pub struct KnowledgeCleanCommand {}

impl KnowledgeCleanCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing knowledge clean command");

        if threadwise_knowledge::clean(config)? {
            println!("Corpus index removed");
        } else {
            println!("No corpus index to remove");
        }

        Ok(())
    }
}

impl KnowledgeCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        match &self.action {
            KnowledgeAction::Ingest(cmd) => cmd.execute(config).await,
            KnowledgeAction::Stats(cmd) => cmd.execute(config).await,
            KnowledgeAction::Clean(cmd) => cmd.execute(config).await,
        }
    }
}
