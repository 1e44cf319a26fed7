//! Ask command handler.
//!
//! Runs one question through the chat pipeline and renders the response
//! stream, or writes the wire bytes untouched with `--raw`.

use super::{parse_framing, render::render};
use clap::Args;
use futures::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use threadwise_core::{config::AppConfig, AppError, AppResult};
use threadwise_knowledge::rag::decode_stream;
use threadwise_knowledge::rag::{ResponseEncoder, ResponseStream};
use threadwise_knowledge::{ChatRequest, Framing};
use threadwise_llm::RawTurn;

/// Ask a question over the forum archives
#[derive(Args, Debug)]
pub struct AskCommand {
    /// The question to ask
    pub message: String,

    /// JSON file with prior turns: [{"role": "user", "content": "..."}]
    #[arg(long)]
    pub history: Option<PathBuf>,

    /// Write the raw response stream (sidecar frame + text) to stdout
    #[arg(long, conflicts_with = "json")]
    pub raw: bool,

    /// Sidecar framing (sentinel, length-prefixed)
    #[arg(long, default_value = "sentinel", value_parser = parse_framing)]
    pub framing: Framing,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl AskCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing ask command");
        config.validate()?;

        let history = match &self.history {
            Some(path) => load_history(path)?,
            None => Vec::new(),
        };
        tracing::debug!("Loaded {} history turns", history.len());

        let request = ChatRequest::new(self.message.as_str()).with_history(history);
        let answered = match threadwise_knowledge::open_pipeline(config, self.framing) {
            Ok(pipeline) => pipeline.respond(request).await,
            Err(e) => Err(e),
        };
        let mut response = or_apology(answered, self.framing)?;

        if self.raw {
            while let Some(bytes) = response.next().await {
                let mut stdout = std::io::stdout();
                stdout.write_all(&bytes)?;
                stdout.flush()?;
            }
            return Ok(());
        }

        render(decode_stream(response, self.framing), self.json).await
    }
}

fn load_history(path: &Path) -> AppResult<Vec<RawTurn>> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|e| {
        AppError::Validation(format!("History file {:?} is not a turn list: {}", path, e))
    })
}

/// Replace a failed answer with the apology stream.
///
/// Validation errors are the caller's to fix and pass through unchanged.
fn or_apology(answered: AppResult<ResponseStream>, framing: Framing) -> AppResult<ResponseStream> {
    match answered {
        Ok(response) => Ok(response),
        Err(e @ AppError::Validation(_)) => Err(e),
        Err(e) => {
            tracing::error!("Could not answer the question: {}", e);
            ResponseEncoder::new(framing).apology()
        }
    }
}
