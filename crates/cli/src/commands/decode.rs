//! Decode command handler.
//!
//! Reads a response stream from stdin (for example `threadwise ask --raw`)
//! and renders it the same way `ask` does.

use super::{parse_framing, render::render};
use clap::Args;
use futures::stream;
use threadwise_core::AppResult;
use threadwise_knowledge::rag::decode_stream;
use threadwise_knowledge::Framing;
use tokio::io::AsyncReadExt;

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Decode a response stream read from stdin
#[derive(Args, Debug)]
pub struct DecodeCommand {
    /// Sidecar framing (sentinel, length-prefixed)
    #[arg(long, default_value = "sentinel", value_parser = parse_framing)]
    pub framing: Framing,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl DecodeCommand {
    pub async fn execute(&self) -> AppResult<()> {
        tracing::info!("Decoding response stream from stdin ({})", self.framing.as_str());

        let fragments = stream::unfold(tokio::io::stdin(), |mut stdin| async move {
            let mut buf = vec![0u8; READ_BUFFER_SIZE];
            match stdin.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((buf, stdin))
                }
                Err(e) => {
                    tracing::error!("Failed to read stdin: {}", e);
                    None
                }
            }
        });

        render(decode_stream(fragments, self.framing), self.json).await
    }
}
