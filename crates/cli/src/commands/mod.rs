//! Command handlers for the threadwise CLI.

pub mod ask;
pub mod decode;
pub mod knowledge;
mod render;

pub use ask::AskCommand;
pub use decode::DecodeCommand;
pub use knowledge::KnowledgeCommand;

use threadwise_knowledge::Framing;

/// clap value parser for `--framing`.
pub fn parse_framing(s: &str) -> Result<Framing, String> {
    Framing::parse(s).ok_or_else(|| {
        format!(
            "unknown framing '{}', expected 'sentinel' or 'length-prefixed'",
            s
        )
    })
}
