//! Terminal rendering of decoded response streams.

use futures::{Stream, StreamExt};
use std::io::Write;
use threadwise_core::AppResult;
use threadwise_knowledge::rag::CitationMetadata;
use threadwise_knowledge::DecodeEvent;

/// Consume decoded events and print them.
///
/// Answer text streams to stdout as it arrives and the cited sources follow
/// it. With `json`, a single object is printed once the stream ends.
pub async fn render<S>(events: S, json: bool) -> AppResult<()>
where
    S: Stream<Item = DecodeEvent>,
{
    let mut events = std::pin::pin!(events);
    let mut sources: Vec<CitationMetadata> = Vec::new();
    let mut answer = String::new();

    while let Some(event) = events.next().await {
        match event {
            DecodeEvent::Sources(sidecar) => {
                tracing::debug!("Received {} sources", sidecar.sources.len());
                sources.extend(sidecar.citations().cloned());
            }
            DecodeEvent::Text(text) => {
                if !json {
                    print!("{}", text);
                    std::io::stdout().flush()?;
                }
                answer.push_str(&text);
            }
        }
    }

    if json {
        let output = serde_json::json!({
            "answer": answer,
            "sources": sources,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!();
    println!();
    if sources.is_empty() {
        println!("Sources: (no matching discussions)");
    } else {
        println!("Sources:");
        for source in &sources {
            println!(
                "- {} by {}, {} [{}] ({})",
                source.title, source.author, source.date, source.forum, source.url
            );
        }
    }

    Ok(())
}
