//! Line framing over HTTP byte streams.
//!
//! Ollama streams newline-delimited JSON and Gemini streams server-sent
//! events. Neither guarantees that a transport chunk ends on a line
//! boundary, so lines are reassembled across chunks before parsing.

use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use threadwise_core::{AppError, AppResult};

struct LineState<S> {
    inner: Pin<Box<S>>,
    buffer: Vec<u8>,
    ready: VecDeque<String>,
    finished: bool,
}

impl<S> LineState<S> {
    fn drain_complete_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.push_line(&raw);
        }
    }

    fn push_line(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches(['\r', '\n']);
        if !line.trim().is_empty() {
            self.ready.push_back(line.to_string());
        }
    }
}

/// Turn a stream of byte chunks into a stream of non-empty lines.
///
/// A trailing line without a newline is emitted when the input ends.
pub fn line_stream<S, B, E>(bytes: S) -> impl Stream<Item = AppResult<String>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    let state = LineState {
        inner: Box::pin(bytes),
        buffer: Vec::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.ready.pop_front() {
                return Some((Ok(line), state));
            }
            if state.finished {
                return None;
            }
            match state.inner.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(chunk.as_ref());
                    state.drain_complete_lines();
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(AppError::Llm(format!("Stream error: {}", e))), state));
                }
                None => {
                    state.finished = true;
                    let rest = std::mem::take(&mut state.buffer);
                    state.push_line(&rest);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(chunks: Vec<&'static str>) -> Vec<String> {
        let input = futures::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, std::io::Error>(c.as_bytes().to_vec())),
        );
        line_stream(input)
            .map(|r| r.unwrap())
            .collect::<Vec<_>>()
            .await
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let lines = collect(vec!["{\"a\":", "1}\n{\"b\"", ":2}\n"]).await;
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[tokio::test]
    async fn test_blank_lines_and_crlf() {
        let lines = collect(vec!["data: x\r\n\r\n", "data: y\r\n"]).await;
        assert_eq!(lines, vec!["data: x", "data: y"]);
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline() {
        let lines = collect(vec!["one\ntw", "o"]).await;
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_chunks() {
        let bytes = "naïra\n".as_bytes();
        let (left, right) = bytes.split_at(3);
        let input = futures::stream::iter(vec![
            Ok::<_, std::io::Error>(left.to_vec()),
            Ok(right.to_vec()),
        ]);
        let lines: Vec<String> = line_stream(input).map(|r| r.unwrap()).collect().await;
        assert_eq!(lines, vec!["naïra"]);
    }

    #[tokio::test]
    async fn test_transport_error_ends_stream() {
        let input = futures::stream::iter(vec![
            Ok("partial\n".as_bytes().to_vec()),
            Err(std::io::Error::other("reset")),
        ]);
        let items: Vec<AppResult<String>> = line_stream(input).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }
}
