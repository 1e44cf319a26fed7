//! Response wire format.
//!
//! A response is one byte stream: a citation sidecar frame first, then the
//! generated answer text as it is produced. Two framings exist:
//!
//! - sentinel (default): `__SOURCES__{json}__END_SOURCES__\n`
//! - length-prefixed: `__SIDECAR__`, a 4-byte big-endian payload length,
//!   the JSON payload, then `\n`
//!
//! [`SidecarDecoder`] reverses this incrementally. It tolerates arbitrary
//! fragment boundaries (inside a sentinel, inside the JSON, inside a
//! multi-byte character) and holds back display text until it knows
//! whether a sidecar is present.

use crate::rag::types::Sidecar;
use futures::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;
use std::ops::Range;
use std::pin::Pin;
use threadwise_core::{AppError, AppResult};

pub const START_SENTINEL: &[u8] = b"__SOURCES__";
pub const END_SENTINEL: &[u8] = b"__END_SOURCES__";
pub const LENGTH_PREFIX_MARKER: &[u8] = b"__SIDECAR__";

/// Bytes buffered before concluding that no sidecar is present.
pub const DEFAULT_LOOKAHEAD: usize = 64 * 1024;

/// Text sent in place of the rest of the answer when generation fails.
pub const APOLOGY: &str = "Sorry, something went wrong. Please try again.";

/// Sidecar framing on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    #[default]
    Sentinel,
    LengthPrefixed,
}

impl Framing {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sentinel" => Some(Self::Sentinel),
            "length-prefixed" | "length_prefixed" | "length" => Some(Self::LengthPrefixed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sentinel => "sentinel",
            Self::LengthPrefixed => "length-prefixed",
        }
    }
}

/// Serialize the sidecar frame.
pub fn encode_sidecar(sidecar: &Sidecar, framing: Framing) -> AppResult<Vec<u8>> {
    let payload = serde_json::to_vec(sidecar)?;

    let mut frame = Vec::with_capacity(payload.len() + 32);
    match framing {
        Framing::Sentinel => {
            frame.extend_from_slice(START_SENTINEL);
            extend_escaped(&mut frame, &payload);
            frame.extend_from_slice(END_SENTINEL);
        }
        Framing::LengthPrefixed => {
            let len = u32::try_from(payload.len()).map_err(|_| {
                AppError::Protocol(format!("Sidecar of {} bytes is too large", payload.len()))
            })?;
            frame.extend_from_slice(LENGTH_PREFIX_MARKER);
            frame.extend_from_slice(&len.to_be_bytes());
            frame.extend_from_slice(&payload);
        }
    }
    frame.push(b'\n');

    Ok(frame)
}

/// Copy a JSON payload with every `_` written as `\u005f`.
///
/// Underscores only occur inside JSON strings, so the escaped payload parses
/// to the same value and can never contain a sentinel.
fn extend_escaped(frame: &mut Vec<u8>, payload: &[u8]) {
    for &byte in payload {
        if byte == b'_' {
            frame.extend_from_slice(br"\u005f");
        } else {
            frame.push(byte);
        }
    }
}

/// Byte stream sent to the client. Dropping it cancels generation.
pub type ResponseStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// Builds the response byte stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseEncoder {
    framing: Framing,
}

impl ResponseEncoder {
    pub fn new(framing: Framing) -> Self {
        Self { framing }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Yield the sidecar frame, then each generated token as it arrives.
    ///
    /// `tokens` is not polled until the sidecar frame has been taken, so a
    /// lazily started generation begins after the citations are on the
    /// wire. A token error ends the stream with [`APOLOGY`].
    pub fn encode<S>(&self, sidecar: &Sidecar, tokens: S) -> AppResult<ResponseStream>
    where
        S: Stream<Item = AppResult<String>> + Send + 'static,
    {
        let frame = encode_sidecar(sidecar, self.framing)?;

        let body = stream::unfold(Some(Box::pin(tokens)), |state| async move {
            let mut tokens = state?;
            loop {
                match tokens.next().await {
                    Some(Ok(text)) if text.is_empty() => continue,
                    Some(Ok(text)) => return Some((text.into_bytes(), Some(tokens))),
                    Some(Err(e)) => {
                        tracing::error!("Generation failed mid-stream: {}", e);
                        return Some((APOLOGY.as_bytes().to_vec(), None));
                    }
                    None => return None,
                }
            }
        });

        Ok(Box::pin(stream::once(async move { frame }).chain(body)))
    }

    /// Response for a request that failed before retrieval finished: an
    /// empty sidecar followed by [`APOLOGY`].
    pub fn apology(&self) -> AppResult<ResponseStream> {
        self.encode(
            &Sidecar::default(),
            stream::once(async { Ok(APOLOGY.to_string()) }),
        )
    }
}

/// Output of the decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeEvent {
    /// The citation sidecar, emitted at most once
    Sources(Sidecar),
    /// Display text
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Looking for the sidecar; nothing is emitted yet
    Scanning,
    /// Sidecar handled or ruled out; bytes are display text
    Passthrough,
}

enum Scan {
    Pending,
    Absent,
    Found {
        start: usize,
        payload: Range<usize>,
        end: usize,
    },
}

/// Incremental response decoder.
#[derive(Debug)]
pub struct SidecarDecoder {
    framing: Framing,
    lookahead: usize,
    phase: Phase,
    pending: Vec<u8>,
    carry: Vec<u8>,
}

impl SidecarDecoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            lookahead: DEFAULT_LOOKAHEAD,
            phase: Phase::Scanning,
            pending: Vec::new(),
            carry: Vec::new(),
        }
    }

    pub fn with_lookahead(mut self, lookahead: usize) -> Self {
        self.lookahead = lookahead;
        self
    }

    /// Feed one fragment.
    pub fn push(&mut self, fragment: &[u8]) -> Vec<DecodeEvent> {
        let mut events = Vec::new();
        match self.phase {
            Phase::Passthrough => self.emit_text(fragment, &mut events),
            Phase::Scanning => {
                self.pending.extend_from_slice(fragment);
                self.scan(false, &mut events);
            }
        }
        events
    }

    /// Signal end of stream and flush whatever is buffered.
    pub fn finish(&mut self) -> Vec<DecodeEvent> {
        let mut events = Vec::new();
        if self.phase == Phase::Scanning {
            self.scan(true, &mut events);
        }
        if !self.carry.is_empty() {
            let tail = std::mem::take(&mut self.carry);
            events.push(DecodeEvent::Text(String::from_utf8_lossy(&tail).into_owned()));
        }
        events
    }

    fn scan(&mut self, eof: bool, events: &mut Vec<DecodeEvent>) {
        let outcome = match self.framing {
            Framing::Sentinel => self.scan_sentinel(eof),
            Framing::LengthPrefixed => self.scan_length_prefixed(eof),
        };

        match outcome {
            Scan::Pending => {}
            Scan::Absent => {
                let buffered = std::mem::take(&mut self.pending);
                self.phase = Phase::Passthrough;
                self.emit_text(&buffered, events);
            }
            Scan::Found {
                start,
                payload,
                end,
            } => {
                let buffered = std::mem::take(&mut self.pending);
                self.phase = Phase::Passthrough;

                if start > 0 {
                    events.push(DecodeEvent::Text(
                        String::from_utf8_lossy(&buffered[..start]).into_owned(),
                    ));
                }

                match serde_json::from_slice::<Sidecar>(&buffered[payload]) {
                    Ok(sidecar) => events.push(DecodeEvent::Sources(sidecar)),
                    Err(e) => {
                        let err = AppError::Protocol(format!("Malformed sidecar payload: {}", e));
                        tracing::warn!("Dropping sidecar: {}", err);
                    }
                }

                self.emit_text(&buffered[end..], events);
            }
        }
    }

    /// Shared decision when no start marker is in the buffer.
    fn no_marker(&self, eof: bool) -> Scan {
        if eof || self.pending.len() > self.lookahead {
            Scan::Absent
        } else {
            Scan::Pending
        }
    }

    /// Frame complete up to `frame_end`; swallow one trailing newline.
    fn close_frame(&self, start: usize, payload: Range<usize>, frame_end: usize, eof: bool) -> Scan {
        if frame_end == self.pending.len() && !eof {
            // The newline may still be in flight
            return Scan::Pending;
        }
        let end = if self.pending.get(frame_end) == Some(&b'\n') {
            frame_end + 1
        } else {
            frame_end
        };
        Scan::Found {
            start,
            payload,
            end,
        }
    }

    fn scan_sentinel(&self, eof: bool) -> Scan {
        let buf = &self.pending;
        let Some(start) = find(buf, START_SENTINEL) else {
            return self.no_marker(eof);
        };

        let payload_start = start + START_SENTINEL.len();
        let Some(rel_end) = find(&buf[payload_start..], END_SENTINEL) else {
            if eof || buf.len() - start > self.lookahead {
                tracing::warn!(
                    "{}",
                    AppError::Protocol("Unterminated sidecar, treating as text".to_string())
                );
                return Scan::Absent;
            }
            return Scan::Pending;
        };

        let payload_end = payload_start + rel_end;
        self.close_frame(
            start,
            payload_start..payload_end,
            payload_end + END_SENTINEL.len(),
            eof,
        )
    }

    fn scan_length_prefixed(&self, eof: bool) -> Scan {
        let buf = &self.pending;
        let Some(start) = find(buf, LENGTH_PREFIX_MARKER) else {
            return self.no_marker(eof);
        };

        let len_start = start + LENGTH_PREFIX_MARKER.len();
        let Some(len_bytes) = buf.get(len_start..len_start + 4) else {
            return if eof { Scan::Absent } else { Scan::Pending };
        };
        let len = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
            as usize;

        if len > self.lookahead {
            tracing::warn!(
                "{}",
                AppError::Protocol(format!(
                    "Sidecar length {} exceeds lookahead {}, treating as text",
                    len, self.lookahead
                ))
            );
            return Scan::Absent;
        }

        let payload_start = len_start + 4;
        let payload_end = payload_start + len;
        if buf.len() < payload_end {
            if eof {
                tracing::warn!(
                    "{}",
                    AppError::Protocol("Truncated sidecar, treating as text".to_string())
                );
                return Scan::Absent;
            }
            return Scan::Pending;
        }

        self.close_frame(start, payload_start..payload_end, payload_end, eof)
    }

    fn emit_text(&mut self, bytes: &[u8], events: &mut Vec<DecodeEvent>) {
        let text = decode_utf8(&mut self.carry, bytes);
        if !text.is_empty() {
            events.push(DecodeEvent::Text(text));
        }
    }
}

/// Decode as much of `carry + bytes` as possible, keeping an incomplete
/// trailing sequence in `carry`. Invalid bytes become U+FFFD.
fn decode_utf8(carry: &mut Vec<u8>, bytes: &[u8]) -> String {
    carry.extend_from_slice(bytes);
    let data = std::mem::take(carry);

    let mut out = String::with_capacity(data.len());
    let mut input = &data[..];
    loop {
        match std::str::from_utf8(input) {
            Ok(s) => {
                out.push_str(s);
                break;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                if let Ok(s) = std::str::from_utf8(&input[..valid]) {
                    out.push_str(s);
                }
                match e.error_len() {
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        input = &input[valid + bad..];
                    }
                    None => {
                        carry.extend_from_slice(&input[valid..]);
                        break;
                    }
                }
            }
        }
    }
    out
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

struct DecodeState<S> {
    inner: Pin<Box<S>>,
    decoder: SidecarDecoder,
    ready: VecDeque<DecodeEvent>,
    finished: bool,
}

/// Decode a stream of byte fragments into sidecar and text events.
pub fn decode_stream<S, B>(fragments: S, framing: Framing) -> impl Stream<Item = DecodeEvent> + Send
where
    S: Stream<Item = B> + Send + 'static,
    B: AsRef<[u8]> + Send,
{
    let state = DecodeState {
        inner: Box::pin(fragments),
        decoder: SidecarDecoder::new(framing),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((event, state));
            }
            if state.finished {
                return None;
            }
            match state.inner.next().await {
                Some(fragment) => {
                    let events = state.decoder.push(fragment.as_ref());
                    state.ready.extend(events);
                }
                None => {
                    state.finished = true;
                    let events = state.decoder.finish();
                    state.ready.extend(events);
                }
            }
        }
    })
}
