//! Paragraph- and sentence-aware text chunking.
//!
//! Posts are split on newlines into paragraphs, and paragraphs are packed
//! into chunks of at most `max_len` characters. A paragraph that is too long
//! on its own is broken into sentences, which are packed the same way. A
//! single sentence longer than `max_len` is kept whole.

/// Default maximum chunk length, in characters.
pub const DEFAULT_CHUNK_MAX_LENGTH: usize = 1000;

/// Default minimum useful chunk length, in characters.
pub const DEFAULT_MIN_CHUNK_LENGTH: usize = 50;

/// Split `text` into chunks of at most `max_len` characters.
///
/// Lengths are counted in Unicode scalar values. Paragraphs inside a chunk
/// are joined by `\n`, sentences by a single space.
pub fn chunk_text(text: &str, max_len: usize) -> Vec<String> {
    let mut packer = Packer::new(max_len);

    for paragraph in text.split('\n').map(str::trim).filter(|p| !p.is_empty()) {
        if char_len(paragraph) > max_len {
            for sentence in split_sentences(paragraph) {
                packer.push(sentence, " ");
            }
        } else {
            packer.push(paragraph, "\n");
        }
    }

    packer.finish()
}

/// Drop chunks shorter than `min_len` characters.
pub fn filter_short(chunks: Vec<String>, min_len: usize) -> Vec<String> {
    chunks.into_iter().filter(|c| !is_short(c, min_len)).collect()
}

/// Whether a chunk is too short to be worth embedding.
pub fn is_short(chunk: &str, min_len: usize) -> bool {
    char_len(chunk) < min_len
}

/// Split a paragraph into sentences.
///
/// A sentence ends after a run of `.`, `!` or `?` that is followed by
/// whitespace or the end of the text, so "3.5" and "e.g." mid-word do not
/// split. Text after the last terminator is its own sentence. Returned
/// sentences are trimmed and never empty.
pub fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = paragraph.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if !is_terminator(c) {
            continue;
        }
        while let Some(&(_, next)) = chars.peek() {
            if is_terminator(next) {
                chars.next();
            } else {
                break;
            }
        }
        match chars.peek() {
            None => {
                sentences.push(&paragraph[start..]);
                start = paragraph.len();
            }
            Some(&(idx, next)) if next.is_whitespace() => {
                sentences.push(&paragraph[start..idx]);
                start = idx;
            }
            Some(_) => {}
        }
    }

    if start < paragraph.len() {
        sentences.push(&paragraph[start..]);
    }

    sentences
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Greedy accumulator shared by paragraphs and sentences.
struct Packer {
    max_len: usize,
    chunks: Vec<String>,
    current: String,
    current_len: usize,
}

impl Packer {
    fn new(max_len: usize) -> Self {
        Self {
            max_len,
            chunks: Vec::new(),
            current: String::new(),
            current_len: 0,
        }
    }

    fn push(&mut self, piece: &str, separator: &str) {
        let piece_len = char_len(piece);

        if self.current.is_empty() {
            self.current.push_str(piece);
            self.current_len = piece_len;
            return;
        }

        if self.current_len + separator.len() + piece_len > self.max_len {
            self.flush();
            self.current.push_str(piece);
            self.current_len = piece_len;
        } else {
            self.current.push_str(separator);
            self.current.push_str(piece);
            self.current_len += separator.len() + piece_len;
        }
    }

    fn flush(&mut self) {
        let chunk = self.current.trim();
        if !chunk.is_empty() {
            self.chunks.push(chunk.to_string());
        }
        self.current.clear();
        self.current_len = 0;
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.chunks
    }
}
