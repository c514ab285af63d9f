//! Output accumulators.
//!
//! Process output arrives in arbitrary chunks.  The bridge collects them for
//! one flush window and sends the lot as a single WebSocket message.  Two
//! disciplines exist:
//!
//! - [`BinaryBuffer`] keeps the chunks and their total length and
//!   concatenates them on flush.
//! - [`TextBuffer`] decodes UTF-8 as it goes.  A multi-byte character split
//!   across two chunks of the same pipe is held back until its remaining
//!   bytes arrive, so a flush never cuts one in half.  Invalid sequences
//!   become U+FFFD.

use crate::domain::config::BufferMode;
use crate::domain::messages::OutboundFrame;

// ── Binary ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct BinaryBuffer {
    chunks: Vec<Vec<u8>>,
    len: usize,
}

impl BinaryBuffer {
    pub fn push(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.chunks.push(chunk.to_vec());
    }

    /// The concatenated chunks, or `None` when nothing is buffered.
    pub fn take(&mut self) -> Option<Vec<u8>> {
        if self.len == 0 {
            return None;
        }
        let mut out = Vec::with_capacity(self.len);
        for chunk in self.chunks.drain(..) {
            out.extend_from_slice(&chunk);
        }
        self.len = 0;
        Some(out)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// ── Text ──────────────────────────────────────────────────────────────────────

/// Which pipe of the process a chunk was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    fn index(self) -> usize {
        match self {
            Self::Stdout => 0,
            Self::Stderr => 1,
        }
    }
}

/// Decoded text shared by both pipes.  Each pipe keeps its own incomplete
/// trailing character, so a character split on stdout is never joined with
/// bytes from stderr.
#[derive(Debug, Default)]
pub struct TextBuffer {
    text: String,
    /// Leading bytes of a character whose remaining bytes have not arrived,
    /// per [`OutputStream`].
    partial: [Vec<u8>; 2],
}

impl TextBuffer {
    pub fn push(&mut self, stream: OutputStream, chunk: &[u8]) {
        let mut input = std::mem::take(&mut self.partial[stream.index()]);
        input.extend_from_slice(chunk);

        let mut rest: &[u8] = &input;
        while !rest.is_empty() {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    rest = &[];
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    self.text.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(bad) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        self.partial[stream.index()] = rest.to_vec();
    }

    /// The decoded text, or `None` when no complete character is buffered.
    /// An incomplete trailing character stays buffered.
    pub fn take(&mut self) -> Option<String> {
        if self.text.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.text))
        }
    }

    /// Like [`TextBuffer::take`], but dangling partial characters are
    /// flushed as U+FFFD, stdout first.  Used once the process has exited.
    pub fn finish(&mut self) -> Option<String> {
        for partial in &mut self.partial {
            if !partial.is_empty() {
                self.text.push_str(&String::from_utf8_lossy(partial));
                partial.clear();
            }
        }
        self.take()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.partial.iter().all(Vec::is_empty)
    }
}

// ── Either ────────────────────────────────────────────────────────────────────

/// The accumulator selected by [`BufferMode`].
#[derive(Debug)]
pub enum OutputBuffer {
    Text(TextBuffer),
    Binary(BinaryBuffer),
}

impl OutputBuffer {
    pub fn new(mode: BufferMode) -> Self {
        match mode {
            BufferMode::Text => Self::Text(TextBuffer::default()),
            BufferMode::Binary => Self::Binary(BinaryBuffer::default()),
        }
    }

    pub fn push(&mut self, stream: OutputStream, chunk: &[u8]) {
        match self {
            Self::Text(buf) => buf.push(stream, chunk),
            Self::Binary(buf) => buf.push(chunk),
        }
    }

    /// Everything buffered so far as one frame.
    pub fn take(&mut self) -> Option<OutboundFrame> {
        match self {
            Self::Text(buf) => buf.take().map(OutboundFrame::Text),
            Self::Binary(buf) => buf.take().map(OutboundFrame::Binary),
        }
    }

    /// Final flush, including any incomplete trailing character.
    pub fn finish(&mut self) -> Option<OutboundFrame> {
        match self {
            Self::Text(buf) => buf.finish().map(OutboundFrame::Text),
            Self::Binary(buf) => buf.take().map(OutboundFrame::Binary),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(buf) => buf.is_empty(),
            Self::Binary(buf) => buf.is_empty(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
