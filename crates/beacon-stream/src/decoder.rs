//! SSE line decoding.
//!
//! Handles:
//! - Line buffering from chunked responses
//! - `data: ` prefix extraction
//! - `[DONE]` marker detection
//! - Remaining buffer processing at end of stream
//!
//! The decoder is push-based so the same byte sequence produces the same
//! frame sequence no matter how it is chunked. The final, possibly
//! incomplete line stays in the buffer until the next chunk (or
//! [`SseDecoder::finish`]) completes it.

use beacon_core::StreamEvent;
use bytes::BytesMut;
use tracing::warn;

/// One decoded SSE frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SseFrame {
    /// A `data:` payload to be parsed as a stream event.
    Data(String),
    /// The literal `[DONE]` end-of-stream marker.
    Done,
}

/// Incremental SSE decoder over a rolling byte buffer.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
}

impl SseDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Feed one chunk and collect every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            // Zero-copy split; drop the trailing \n (and \r for CRLF input).
            let mut line_bytes = self.buffer.split_to(newline_pos + 1);
            line_bytes.truncate(line_bytes.len() - 1);
            if line_bytes.last() == Some(&b'\r') {
                line_bytes.truncate(line_bytes.len() - 1);
            }

            let Ok(line) = std::str::from_utf8(&line_bytes) else {
                warn!("skipping non-UTF-8 stream line");
                continue;
            };
            if let Some(frame) = decode_line(line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Drain whatever the buffer still holds once the byte stream ends.
    ///
    /// A server may omit the final newline; the retained partial line is
    /// decoded as if it were complete.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if self.buffer.is_empty() {
            return None;
        }
        let remainder = self.buffer.split();
        let line = std::str::from_utf8(&remainder).ok()?;
        decode_line(line.trim())
    }
}

/// Decode one complete line.
///
/// Blank lines, `:` comments, and non-`data:` fields produce nothing.
fn decode_line(line: &str) -> Option<SseFrame> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }

    let data = trimmed
        .strip_prefix("data: ")
        .or_else(|| trimmed.strip_prefix("data:"))?
        .trim();

    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(SseFrame::Done);
    }
    Some(SseFrame::Data(data.to_owned()))
}

/// Parse a `data:` payload into a [`StreamEvent`].
///
/// Malformed payloads are logged and skipped; they never kill the
/// connection.
#[must_use]
pub fn parse_stream_event(data: &str) -> Option<StreamEvent> {
    match serde_json::from_str(data) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, preview = preview(data), "skipping malformed stream payload");
            None
        }
    }
}

fn preview(data: &str) -> &str {
    let mut end = data.len().min(100);
    while !data.is_char_boundary(end) {
        end -= 1;
    }
    &data[..end]
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
