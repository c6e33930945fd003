//! Server-sent event framing.
//!
//! Providers stream `data: {json}` lines terminated by a blank line, and
//! OpenAI-style APIs end with a `data: [DONE]` sentinel. Malformed payloads
//! are logged and skipped.

use futures::{Stream, StreamExt};
use serde_json::Value;

use parley_core::error::Result;

use crate::http::transport_error;

/// One parsed line of an SSE body
#[derive(Debug, PartialEq)]
pub enum SseFrame {
    /// JSON payload of a `data:` line
    Data(Value),
    /// `[DONE]` sentinel
    Done,
    /// Blank line, comment, other field, or unparseable payload
    Skip,
}

/// Parse a single line (without its trailing newline).
pub fn parse_line(line: &str) -> SseFrame {
    let line = line.trim_end_matches('\r');
    let Some(data) = line.strip_prefix("data:") else {
        return SseFrame::Skip;
    };

    let data = data.trim();
    if data.is_empty() {
        return SseFrame::Skip;
    }
    if data == "[DONE]" {
        return SseFrame::Done;
    }

    match serde_json::from_str(data) {
        Ok(value) => SseFrame::Data(value),
        Err(e) => {
            tracing::warn!(error = %e, "skipping malformed SSE frame");
            SseFrame::Skip
        }
    }
}

/// Splits a byte stream into complete lines.
///
/// Bytes are buffered until a newline arrives, so multi-byte characters
/// split across chunks stay intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every complete line.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        lines
    }

    /// Whatever is left once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// JSON payloads of a streaming response, ending at `[DONE]` or end of body.
///
/// The response is owned by the stream: dropping it closes the connection.
pub fn data_frames(
    provider: String,
    response: reqwest::Response,
) -> impl Stream<Item = Result<Value>> + Send {
    async_stream::try_stream! {
        let mut body = response.bytes_stream();
        let mut buffer = LineBuffer::new();

        'body: while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| transport_error(&provider, &e))?;
            for line in buffer.push(&chunk) {
                match parse_line(&line) {
                    SseFrame::Data(value) => yield value,
                    SseFrame::Done => break 'body,
                    SseFrame::Skip => {}
                }
            }
        }

        if let Some(line) = buffer.finish() {
            if let SseFrame::Data(value) = parse_line(&line) {
                yield value;
            }
        }
    }
}
