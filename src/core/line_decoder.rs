//! Incremental line decoding for chunked response bodies.
//!
//! Bytes are held in a rolling tail until a `\n` arrives and only complete
//! lines are decoded. A code point or a line fragment split across chunk
//! boundaries therefore decodes exactly as if the whole body had arrived in a
//! single chunk.

use std::collections::VecDeque;

use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use memchr::memchr;
use tracing::warn;

use crate::core::constants::MAX_LINE_BYTES;
use crate::core::stream_error::StreamError;

#[derive(Debug)]
pub struct LineDecoder {
    tail: Vec<u8>,
    max_line_bytes: usize,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::with_max_line_bytes(MAX_LINE_BYTES)
    }

    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            tail: Vec::new(),
            max_line_bytes,
        }
    }

    /// Append a chunk and return every line it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.tail.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = memchr(b'\n', &self.tail[start..]) {
            let end = start + offset;
            lines.push(decode_line(&self.tail[start..end]));
            start = end + 1;
        }
        self.tail.drain(..start);
        lines
    }

    /// Fails once the undelimited tail is larger than the configured limit.
    pub fn check_tail(&self) -> Result<(), StreamError> {
        if self.tail.len() > self.max_line_bytes {
            return Err(StreamError::LineTooLong {
                limit: self.max_line_bytes,
            });
        }
        Ok(())
    }

    /// Flush the trailing partial line at end of input.
    pub fn finish(&mut self) -> Option<String> {
        if self.tail.is_empty() {
            return None;
        }
        let tail = std::mem::take(&mut self.tail);
        Some(decode_line(&tail))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    match std::str::from_utf8(raw) {
        Ok(line) => line.to_string(),
        Err(err) => {
            warn!(error = %err, len = raw.len(), "Invalid UTF-8 in stream line; decoding lossily");
            String::from_utf8_lossy(raw).into_owned()
        }
    }
}

struct DecodeState<S> {
    chunks: S,
    decoder: LineDecoder,
    ready: VecDeque<String>,
    failure: Option<StreamError>,
    finished: bool,
}

/// Lazily turn a byte stream into a stream of decoded lines.
///
/// A read failure or an oversized line yields a single `Err` after any lines
/// already completed, then the stream ends.
pub fn decode_lines<S, E>(
    chunks: S,
    max_line_bytes: usize,
) -> impl Stream<Item = Result<String, StreamError>>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<StreamError>,
{
    let state = DecodeState {
        chunks,
        decoder: LineDecoder::with_max_line_bytes(max_line_bytes),
        ready: VecDeque::new(),
        failure: None,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.ready.pop_front() {
                return Some((Ok(line), state));
            }
            if let Some(err) = state.failure.take() {
                return Some((Err(err), state));
            }
            if state.finished {
                return None;
            }

            match state.chunks.next().await {
                Some(Ok(chunk)) => {
                    let lines = state.decoder.push(&chunk);
                    state.ready.extend(lines);
                    if let Err(err) = state.decoder.check_tail() {
                        state.failure = Some(err);
                        state.finished = true;
                    }
                }
                Some(Err(err)) => {
                    state.failure = Some(err.into());
                    state.finished = true;
                }
                None => {
                    state.finished = true;
                    state.ready.extend(state.decoder.finish());
                }
            }
        }
    })
}
