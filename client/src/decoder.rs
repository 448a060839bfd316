//! Newline-delimited `data: <json>` stream decoding.
//!
//! Chunks are appended to one byte buffer; every complete line is scanned for
//! the `data:` prefix and JSON-decoded, and the trailing partial line seeds
//! the next round. Decoding works on whole lines only, so the decoded event
//! sequence does not depend on where the chunk boundaries fall.

use std::collections::VecDeque;
use std::pin::Pin;

use chorus_types::WireEvent;
use futures_util::stream::{self, Stream, StreamExt};

use crate::TransportError;

/// Raw response body as a stream of byte chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransportError>> + Send>>;

#[derive(Debug, Default)]
pub struct EventDecoder {
    buffer: Vec<u8>,
    anomalies: usize,
}

impl EventDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return the events completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<WireEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = self.decode_line(&line[..pos]) {
                events.push(event);
            }
        }
        events
    }

    /// Decode whatever is left once the source has ended. A final line
    /// without a trailing newline is still a complete line.
    pub fn finish(&mut self) -> Option<WireEvent> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.is_empty() {
            return None;
        }
        self.decode_line(&rest)
    }

    /// Lines that were dropped because their payload failed to decode.
    #[must_use]
    pub fn anomalies(&self) -> usize {
        self.anomalies
    }

    fn decode_line(&mut self, line: &[u8]) -> Option<WireEvent> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let Ok(line) = std::str::from_utf8(line) else {
            self.anomalies += 1;
            tracing::warn!(line_bytes = line.len(), "Dropping SSE line with invalid UTF-8");
            return None;
        };

        let data = line.strip_prefix("data:")?;
        let data = data.strip_prefix(' ').unwrap_or(data);
        if data.trim().is_empty() {
            return None;
        }

        match serde_json::from_str::<WireEvent>(data) {
            Ok(event) => Some(event),
            Err(e) => {
                self.anomalies += 1;
                tracing::warn!(%e, payload_bytes = data.len(), "Invalid SSE JSON payload");
                None
            }
        }
    }
}

struct DecodeState {
    source: ByteStream,
    decoder: EventDecoder,
    ready: VecDeque<WireEvent>,
    exhausted: bool,
}

/// Lazily decode a byte source into wire events.
///
/// The sequence ends when the source ends; no synthetic `done` is emitted.
/// A source error is yielded once and ends the sequence.
pub fn decode_stream(
    source: ByteStream,
) -> impl Stream<Item = Result<WireEvent, TransportError>> + Send {
    let state = DecodeState {
        source,
        decoder: EventDecoder::new(),
        ready: VecDeque::new(),
        exhausted: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((Ok(event), state));
            }
            if state.exhausted {
                return None;
            }
            match state.source.next().await {
                Some(Ok(chunk)) => state.ready.extend(state.decoder.push(&chunk)),
                Some(Err(e)) => {
                    state.exhausted = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.exhausted = true;
                    state.ready.extend(state.decoder.finish());
                }
            }
        }
    })
}
