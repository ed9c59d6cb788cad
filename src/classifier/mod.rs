//! Output classification of the agent's stdout stream.
//!
//! [`OutputClassifier`] buffers raw bytes, frames them into complete lines
//! with [`codec::LineCodec`], and runs each line through the
//! [`machine::step`] transition table. A partial trailing line is never
//! dispatched; it stays buffered and is completed by the next chunk, so the
//! emitted event sequence does not depend on how the stream was split.

pub mod codec;
pub mod machine;

use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

use crate::config::MarkerConfig;
use crate::models::event::{ParseEvent, ParserState};
use crate::AppError;

use self::codec::{LineCodec, MAX_LINE_BYTES};

/// Stateful classifier bound to exactly one session.
#[derive(Debug)]
pub struct OutputClassifier {
    markers: MarkerConfig,
    codec: LineCodec,
    buffer: BytesMut,
    state: ParserState,
    max_line: usize,
}

impl OutputClassifier {
    /// Create a classifier in `Idle` with an empty buffer.
    #[must_use]
    pub fn new(markers: MarkerConfig) -> Self {
        Self::with_max_line(markers, MAX_LINE_BYTES)
    }

    /// Create a classifier with a custom per-line limit.
    #[must_use]
    pub fn with_max_line(markers: MarkerConfig, max_line: usize) -> Self {
        Self {
            markers,
            codec: LineCodec::with_max_length(max_line),
            buffer: BytesMut::new(),
            state: ParserState::Idle,
            max_line,
        }
    }

    /// Current state of the transition table.
    #[must_use]
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Bytes held back waiting for a line terminator.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Feed a chunk of raw output and collect the events for every line it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ParseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(line)) => self.dispatch(&line, &mut events),
                Ok(None) => break,
                // The codec has already dropped the offending line (or is
                // skipping to the end of an over-long one); later lines survive.
                Err(err) => events.push(self.fail(&err)),
            }
        }

        events
    }

    /// Flush a trailing unterminated line at end of stream.
    pub fn finish(&mut self) -> Vec<ParseEvent> {
        let mut events = Vec::new();

        loop {
            match self.codec.decode_eof(&mut self.buffer) {
                Ok(Some(line)) => self.dispatch(&line, &mut events),
                Ok(None) => break,
                Err(err) => events.push(self.fail(&err)),
            }
        }

        events
    }

    /// Return to `Idle` and drop any buffered bytes.
    pub fn reset(&mut self) {
        if !self.buffer.is_empty() || self.state != ParserState::Idle {
            debug!(
                state = ?self.state,
                dropped_bytes = self.buffer.len(),
                "classifier reset"
            );
        }
        self.buffer.clear();
        self.codec = LineCodec::with_max_length(self.max_line);
        self.state = ParserState::Idle;
    }

    fn dispatch(&mut self, line: &str, events: &mut Vec<ParseEvent>) {
        let step = machine::step(self.state, line, &self.markers);
        self.state = step.next;
        events.extend(step.events);
    }

    /// Drop back to `Idle` after an undecodable line; buffered bytes are kept.
    fn fail(&mut self, err: &AppError) -> ParseEvent {
        warn!(error = %err, state = ?self.state, "undecodable agent output, returning to idle");
        self.state = ParserState::Idle;
        let reason = match err {
            AppError::Parse(msg) => msg.clone(),
            other => other.to_string(),
        };
        ParseEvent::ParseError(reason)
    }
}
