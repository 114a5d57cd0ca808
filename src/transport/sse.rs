//! SSE frame decoder for dispatch endpoint responses.
//!
//! Reads a byte stream, splits on SSE boundaries (`data: …\n\n`), parses each
//! event as a JSON [`Frame`], and turns the whole thing into an
//! [`ExchangeEvent`] stream that ends with exactly one terminal event.

use std::collections::VecDeque;
use std::fmt::Display;

use futures::stream::{self, Stream, StreamExt};

use super::errors::TransportError;
use super::types::{ExchangeEvent, Frame};

// ─── SSE decoder ─────────────────────────────────────────────────────────────

/// One decoded SSE event.
#[derive(Debug, Clone, PartialEq)]
pub enum SseItem {
    Frame(Frame),
    /// The `[DONE]` sentinel.
    Done,
    /// An event whose data could not be parsed as a frame.
    Malformed(String),
}

/// Incremental SSE decoder. Buffers bytes so multi-byte characters and events
/// split across chunks are reassembled correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every complete event it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseItem> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut items = Vec::new();
        while let Some(end) = find_boundary(&self.buffer) {
            let event: Vec<u8> = self.buffer.drain(..end + 2).take(end).collect();
            if let Some(item) = parse_event(&String::from_utf8_lossy(&event)) {
                items.push(item);
            }
        }
        items
    }

    /// Flush whatever is left once the byte stream has ended.
    pub fn finish(&mut self) -> Option<SseItem> {
        let rest = std::mem::take(&mut self.buffer);
        let text = String::from_utf8_lossy(&rest);
        if text.trim().is_empty() {
            return None;
        }
        parse_event(text.trim())
    }
}

fn find_boundary(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

/// Parse one SSE event (may contain multiple `data:` lines).
///
/// Returns `None` for keep-alives, comments and events without data.
fn parse_event(event: &str) -> Option<SseItem> {
    let mut data = String::new();

    for line in event.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            if rest.trim() == "[DONE]" {
                return Some(SseItem::Done);
            }
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest);
        }
        // Ignore non-data lines (comments, event names, ids, retry hints)
    }

    if data.trim().is_empty() {
        return None;
    }

    match serde_json::from_str::<Frame>(&data) {
        Ok(frame) => Some(SseItem::Frame(frame)),
        Err(e) => Some(SseItem::Malformed(format!("{e} (data: {data})"))),
    }
}

// ─── Exchange event stream ───────────────────────────────────────────────────

struct FrameStreamState<S> {
    bytes: S,
    decoder: SseDecoder,
    pending: VecDeque<ExchangeEvent>,
    parse_errors: u32,
    max_parse_errors: u32,
    /// A terminal event has been queued; nothing else may be queued after it.
    terminal_queued: bool,
    /// The terminal event has been yielded.
    finished: bool,
}

impl<S> FrameStreamState<S> {
    fn absorb(&mut self, item: SseItem) {
        if self.terminal_queued {
            return;
        }
        match item {
            SseItem::Frame(frame) => self.pending.push_back(ExchangeEvent::Frame(frame)),
            SseItem::Done => self.terminate(ExchangeEvent::Completed),
            SseItem::Malformed(reason) => {
                self.parse_errors += 1;
                tracing::warn!(
                    parse_errors = self.parse_errors,
                    max = self.max_parse_errors,
                    reason = %reason,
                    "dropping unparseable frame"
                );
                if self.parse_errors > self.max_parse_errors {
                    self.terminate(ExchangeEvent::Failed(TransportError::TooManyParseErrors {
                        count: self.parse_errors,
                    }));
                }
            }
        }
    }

    fn terminate(&mut self, event: ExchangeEvent) {
        if !self.terminal_queued {
            self.terminal_queued = true;
            self.pending.push_back(event);
        }
    }
}

/// Turn a raw byte stream into exchange events.
///
/// The resulting stream yields frames in arrival order followed by exactly
/// one `Completed` or `Failed`, then ends. A body that ends without `[DONE]`
/// counts as completed; a read error mid-body is `Failed(StreamError)`.
pub fn frame_stream<S, B, E>(bytes: S, max_parse_errors: u32) -> impl Stream<Item = ExchangeEvent>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    let state = FrameStreamState {
        bytes,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        parse_errors: 0,
        max_parse_errors,
        terminal_queued: false,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }

            if let Some(event) = state.pending.pop_front() {
                if event.is_terminal() {
                    state.finished = true;
                }
                return Some((event, state));
            }

            // Need more data from the stream
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for item in state.decoder.push(chunk.as_ref()) {
                        state.absorb(item);
                    }
                }
                Some(Err(e)) => {
                    state.terminate(ExchangeEvent::Failed(TransportError::StreamError {
                        reason: format!("stream read error: {e}"),
                    }));
                }
                None => {
                    if let Some(item) = state.decoder.finish() {
                        state.absorb(item);
                    }
                    state.terminate(ExchangeEvent::Completed);
                }
            }
        }
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
