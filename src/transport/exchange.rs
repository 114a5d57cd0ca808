//! Exchanges — one cancellable frame sequence per turn.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::errors::TransportError;
use super::types::{DispatchRequest, ExchangeEvent};
use crate::routing::types::DispatchTarget;

/// Opens streaming exchanges against dispatch targets.
#[async_trait]
pub trait StreamingTransport: Send + Sync {
    /// Open one exchange for a turn. Opening a new exchange for a session
    /// supersedes any exchange still in flight for that session.
    async fn open(
        &self,
        target: &DispatchTarget,
        request: DispatchRequest,
    ) -> Result<Exchange, TransportError>;
}

// ─── Exchange ────────────────────────────────────────────────────────────────

/// A single in-flight response.
///
/// Yields frames in arrival order, then exactly one terminal event
/// (`Completed` or `Failed`), then `None`. A locally closed or superseded
/// exchange yields `None` without a terminal event.
pub struct Exchange {
    events: BoxStream<'static, ExchangeEvent>,
    cancel: CancellationToken,
    finished: bool,
}

impl Exchange {
    pub fn new<S>(events: S, cancel: CancellationToken) -> Self
    where
        S: Stream<Item = ExchangeEvent> + Send + 'static,
    {
        Self {
            events: events.boxed(),
            cancel,
            finished: false,
        }
    }

    /// Build an exchange from a fixed event list. Used by the synthetic
    /// responder and by tests.
    pub fn from_events(events: Vec<ExchangeEvent>) -> Self {
        Self::new(futures::stream::iter(events), CancellationToken::new())
    }

    /// Next event, or `None` once the exchange is finished or closed.
    pub async fn next(&mut self) -> Option<ExchangeEvent> {
        if self.finished {
            return None;
        }

        let event = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.finished = true;
                return None;
            }
            event = self.events.next() => event,
        };

        match event {
            Some(event) => {
                if event.is_terminal() {
                    self.finished = true;
                }
                Some(event)
            }
            None => {
                // The underlying stream ended without a terminal event.
                self.finished = true;
                Some(ExchangeEvent::Failed(TransportError::StreamError {
                    reason: "stream ended without a terminal event".into(),
                }))
            }
        }
    }

    /// Close the exchange. Closing twice is a no-op.
    pub fn close(&mut self) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
        }
        self.finished = true;
    }

    pub fn is_closed(&self) -> bool {
        self.finished || self.cancel.is_cancelled()
    }

    /// Token that closes this exchange when cancelled.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("finished", &self.finished)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

// ─── ExchangeTracker ─────────────────────────────────────────────────────────

/// Tracks the in-flight exchange per session so a new exchange supersedes
/// the previous one.
#[derive(Debug, Default)]
pub struct ExchangeTracker {
    inflight: Mutex<HashMap<String, CancellationToken>>,
}

impl ExchangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new exchange for `session_id`, closing any prior one.
    pub fn begin(&self, session_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        inflight.retain(|_, t| !t.is_cancelled());
        if let Some(previous) = inflight.insert(session_id.to_string(), token.clone()) {
            if !previous.is_cancelled() {
                tracing::info!(session_id, "superseding in-flight exchange");
                previous.cancel();
            }
        }
        token
    }

    /// Number of sessions with an exchange still open.
    pub fn active(&self) -> usize {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|t| !t.is_cancelled())
            .count()
    }
}
