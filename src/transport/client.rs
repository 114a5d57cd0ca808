//! HTTP streaming transport.
//!
//! Posts the dispatch request to the resolved target and streams back SSE
//! frames. The response body is dropped as soon as the exchange is closed or
//! superseded.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::errors::TransportError;
use super::exchange::{Exchange, ExchangeTracker, StreamingTransport};
use super::sse::frame_stream;
use super::types::DispatchRequest;
use crate::config::TransportConfig;
use crate::routing::types::DispatchTarget;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Ceiling on how much of an error body is kept for diagnostics.
const MAX_ERROR_BODY_BYTES: usize = 2_048;

// ─── HttpStreamTransport ─────────────────────────────────────────────────────

/// Streaming transport over chunked HTTP responses carrying SSE frames.
pub struct HttpStreamTransport {
    http: HttpClient,
    connect_timeout: Duration,
    max_parse_errors: u32,
    tracker: ExchangeTracker,
}

impl HttpStreamTransport {
    /// Build the transport.
    ///
    /// No overall request timeout is set on the client: a streaming body may
    /// legitimately run long. Response and idle-frame timeouts are enforced
    /// per turn by the session actor.
    pub fn from_config(config: &TransportConfig) -> Result<Self, TransportError> {
        let http = HttpClient::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| TransportError::ConnectionFailed {
                endpoint: String::new(),
                reason: format!("failed to build streaming HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            connect_timeout: config.connect_timeout(),
            max_parse_errors: config.max_parse_errors,
            tracker: ExchangeTracker::new(),
        })
    }

    /// Number of sessions with an exchange currently open.
    pub fn active_exchanges(&self) -> usize {
        self.tracker.active()
    }
}

#[async_trait]
impl StreamingTransport for HttpStreamTransport {
    async fn open(
        &self,
        target: &DispatchTarget,
        request: DispatchRequest,
    ) -> Result<Exchange, TransportError> {
        let cancel = self.tracker.begin(&request.session_id);
        let url = target.url.clone();

        // Log the request metadata (not the full body)
        tracing::info!(
            url = %url,
            session_id = %request.session_id,
            source = target.source.as_str(),
            parts = request.message.parts.len(),
            tools = request.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            "opening exchange"
        );

        let send = self
            .http
            .post(&url)
            .json(&request)
            .header("Accept", "text/event-stream")
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Closed),
            result = send => result.map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout {
                        duration_ms: self.connect_timeout.as_millis() as u64,
                    }
                } else {
                    TransportError::ConnectionFailed {
                        endpoint: url.clone(),
                        reason: e.to_string(),
                    }
                }
            })?,
        };

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY_BYTES {
                let mut cut = MAX_ERROR_BODY_BYTES;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(TransportError::HttpError {
                status: status.as_u16(),
                body,
            });
        }

        let events = frame_stream(Box::pin(response.bytes_stream()), self.max_parse_errors);
        Ok(Exchange::new(events, cancel))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
