//! Transport error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility; these types carry the context needed to build
//! meaningful log entries.

use thiserror::Error;

/// Errors that can occur while opening or reading a streaming exchange.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// TCP/HTTP connection to the dispatch endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The endpoint did not answer within the configured timeout.
    #[error("transport timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Non-2xx HTTP response from the dispatch endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// Byte-stream read failure after the exchange was open.
    #[error("stream error: {reason}")]
    StreamError { reason: String },

    /// Too many frames failed to parse.
    #[error("too many unparseable frames ({count})")]
    TooManyParseErrors { count: u32 },

    /// The exchange was closed locally.
    #[error("exchange closed")]
    Closed,
}

impl TransportError {
    /// Whether retrying the same turn could reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionFailed { .. }
                | TransportError::Timeout { .. }
                | TransportError::StreamError { .. }
                | TransportError::HttpError { status: 408 | 429, .. }
                | TransportError::HttpError { status: 500..=599, .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(TransportError::ConnectionFailed {
            endpoint: "".into(),
            reason: "".into()
        }
        .is_retryable());
        assert!(TransportError::Timeout { duration_ms: 5 }.is_retryable());
        assert!(TransportError::HttpError {
            status: 503,
            body: "".into()
        }
        .is_retryable());
        assert!(TransportError::HttpError {
            status: 429,
            body: "".into()
        }
        .is_retryable());
        assert!(!TransportError::HttpError {
            status: 400,
            body: "".into()
        }
        .is_retryable());
        assert!(!TransportError::TooManyParseErrors { count: 6 }.is_retryable());
        assert!(!TransportError::Closed.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = TransportError::HttpError {
            status: 502,
            body: "bad gateway".into(),
        };
        assert_eq!(err.to_string(), "HTTP 502: bad gateway");
    }
}
