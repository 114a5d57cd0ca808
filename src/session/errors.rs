//! Session error types.

use thiserror::Error;

use crate::transport::errors::TransportError;

/// Errors returned to callers of the session API.
///
/// These are admission errors only; anything that goes wrong after a turn
/// is accepted ends up in the transcript instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// A turn is already awaiting or streaming a response.
    #[error("session '{session_id}' already has a turn in flight")]
    TurnInFlight { session_id: String },

    /// Nothing to send.
    #[error("turn has no content and no attachments")]
    EmptyTurn,

    /// The session actor has shut down.
    #[error("session '{session_id}' is closed")]
    SessionClosed { session_id: String },

    /// No live session with this id.
    #[error("session not found: '{session_id}'")]
    SessionNotFound { session_id: String },
}

/// Why a turn ended without completing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TurnError {
    /// The exchange could not be opened.
    #[error("could not reach the agent service: {reason}")]
    TransportOpenFailure { reason: String, retryable: bool },

    /// The exchange broke after it was open (including idle-frame timeouts
    /// and too many unparseable frames).
    #[error("response interrupted: {reason}")]
    MidStreamTransportError { reason: String, retryable: bool },

    /// No first frame within the response timeout.
    #[error("no response within {secs}s")]
    ResponseTimeout { secs: u64 },

    /// The endpoint sent an error frame.
    #[error("agent service error: {message}")]
    Remote { message: String, retryable: bool },
}

impl TurnError {
    pub fn open_failure(err: &TransportError) -> Self {
        TurnError::TransportOpenFailure {
            reason: err.to_string(),
            retryable: err.is_retryable(),
        }
    }

    pub fn mid_stream(err: &TransportError) -> Self {
        TurnError::MidStreamTransportError {
            reason: err.to_string(),
            retryable: err.is_retryable(),
        }
    }

    pub fn idle_timeout(secs: u64) -> Self {
        TurnError::MidStreamTransportError {
            reason: format!("no frame received for {secs}s"),
            retryable: true,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            TurnError::TransportOpenFailure { retryable, .. }
            | TurnError::MidStreamTransportError { retryable, .. }
            | TurnError::Remote { retryable, .. } => *retryable,
            TurnError::ResponseTimeout { .. } => true,
        }
    }

    /// Text shown to the user where the response stopped.
    pub fn interruption_notice(&self) -> String {
        if self.is_retryable() {
            format!("{self}. You can retry this message.")
        } else {
            self.to_string()
        }
    }
}
