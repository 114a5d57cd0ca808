//! Sessions — turn lifecycle and transcript assembly.
//!
//! This module handles:
//! - The per-session state machine (`TurnSession`)
//! - Turning streamed frames into a structured transcript
//! - Tracing inter-agent communication
//! - Running one actor per live session (`SessionManager`, `SessionHandle`)
//!
//! Failures after a turn is accepted never surface as `Err`; they end the
//! turn with an annotated transcript and the `Error` state.

pub mod errors;
pub mod interpreter;
pub mod manager;
pub mod tracer;
pub mod turn;
pub mod types;

// Re-exports for convenience
pub use errors::{SessionError, TurnError};
pub use interpreter::FrameInterpreter;
pub use manager::{SessionHandle, SessionManager};
pub use tracer::CommunicationTracer;
pub use turn::{FrameOutcome, TurnSession};
pub use types::{
    AgentCommunication, Attachment, ChatMessage, ChatSession, Citation, MessageAnnotation,
    MessageRole, Scratchpad, SessionState, ToolCall, ToolCallStatus, TurnTicket,
};
