//! Streaming transport — one exchange per turn against a dispatch target.
//!
//! This module handles:
//! - Building the dispatch request for a user turn
//! - Opening a streaming HTTP exchange and decoding SSE frames
//! - Guaranteeing a single terminal event per exchange
//! - Superseding an in-flight exchange when a session opens a new one
//! - An optional synthetic responder for when the backend is unreachable
//!
//! Transport mechanics stay inside this module; callers only see `Exchange`
//! and `ExchangeEvent`.

pub mod client;
pub mod errors;
pub mod exchange;
pub mod sse;
pub mod synthetic;
pub mod types;

// Re-exports for convenience
pub use client::HttpStreamTransport;
pub use errors::TransportError;
pub use exchange::{Exchange, ExchangeTracker, StreamingTransport};
pub use synthetic::SyntheticResponder;
pub use types::{
    CompletionPayload, DispatchRequest, ExchangeEvent, Frame, InterAgentRecord, MessagePart,
};
