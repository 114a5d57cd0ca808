//! Synthetic fallback responder.
//!
//! Produces a canned response when the real backend cannot be reached. Only
//! used when `session.fallback_policy` is `synthetic`; production deployments
//! leave it disabled and surface the failure instead.

use async_trait::async_trait;

use super::errors::TransportError;
use super::exchange::{Exchange, StreamingTransport};
use super::types::{CompletionPayload, DispatchRequest, ExchangeEvent, Frame};
use crate::routing::types::DispatchTarget;

/// Agent name attributed to synthetic responses.
pub const SYNTHETIC_AGENT: &str = "turnrelay-fallback";

/// Transport that always answers with a static explanatory message.
#[derive(Debug, Clone, Default)]
pub struct SyntheticResponder;

impl SyntheticResponder {
    pub fn new() -> Self {
        Self
    }

    /// The canned message for a target that could not be reached.
    pub fn message_for(target: &DispatchTarget) -> String {
        format!(
            "The agent service at {} is not reachable right now. \
             This is a placeholder response; retry once the service is back.",
            target.url
        )
    }
}

#[async_trait]
impl StreamingTransport for SyntheticResponder {
    async fn open(
        &self,
        target: &DispatchTarget,
        request: DispatchRequest,
    ) -> Result<Exchange, TransportError> {
        let content = Self::message_for(target);
        tracing::warn!(
            session_id = %request.session_id,
            url = %target.url,
            "serving synthetic fallback response"
        );
        Ok(Exchange::from_events(vec![
            ExchangeEvent::Frame(Frame::delta(SYNTHETIC_AGENT, &content)),
            ExchangeEvent::Frame(Frame::Completion(CompletionPayload {
                agent: Some(SYNTHETIC_AGENT.to_string()),
                content,
                ..Default::default()
            })),
            ExchangeEvent::Completed,
        ]))
    }
}
