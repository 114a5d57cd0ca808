//! Wire types for dispatch endpoints.
//!
//! Requests go out as one JSON document per turn; responses come back as a
//! sequence of `type`-tagged JSON frames.

use serde::{Deserialize, Serialize};

use super::errors::TransportError;
use crate::routing::types::{EntityRef, RoutingContext};
use crate::session::types::{Attachment, Citation, Scratchpad, ToolCall};

// ─── Request Types ───────────────────────────────────────────────────────────

/// One part of the outgoing user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    File {
        id: String,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
}

impl From<&Attachment> for MessagePart {
    fn from(a: &Attachment) -> Self {
        MessagePart::File {
            id: a.id.clone(),
            name: a.name.clone(),
            mime_type: a.mime_type.clone(),
            url: a.url.clone(),
        }
    }
}

/// The user message carried by a dispatch request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub role: String,
    pub parts: Vec<MessagePart>,
}

/// Request body sent to a dispatch endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub session_id: String,
    pub accepted_output_modes: Vec<String>,
    pub message: OutgoingMessage,
    pub context: RoutingContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<EntityRef>>,
}

impl DispatchRequest {
    /// Build the request for a user turn.
    pub fn for_turn(
        session_id: &str,
        content: &str,
        attachments: &[Attachment],
        context: &RoutingContext,
        tools: &[EntityRef],
        accepted_output_modes: Vec<String>,
    ) -> Self {
        let mut parts = Vec::with_capacity(attachments.len() + 1);
        if !content.is_empty() {
            parts.push(MessagePart::Text {
                text: content.to_string(),
            });
        }
        parts.extend(attachments.iter().map(MessagePart::from));

        Self {
            session_id: session_id.to_string(),
            accepted_output_modes,
            message: OutgoingMessage {
                role: "user".into(),
                parts,
            },
            context: context.clone(),
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.to_vec())
            },
        }
    }
}

// ─── Response Types ──────────────────────────────────────────────────────────

/// Final, authoritative content of an agent message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionPayload {
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub scratchpad: Option<Scratchpad>,
}

/// An inter-agent hop as reported on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterAgentRecord {
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub latency_ms: Option<u64>,
}

/// One discrete unit of streamed data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Partial text from an agent.
    Delta {
        #[serde(default)]
        agent: Option<String>,
        text: String,
    },
    /// Final content for an agent message.
    Completion(CompletionPayload),
    /// An agent invoked another agent.
    InterAgent(InterAgentRecord),
    /// The endpoint reported a failure.
    Error {
        message: String,
        #[serde(default)]
        retryable: bool,
    },
}

impl Frame {
    pub fn delta(agent: &str, text: &str) -> Self {
        Frame::Delta {
            agent: Some(agent.to_string()),
            text: text.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Delta { .. } => "delta",
            Frame::Completion(_) => "completion",
            Frame::InterAgent(_) => "inter_agent",
            Frame::Error { .. } => "error",
        }
    }

    /// Whether this frame carries agent-visible content.
    pub fn is_content(&self) -> bool {
        !matches!(self, Frame::Error { .. })
    }
}

/// What an exchange yields: frames, then exactly one terminal event.
#[derive(Debug)]
pub enum ExchangeEvent {
    Frame(Frame),
    Completed,
    Failed(TransportError),
}

impl ExchangeEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExchangeEvent::Frame(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let attachment = Attachment {
            id: "f1".into(),
            name: "report.pdf".into(),
            mime_type: Some("application/pdf".into()),
            url: None,
        };
        let req = DispatchRequest::for_turn(
            "s1",
            "summarize this",
            &[attachment],
            &RoutingContext::ToolSet { tools: vec![EntityRef::new("search")] },
            &[EntityRef::new("search")],
            vec!["text".into()],
        );
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["sessionId"], "s1");
        assert_eq!(v["acceptedOutputModes"], json!(["text"]));
        assert_eq!(v["message"]["role"], "user");
        assert_eq!(v["message"]["parts"][0], json!({"kind": "text", "text": "summarize this"}));
        assert_eq!(v["message"]["parts"][1]["kind"], "file");
        assert_eq!(v["message"]["parts"][1]["mimeType"], "application/pdf");
        assert_eq!(v["context"]["kind"], "tool_set");
        assert_eq!(v["tools"][0]["id"], "search");
    }

    #[test]
    fn test_request_omits_empty_tools() {
        let req = DispatchRequest::for_turn("s1", "hi", &[], &RoutingContext::None, &[], vec![]);
        let v = serde_json::to_value(&req).unwrap();
        assert!(v.get("tools").is_none());
        assert_eq!(v["context"]["kind"], "none");
    }

    #[test]
    fn test_frames_parse_from_wire() {
        let delta: Frame =
            serde_json::from_value(json!({"type": "delta", "agent": "a", "text": "Hi"})).unwrap();
        assert_eq!(delta, Frame::delta("a", "Hi"));

        let done: Frame = serde_json::from_value(json!({
            "type": "completion",
            "agent": "a",
            "content": "Hi there",
            "citations": [{"source": "kb://1", "relevance": 0.9}],
            "toolCalls": [{"id": "t1", "name": "search", "status": "completed"}]
        }))
        .unwrap();
        match done {
            Frame::Completion(p) => {
                assert_eq!(p.content, "Hi there");
                assert_eq!(p.citations.len(), 1);
                assert_eq!(p.tool_calls[0].name, "search");
            }
            other => panic!("unexpected frame {other:?}"),
        }

        let hop: Frame = serde_json::from_value(json!({
            "type": "inter_agent",
            "source": "router",
            "target": "search",
            "message": "lookup",
            "latencyMs": 12
        }))
        .unwrap();
        assert_eq!(hop.kind(), "inter_agent");

        let err: Frame =
            serde_json::from_value(json!({"type": "error", "message": "boom"})).unwrap();
        assert!(!err.is_content());
    }
}
