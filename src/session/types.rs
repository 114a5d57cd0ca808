//! Shared types for sessions and transcripts.
//!
//! Chat messages, tool calls, citations, inter-agent communication records
//! and the session snapshot consumers observe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::routing::types::RoutingContext;

// ─── Messages ────────────────────────────────────────────────────────────────

/// Who a transcript entry is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Agent,
    System,
    InterAgent,
}

/// An already-uploaded file referenced by a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Lifecycle of a tool invocation reported by an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

/// A tool invocation attached to an agent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub status: ToolCallStatus,
}

/// A cited source backing an agent answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub relevance: Option<f32>,
}

/// Exposed reasoning metadata on a finalized agent message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Scratchpad {
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Why a message was finalized early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageAnnotation {
    /// The stream failed; partial content is kept.
    Interrupted { reason: String },
    /// The user cancelled the turn.
    Cancelled,
}

/// One entry in a session transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    /// Originating agent, for agent and inter-agent entries.
    #[serde(default)]
    pub agent: Option<String>,
    pub streaming: bool,
    pub complete: bool,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub scratchpad: Option<Scratchpad>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub annotation: Option<MessageAnnotation>,
    /// Synthesized summary rather than content from an agent.
    #[serde(default)]
    pub derived: bool,
}

impl ChatMessage {
    fn base(role: MessageRole, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            agent: None,
            streaming: false,
            complete: true,
            attachments: Vec::new(),
            citations: Vec::new(),
            tool_calls: Vec::new(),
            scratchpad: None,
            timestamp: Utc::now(),
            annotation: None,
            derived: false,
        }
    }

    pub fn user(content: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        let mut msg = Self::base(MessageRole::User, content.into());
        msg.attachments = attachments;
        msg
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::base(MessageRole::System, content.into())
    }

    /// A new, still-streaming agent message.
    pub fn streaming_agent(agent: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::base(MessageRole::Agent, content.into());
        msg.agent = Some(agent.into());
        msg.streaming = true;
        msg.complete = false;
        msg
    }

    /// Derived transcript entry summarizing an inter-agent hop.
    pub fn inter_agent(source: &str, target: &str, summary: &str) -> Self {
        let mut msg = Self::base(MessageRole::InterAgent, format!("{source} → {target}: {summary}"));
        msg.agent = Some(source.to_string());
        msg.derived = true;
        msg
    }

    /// Close the message, optionally recording why it ended early.
    pub fn finalize(&mut self, annotation: Option<MessageAnnotation>) {
        self.streaming = false;
        self.complete = true;
        if annotation.is_some() {
            self.annotation = annotation;
        }
    }
}

// ─── Inter-agent communication ──────────────────────────────────────────────

/// An immutable record of one agent invoking another during a turn.
///
/// Fields are only readable; records are created by the communication tracer
/// and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentCommunication {
    correlation_id: String,
    source_agent: String,
    target_agent: String,
    message: String,
    status: String,
    latency_ms: Option<u64>,
    timestamp: DateTime<Utc>,
}

impl AgentCommunication {
    pub(crate) fn new(
        correlation_id: String,
        source_agent: String,
        target_agent: String,
        message: String,
        status: String,
        latency_ms: Option<u64>,
    ) -> Self {
        Self {
            correlation_id,
            source_agent,
            target_agent,
            message,
            status,
            latency_ms,
            timestamp: Utc::now(),
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn source_agent(&self) -> &str {
        &self.source_agent
    }

    pub fn target_agent(&self) -> &str {
        &self.target_agent
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn latency_ms(&self) -> Option<u64> {
        self.latency_ms
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

// ─── Sessions ────────────────────────────────────────────────────────────────

/// Lifecycle state of a session's current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    AwaitingResponse,
    Streaming,
    Error,
}

impl SessionState {
    /// Whether a turn is currently in flight.
    pub fn is_busy(&self) -> bool {
        matches!(self, SessionState::AwaitingResponse | SessionState::Streaming)
    }
}

/// Point-in-time view of a session, as published to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatSession {
    pub id: String,
    pub context: RoutingContext,
    pub messages: Vec<ChatMessage>,
    pub state: SessionState,
    /// Turn generation; frames tagged with an older generation are stale.
    pub generation: u64,
    pub communications: Vec<AgentCommunication>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    /// Messages currently marked as streaming.
    pub fn streaming_messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter().filter(|m| m.streaming)
    }

    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }
}

/// Handle returned when a turn is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnTicket {
    pub session_id: String,
    pub generation: u64,
    pub user_message_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_agent_message_flags() {
        let msg = ChatMessage::streaming_agent("planner", "Hel");
        assert!(msg.streaming);
        assert!(!msg.complete);
        assert_eq!(msg.role, MessageRole::Agent);
        assert_eq!(msg.agent.as_deref(), Some("planner"));
    }

    #[test]
    fn test_finalize_keeps_content_and_sets_annotation() {
        let mut msg = ChatMessage::streaming_agent("planner", "partial");
        msg.finalize(Some(MessageAnnotation::Cancelled));
        assert!(!msg.streaming);
        assert!(msg.complete);
        assert_eq!(msg.content, "partial");
        assert_eq!(msg.annotation, Some(MessageAnnotation::Cancelled));
    }

    #[test]
    fn test_inter_agent_entry_is_derived() {
        let msg = ChatMessage::inter_agent("router", "search", "find docs");
        assert_eq!(msg.role, MessageRole::InterAgent);
        assert!(msg.derived);
        assert!(msg.complete);
        assert_eq!(msg.content, "router → search: find docs");
    }

    #[test]
    fn test_tool_call_status_defaults_to_pending() {
        let call: ToolCall =
            serde_json::from_value(serde_json::json!({"id": "c1", "name": "search"})).unwrap();
        assert_eq!(call.status, ToolCallStatus::Pending);
        assert!(call.result.is_none());
    }

    #[test]
    fn test_session_state_busy() {
        assert!(SessionState::AwaitingResponse.is_busy());
        assert!(SessionState::Streaming.is_busy());
        assert!(!SessionState::Idle.is_busy());
        assert!(!SessionState::Error.is_busy());
    }
}
