//! Frame interpreter — builds the transcript from streamed frames.
//!
//! Responsibilities:
//! - Open, extend and finalize agent messages from delta frames
//! - Apply authoritative completion payloads
//! - Record inter-agent hops and place a derived entry at their arrival position
//! - Close whatever is open when the stream terminates
//!
//! At most one message is open (streaming) at a time, and it is always the
//! last entry attributed to its agent. A delta from a different agent closes
//! the open message before starting a new one; so does an inter-agent hop,
//! whose derived entry is attributed to the hop's source.

use super::tracer::CommunicationTracer;
use super::types::{ChatMessage, MessageAnnotation};
use crate::transport::types::{CompletionPayload, Frame, InterAgentRecord};

/// Agent name used when a frame does not say who produced it.
pub const DEFAULT_AGENT: &str = "assistant";

/// What applying a frame did to the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// A new streaming message was opened.
    Opened,
    /// Text was appended to the open message.
    Appended,
    /// A message was finalized from a completion payload.
    Completed,
    /// An inter-agent hop was recorded.
    Hop,
    /// An error frame closed the open message.
    Errored { message: String, retryable: bool },
    /// Nothing to do (e.g. empty delta).
    Ignored,
}

/// Stateful transcript builder for one session.
#[derive(Debug, Clone)]
pub struct FrameInterpreter {
    /// Index of the open (streaming) message in the transcript.
    open: Option<usize>,
    default_agent: String,
}

impl Default for FrameInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameInterpreter {
    pub fn new() -> Self {
        Self {
            open: None,
            default_agent: DEFAULT_AGENT.to_string(),
        }
    }

    /// Agent name attributed to frames that do not carry one.
    pub fn set_default_agent(&mut self, agent: impl Into<String>) {
        self.default_agent = agent.into();
    }

    pub fn default_agent(&self) -> &str {
        &self.default_agent
    }

    /// The currently open message, if any.
    pub fn open_message<'a>(&self, transcript: &'a [ChatMessage]) -> Option<&'a ChatMessage> {
        self.open.and_then(|idx| transcript.get(idx))
    }

    pub fn has_open_message(&self) -> bool {
        self.open.is_some()
    }

    /// Apply one frame to the transcript.
    pub fn apply(
        &mut self,
        frame: Frame,
        transcript: &mut Vec<ChatMessage>,
        tracer: &mut CommunicationTracer,
    ) -> Applied {
        match frame {
            Frame::Delta { agent, text } => {
                let agent = self.agent_or_default(agent);
                self.apply_delta(agent, &text, transcript)
            }
            Frame::Completion(payload) => self.apply_completion(payload, transcript),
            Frame::InterAgent(hop) => self.apply_hop(&hop, transcript, tracer),
            Frame::Error { message, retryable } => {
                self.finalize_open(
                    transcript,
                    Some(MessageAnnotation::Interrupted {
                        reason: message.clone(),
                    }),
                );
                Applied::Errored { message, retryable }
            }
        }
    }

    /// Close the open message, if any. Returns whether one was closed.
    pub fn finalize_open(
        &mut self,
        transcript: &mut [ChatMessage],
        annotation: Option<MessageAnnotation>,
    ) -> bool {
        match self.open.take().and_then(|idx| transcript.get_mut(idx)) {
            Some(msg) => {
                msg.finalize(annotation);
                true
            }
            None => false,
        }
    }

    fn agent_or_default(&self, agent: Option<String>) -> String {
        agent
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| self.default_agent.clone())
    }

    /// Index of the open message if it belongs to `agent`.
    fn open_for(&self, agent: &str, transcript: &[ChatMessage]) -> Option<usize> {
        self.open
            .filter(|idx| transcript.get(*idx).and_then(|m| m.agent.as_deref()) == Some(agent))
    }

    fn apply_delta(&mut self, agent: String, text: &str, transcript: &mut Vec<ChatMessage>) -> Applied {
        if text.is_empty() {
            return Applied::Ignored;
        }

        if let Some(idx) = self.open_for(&agent, transcript) {
            transcript[idx].content.push_str(text);
            return Applied::Appended;
        }

        // Either nothing is open or another agent's message is: close it first.
        if self.finalize_open(transcript, None) {
            tracing::debug!(agent = %agent, "agent switch mid-turn, closed previous message");
        }
        transcript.push(ChatMessage::streaming_agent(agent, text));
        self.open = Some(transcript.len() - 1);
        Applied::Opened
    }

    fn apply_completion(
        &mut self,
        payload: CompletionPayload,
        transcript: &mut Vec<ChatMessage>,
    ) -> Applied {
        let agent = self.agent_or_default(payload.agent.clone());

        let idx = match self.open_for(&agent, transcript) {
            Some(idx) => idx,
            None => {
                self.finalize_open(transcript, None);
                transcript.push(ChatMessage::streaming_agent(agent, ""));
                transcript.len() - 1
            }
        };

        let msg = &mut transcript[idx];
        // The completion payload is authoritative. An empty final content
        // means the endpoint sent none, so the streamed text stands.
        if !payload.content.is_empty() && payload.content != msg.content {
            if !msg.content.is_empty() {
                tracing::debug!(
                    streamed_len = msg.content.len(),
                    final_len = payload.content.len(),
                    "completion content differs from streamed deltas, using completion"
                );
            }
            msg.content = payload.content;
        }
        msg.citations = payload.citations;
        msg.tool_calls = payload.tool_calls;
        msg.scratchpad = payload.scratchpad;
        msg.finalize(None);

        self.open = None;
        Applied::Completed
    }

    fn apply_hop(
        &mut self,
        hop: &InterAgentRecord,
        transcript: &mut Vec<ChatMessage>,
        tracer: &mut CommunicationTracer,
    ) -> Applied {
        let record = tracer.record(hop);
        // Text after the hop belongs below it, so the next delta opens anew.
        if self.finalize_open(transcript, None) {
            tracing::debug!(
                source = record.source_agent(),
                target = record.target_agent(),
                "inter-agent hop closed the open message"
            );
        }
        transcript.push(ChatMessage::inter_agent(
            record.source_agent(),
            record.target_agent(),
            record.message(),
        ));
        Applied::Hop
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::{Citation, MessageRole};

    struct Harness {
        interp: FrameInterpreter,
        transcript: Vec<ChatMessage>,
        tracer: CommunicationTracer,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                interp: FrameInterpreter::new(),
                transcript: Vec::new(),
                tracer: CommunicationTracer::new(),
            }
        }

        fn feed(&mut self, frame: Frame) -> Applied {
            self.interp.apply(frame, &mut self.transcript, &mut self.tracer)
        }

        fn streaming_count(&self) -> usize {
            self.transcript.iter().filter(|m| m.streaming).count()
        }
    }

    fn citation(source: &str) -> Citation {
        Citation {
            source: source.into(),
            title: None,
            excerpt: None,
            relevance: Some(0.8),
        }
    }

    fn completion(agent: &str, content: &str, citations: Vec<Citation>) -> Frame {
        Frame::Completion(CompletionPayload {
            agent: Some(agent.into()),
            content: content.into(),
            citations,
            ..Default::default()
        })
    }

    fn hop(source: &str, target: &str) -> Frame {
        Frame::InterAgent(InterAgentRecord {
            correlation_id: None,
            source: source.into(),
            target: target.into(),
            message: "delegate".into(),
            status: None,
            latency_ms: None,
        })
    }

    #[test]
    fn test_delta_delta_completion_round_trip() {
        let mut h = Harness::new();
        assert_eq!(h.feed(Frame::delta("a", "Hello")), Applied::Opened);
        assert_eq!(h.feed(Frame::delta("a", " world")), Applied::Appended);
        assert_eq!(h.streaming_count(), 1);
        assert_eq!(
            h.feed(completion("a", "Hello world", vec![citation("c1")])),
            Applied::Completed
        );

        assert_eq!(h.transcript.len(), 1);
        let msg = &h.transcript[0];
        assert_eq!(msg.content, "Hello world");
        assert_eq!(msg.citations, vec![citation("c1")]);
        assert!(msg.complete);
        assert!(!msg.streaming);
        assert!(!h.interp.has_open_message());
    }

    #[test]
    fn test_completion_overrides_divergent_deltas() {
        let mut h = Harness::new();
        h.feed(Frame::delta("a", "Helo wrld"));
        h.feed(completion("a", "Hello world", vec![]));
        assert_eq!(h.transcript[0].content, "Hello world");
    }

    #[test]
    fn test_empty_completion_keeps_streamed_text() {
        let mut h = Harness::new();
        h.feed(Frame::delta("a", "streamed"));
        h.feed(completion("a", "", vec![citation("c")]));
        assert_eq!(h.transcript[0].content, "streamed");
        assert_eq!(h.transcript[0].citations.len(), 1);
    }

    #[test]
    fn test_completion_without_deltas_appends_message() {
        let mut h = Harness::new();
        h.feed(completion("a", "whole answer", vec![]));
        assert_eq!(h.transcript.len(), 1);
        assert!(h.transcript[0].complete);
        assert_eq!(h.transcript[0].content, "whole answer");
    }

    #[test]
    fn test_agent_switch_finalizes_previous_message() {
        let mut h = Harness::new();
        h.feed(Frame::delta("planner", "Plan: "));
        h.feed(Frame::delta("writer", "Draft"));
        h.feed(Frame::delta("planner", "more"));

        assert_eq!(h.transcript.len(), 3);
        assert_eq!(h.streaming_count(), 1);
        assert!(h.transcript[0].complete);
        assert!(h.transcript[1].complete);
        assert!(h.transcript.last().unwrap().streaming);
        assert_eq!(h.transcript[2].agent.as_deref(), Some("planner"));
        assert_eq!(h.transcript[2].content, "more");
    }

    /// The open message, if any, must be the last entry for its agent.
    fn assert_open_is_latest_for_agent(transcript: &[ChatMessage]) {
        let open: Vec<usize> = transcript
            .iter()
            .enumerate()
            .filter(|(_, m)| m.streaming)
            .map(|(i, _)| i)
            .collect();
        assert!(open.len() <= 1, "more than one streaming message: {open:?}");
        if let Some(&idx) = open.first() {
            let agent = transcript[idx].agent.as_deref();
            let latest = transcript.iter().rposition(|m| m.agent.as_deref() == agent);
            assert_eq!(latest, Some(idx), "streaming message is not the latest for {agent:?}");
        }
    }

    #[test]
    fn test_inter_agent_entries_sit_at_arrival_position() {
        let mut h = Harness::new();
        h.feed(Frame::delta("router", "Looking"));
        assert_eq!(h.feed(hop("router", "search")), Applied::Hop);
        assert!(!h.interp.has_open_message());
        assert_eq!(h.feed(Frame::delta("router", "Found it")), Applied::Opened);
        assert_open_is_latest_for_agent(&h.transcript);
        h.feed(hop("search", "router"));
        h.feed(completion("router", "Found it: done", vec![]));

        let roles: Vec<MessageRole> = h.transcript.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::Agent,
                MessageRole::InterAgent,
                MessageRole::Agent,
                MessageRole::InterAgent,
                MessageRole::Agent,
            ]
        );
        assert_eq!(h.transcript[0].content, "Looking");
        assert!(h.transcript[0].complete);
        assert!(h.transcript[1].content.starts_with("router → search"));
        assert!(h.transcript[1].derived);
        assert_eq!(h.transcript[2].content, "Found it");
        assert!(h.transcript[2].complete);
        assert!(h.transcript[3].content.starts_with("search → router"));
        assert_eq!(h.transcript[4].content, "Found it: done");
        assert_eq!(h.streaming_count(), 0);
        assert_eq!(h.tracer.len(), 2);
    }

    #[test]
    fn test_text_after_hop_is_placed_after_it() {
        let mut h = Harness::new();
        h.feed(Frame::delta("router", "Looking"));
        h.feed(hop("router", "search"));
        h.feed(Frame::delta("router", " it up"));

        assert_eq!(h.transcript.len(), 3);
        assert_eq!(h.transcript[0].content, "Looking");
        assert!(!h.transcript[0].streaming);
        assert_eq!(h.transcript[1].role, MessageRole::InterAgent);
        assert_eq!(h.transcript[2].content, " it up");
        assert!(h.transcript[2].streaming);
        assert_open_is_latest_for_agent(&h.transcript);

        h.feed(completion("router", "", vec![citation("c1")]));
        assert_eq!(h.transcript[2].content, " it up");
        assert_eq!(h.transcript[2].citations, vec![citation("c1")]);
        assert_eq!(h.streaming_count(), 0);
    }

    #[test]
    fn test_hop_before_any_delta_precedes_agent_message() {
        let mut h = Harness::new();
        h.feed(hop("router", "search"));
        h.feed(Frame::delta("router", "Found it"));
        assert_eq!(h.transcript[0].role, MessageRole::InterAgent);
        assert_eq!(h.transcript[1].role, MessageRole::Agent);
    }

    #[test]
    fn test_error_frame_interrupts_open_message() {
        let mut h = Harness::new();
        h.feed(Frame::delta("a", "partial"));
        let applied = h.feed(Frame::Error {
            message: "backend crashed".into(),
            retryable: true,
        });
        assert!(matches!(applied, Applied::Errored { retryable: true, .. }));
        let msg = &h.transcript[0];
        assert_eq!(msg.content, "partial");
        assert!(!msg.streaming);
        assert_eq!(
            msg.annotation,
            Some(MessageAnnotation::Interrupted {
                reason: "backend crashed".into()
            })
        );
    }

    #[test]
    fn test_missing_agent_uses_default() {
        let mut h = Harness::new();
        h.interp.set_default_agent("Researcher");
        h.feed(Frame::Delta {
            agent: None,
            text: "x".into(),
        });
        h.feed(Frame::Delta {
            agent: Some("  ".into()),
            text: "y".into(),
        });
        assert_eq!(h.transcript.len(), 1);
        assert_eq!(h.transcript[0].agent.as_deref(), Some("Researcher"));
        assert_eq!(h.transcript[0].content, "xy");
    }

    #[test]
    fn test_empty_delta_ignored() {
        let mut h = Harness::new();
        assert_eq!(h.feed(Frame::delta("a", "")), Applied::Ignored);
        assert!(h.transcript.is_empty());
    }
}
