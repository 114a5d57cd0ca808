//! Turn session — the per-session state machine.
//!
//! `TurnSession` owns one session's transcript and lifecycle state and is
//! driven entirely by method calls: no I/O, no clocks beyond timestamps, no
//! tasks. The session actor feeds it commands and exchange events; tests
//! drive it directly.
//!
//! ```text
//!   Idle ──submit_turn──▶ AwaitingResponse ──content frame──▶ Streaming
//!    ▲                         │                                 │
//!    └──────── on_complete ────┴─────────────────────────────────┘
//!
//!   on_error while in flight → Error     submit_turn from Error → AwaitingResponse
//!   cancel from any state → Idle
//! ```
//!
//! Every turn carries a generation number. `submit_turn` and an effective
//! `cancel` bump it; events tagged with an older generation are discarded.

use chrono::{DateTime, Utc};

use super::errors::{SessionError, TurnError};
use super::interpreter::{Applied, FrameInterpreter, DEFAULT_AGENT};
use super::tracer::CommunicationTracer;
use super::types::{
    AgentCommunication, Attachment, ChatMessage, ChatSession, MessageAnnotation, SessionState,
    TurnTicket,
};
use crate::routing::types::RoutingContext;
use crate::transport::types::Frame;

/// Transcript notice for a turn that ended before any frame arrived.
pub const NO_RESPONSE_NOTICE: &str = "The agent finished without sending a response.";

/// Whether an event was applied to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Applied,
    /// Stale generation or no turn in flight.
    Discarded,
}

/// One session's transcript and turn lifecycle.
#[derive(Debug, Clone)]
pub struct TurnSession {
    id: String,
    context: RoutingContext,
    messages: Vec<ChatMessage>,
    state: SessionState,
    generation: u64,
    interpreter: FrameInterpreter,
    tracer: CommunicationTracer,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TurnSession {
    /// A fresh, idle session with an empty transcript.
    pub fn create(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            context: RoutingContext::None,
            messages: Vec::new(),
            state: SessionState::Idle,
            generation: 0,
            interpreter: FrameInterpreter::new(),
            tracer: CommunicationTracer::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Routing context used for the next (or current) turn.
    pub fn context(&self) -> &RoutingContext {
        &self.context
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn communications(&self) -> &[AgentCommunication] {
        self.tracer.records()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Point-in-time copy for observers.
    pub fn snapshot(&self) -> ChatSession {
        ChatSession {
            id: self.id.clone(),
            context: self.context.clone(),
            messages: self.messages.clone(),
            state: self.state,
            generation: self.generation,
            communications: self.tracer.records().to_vec(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    // ─── Commands ────────────────────────────────────────────────────────

    /// Accept a user turn. A context, when given, replaces the session's
    /// routing context from this turn on.
    pub fn submit_turn(
        &mut self,
        content: &str,
        attachments: Vec<Attachment>,
        context: Option<RoutingContext>,
    ) -> Result<TurnTicket, SessionError> {
        if self.state.is_busy() {
            return Err(SessionError::TurnInFlight {
                session_id: self.id.clone(),
            });
        }
        if content.trim().is_empty() && attachments.is_empty() {
            return Err(SessionError::EmptyTurn);
        }

        if let Some(context) = context {
            self.context = context;
        }
        self.interpreter = FrameInterpreter::new();
        self.interpreter.set_default_agent(default_agent_for(&self.context));

        let message = ChatMessage::user(content, attachments);
        let user_message_id = message.id.clone();
        self.messages.push(message);
        self.generation += 1;
        self.state = SessionState::AwaitingResponse;
        self.touch();

        tracing::debug!(
            session_id = %self.id,
            generation = self.generation,
            context = self.context.label(),
            "turn accepted"
        );

        Ok(TurnTicket {
            session_id: self.id.clone(),
            generation: self.generation,
            user_message_id,
        })
    }

    /// Apply one frame from the exchange of `generation`.
    pub fn on_frame(&mut self, generation: u64, frame: Frame) -> FrameOutcome {
        if !self.accepts(generation) {
            tracing::debug!(
                session_id = %self.id,
                generation,
                current = self.generation,
                kind = frame.kind(),
                "discarding stale frame"
            );
            return FrameOutcome::Discarded;
        }

        if let Frame::Error { message, retryable } = frame {
            self.fail(TurnError::Remote { message, retryable });
            return FrameOutcome::Applied;
        }

        if self.state == SessionState::AwaitingResponse && frame.is_content() {
            self.state = SessionState::Streaming;
        }
        let applied = self
            .interpreter
            .apply(frame, &mut self.messages, &mut self.tracer);
        if applied != Applied::Ignored {
            self.touch();
        }
        FrameOutcome::Applied
    }

    /// The exchange of `generation` finished normally.
    pub fn on_complete(&mut self, generation: u64) -> FrameOutcome {
        if !self.accepts(generation) {
            return FrameOutcome::Discarded;
        }

        match self.state {
            SessionState::Streaming => {
                self.interpreter.finalize_open(&mut self.messages, None);
            }
            SessionState::AwaitingResponse => {
                self.messages.push(ChatMessage::system(NO_RESPONSE_NOTICE));
            }
            SessionState::Idle | SessionState::Error => {}
        }
        self.state = SessionState::Idle;
        self.touch();

        tracing::debug!(session_id = %self.id, generation, "turn completed");
        FrameOutcome::Applied
    }

    /// The exchange of `generation` failed.
    pub fn on_error(&mut self, generation: u64, error: TurnError) -> FrameOutcome {
        if !self.accepts(generation) {
            return FrameOutcome::Discarded;
        }
        self.fail(error);
        FrameOutcome::Applied
    }

    /// Abandon the in-flight turn, if any. Returns whether a turn was
    /// cancelled. Calling it again is a no-op.
    pub fn cancel(&mut self) -> bool {
        match self.state {
            SessionState::AwaitingResponse | SessionState::Streaming => {
                self.interpreter
                    .finalize_open(&mut self.messages, Some(MessageAnnotation::Cancelled));
                self.generation += 1;
                self.state = SessionState::Idle;
                self.touch();
                tracing::info!(session_id = %self.id, generation = self.generation, "turn cancelled");
                true
            }
            SessionState::Error => {
                self.state = SessionState::Idle;
                self.touch();
                false
            }
            SessionState::Idle => false,
        }
    }

    // ─── Internals ───────────────────────────────────────────────────────

    /// Events are only applied for the current generation while a turn is
    /// in flight.
    fn accepts(&self, generation: u64) -> bool {
        generation == self.generation && self.state.is_busy()
    }

    fn fail(&mut self, error: TurnError) {
        let notice = error.interruption_notice();
        let closed = self.interpreter.finalize_open(
            &mut self.messages,
            Some(MessageAnnotation::Interrupted {
                reason: notice.clone(),
            }),
        );
        if !closed {
            self.messages.push(ChatMessage::system(notice));
        }
        self.state = SessionState::Error;
        self.touch();

        tracing::warn!(
            session_id = %self.id,
            generation = self.generation,
            retryable = error.is_retryable(),
            error = %error,
            "turn failed"
        );
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Agent name attributed to frames that omit one, based on who was addressed.
fn default_agent_for(context: &RoutingContext) -> String {
    match context {
        RoutingContext::Agent(entity) | RoutingContext::Workflow(entity) => {
            entity.name.clone().unwrap_or_else(|| entity.id.clone())
        }
        RoutingContext::ToolSet { .. } | RoutingContext::None => DEFAULT_AGENT.to_string(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
