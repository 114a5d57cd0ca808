//! Session manager — one actor task per live session.
//!
//! Each session is owned by a single actor task, the only writer of its
//! `TurnSession`. Callers talk to it through a cloneable `SessionHandle`:
//! commands go over an `mpsc` channel with `oneshot` replies, snapshots come
//! back over a `watch` channel.
//!
//! Every accepted turn spawns a turn task that selects the dispatch target,
//! opens the exchange and forwards its events to the actor tagged with the
//! turn generation. Turn tasks never touch session state.
//!
//! Timeouts enforced here:
//! - response timeout: first frame after the exchange opens
//! - idle-frame timeout: gap between frames once streaming
//! - session idle timeout: no activity while idle archives the session

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::errors::{SessionError, TurnError};
use super::turn::TurnSession;
use super::types::{AgentCommunication, Attachment, ChatSession, TurnTicket};
use crate::config::{EngineConfig, FallbackPolicy};
use crate::routing::selector::DispatchTargetSelector;
use crate::routing::types::{DispatchTarget, RoutingContext};
use crate::transport::errors::TransportError;
use crate::transport::exchange::{Exchange, StreamingTransport};
use crate::transport::synthetic::SyntheticResponder;
use crate::transport::types::{DispatchRequest, ExchangeEvent, Frame};

/// Capacity of each session's command queue.
const COMMAND_BUFFER: usize = 32;

type Registry = Arc<Mutex<HashMap<String, SessionHandle>>>;

// ─── Messages ────────────────────────────────────────────────────────────────

enum Command {
    Submit {
        content: String,
        attachments: Vec<Attachment>,
        context: Option<RoutingContext>,
        reply: oneshot::Sender<Result<TurnTicket, SessionError>>,
    },
    Cancel {
        reply: oneshot::Sender<bool>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// What a turn task reports back to its session actor.
enum TurnEvent {
    Frame(Frame),
    Completed,
    Failed(TurnError),
}

struct Tagged {
    generation: u64,
    event: TurnEvent,
}

// ─── Shared dispatch context ─────────────────────────────────────────────────

struct Dispatcher {
    selector: Arc<DispatchTargetSelector>,
    transport: Arc<dyn StreamingTransport>,
    synthetic: SyntheticResponder,
    fallback_policy: FallbackPolicy,
    response_timeout: Duration,
    idle_frame_timeout: Duration,
    accepted_output_modes: Vec<String>,
}

// ─── SessionHandle ───────────────────────────────────────────────────────────

/// Cheap, cloneable handle to a live session.
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<ChatSession>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Submit a user turn. Only admission problems are returned as errors;
    /// everything after acceptance shows up in the transcript.
    pub async fn submit_turn(
        &self,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
        context: Option<RoutingContext>,
    ) -> Result<TurnTicket, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit {
            content: content.into(),
            attachments,
            context,
            reply,
        })
        .await?;
        rx.await.map_err(|_| self.closed())?
    }

    /// Cancel the in-flight turn. Returns whether there was one.
    pub async fn cancel(&self) -> Result<bool, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Cancel { reply }).await?;
        rx.await.map_err(|_| self.closed())
    }

    /// Close the session. Closing an already closed session is a no-op.
    pub async fn close(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Close { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> ChatSession {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<ChatSession> {
        self.snapshots.clone()
    }

    /// Inter-agent communication recorded so far, in arrival order.
    pub fn communications(&self) -> Vec<AgentCommunication> {
        self.snapshots.borrow().communications.clone()
    }

    /// Wait until a snapshot satisfies `predicate`. Returns `None` if the
    /// session closes first without ever satisfying it.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Option<ChatSession>
    where
        F: FnMut(&ChatSession) -> bool,
    {
        let mut rx = self.snapshots.clone();
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if predicate(&snapshot) {
                    return Some(snapshot.clone());
                }
            }
            if rx.changed().await.is_err() {
                let snapshot = rx.borrow();
                return predicate(&snapshot).then(|| snapshot.clone());
            }
        }
    }

    async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands.send(command).await.map_err(|_| self.closed())
    }

    fn closed(&self) -> SessionError {
        SessionError::SessionClosed {
            session_id: self.id.clone(),
        }
    }
}

// ─── SessionManager ──────────────────────────────────────────────────────────

/// Creates, tracks and closes sessions.
pub struct SessionManager {
    dispatcher: Arc<Dispatcher>,
    idle_timeout: Duration,
    cancel_grace: Duration,
    registry: Registry,
}

impl SessionManager {
    pub fn new(
        config: &EngineConfig,
        selector: Arc<DispatchTargetSelector>,
        transport: Arc<dyn StreamingTransport>,
    ) -> Self {
        let dispatcher = Dispatcher {
            selector,
            transport,
            synthetic: SyntheticResponder::new(),
            fallback_policy: config.session.fallback_policy,
            response_timeout: config.transport.response_timeout(),
            idle_frame_timeout: config.transport.idle_frame_timeout(),
            accepted_output_modes: config.transport.accepted_output_modes.clone(),
        };

        Self {
            dispatcher: Arc::new(dispatcher),
            idle_timeout: config.session.idle_timeout(),
            cancel_grace: config.session.cancel_grace(),
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a new, idle session. Must be called inside a Tokio runtime.
    pub fn create_session(&self) -> SessionHandle {
        let id = Uuid::new_v4().to_string();
        let session = TurnSession::create(id.clone());
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshots_tx, snapshots_rx) = watch::channel(session.snapshot());

        let handle = SessionHandle {
            id: id.clone(),
            commands: commands_tx,
            snapshots: snapshots_rx,
        };
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), handle.clone());

        let actor = SessionActor {
            session,
            commands: commands_rx,
            events_tx,
            events_rx,
            snapshots: snapshots_tx,
            dispatcher: Arc::clone(&self.dispatcher),
            turn: None,
            idle_timeout: self.idle_timeout,
            cancel_grace: self.cancel_grace,
            last_activity: Instant::now(),
            registry: Arc::clone(&self.registry),
        };
        tokio::spawn(actor.run());

        tracing::info!(session_id = %id, "session created");
        handle
    }

    /// Handle to a live session.
    pub fn session(&self, session_id: &str) -> Option<SessionHandle> {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    /// Ids of all live sessions.
    pub fn session_ids(&self) -> Vec<String> {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Submit a turn, creating the session first when no id is given.
    pub async fn submit_turn(
        &self,
        session_id: Option<&str>,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
        context: Option<RoutingContext>,
    ) -> Result<(SessionHandle, TurnTicket), SessionError> {
        let handle = match session_id {
            Some(id) => self.session(id).ok_or_else(|| SessionError::SessionNotFound {
                session_id: id.to_string(),
            })?,
            None => self.create_session(),
        };
        let ticket = handle.submit_turn(content, attachments, context).await?;
        Ok((handle, ticket))
    }

    /// Close and archive a session.
    pub async fn close_session(&self, session_id: &str) -> Result<(), SessionError> {
        let handle = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
            .ok_or_else(|| SessionError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        handle.close().await;
        Ok(())
    }

    /// Close every live session.
    pub async fn shutdown(&self) {
        let handles: Vec<SessionHandle> = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in handles {
            handle.close().await;
        }
    }
}

// ─── SessionActor ────────────────────────────────────────────────────────────

struct TurnTask {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct SessionActor {
    session: TurnSession,
    commands: mpsc::Receiver<Command>,
    events_tx: mpsc::UnboundedSender<Tagged>,
    events_rx: mpsc::UnboundedReceiver<Tagged>,
    snapshots: watch::Sender<ChatSession>,
    dispatcher: Arc<Dispatcher>,
    turn: Option<TurnTask>,
    idle_timeout: Duration,
    cancel_grace: Duration,
    last_activity: Instant,
    registry: Registry,
}

impl SessionActor {
    async fn run(mut self) {
        let mut close_reply = None;
        loop {
            let idle_deadline = self.last_activity + self.idle_timeout;
            let busy = self.session.state().is_busy();

            tokio::select! {
                command = self.commands.recv() => {
                    self.last_activity = Instant::now();
                    match command {
                        Some(Command::Close { reply }) => {
                            self.shutdown().await;
                            close_reply = Some(reply);
                            break;
                        }
                        Some(command) => self.handle_command(command).await,
                        None => {
                            self.shutdown().await;
                            break;
                        }
                    }
                }
                Some(tagged) = self.events_rx.recv() => {
                    self.last_activity = Instant::now();
                    self.handle_event(tagged);
                }
                _ = tokio::time::sleep_until(idle_deadline), if !busy => {
                    tracing::info!(
                        session_id = %self.session.id(),
                        idle_secs = self.idle_timeout.as_secs(),
                        "archiving idle session"
                    );
                    self.shutdown().await;
                    break;
                }
            }
            self.publish();
        }

        self.publish();
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(self.session.id());
        self.commands.close();
        tracing::info!(session_id = %self.session.id(), "session closed");

        if let Some(reply) = close_reply {
            let _ = reply.send(());
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit {
                content,
                attachments,
                context,
                reply,
            } => {
                let result = self
                    .session
                    .submit_turn(&content, attachments.clone(), context);
                if let Ok(ticket) = &result {
                    self.start_turn(ticket.generation, content, attachments)
                        .await;
                }
                let _ = reply.send(result);
            }
            Command::Cancel { reply } => {
                let cancelled = self.session.cancel();
                self.stop_turn().await;
                let _ = reply.send(cancelled);
            }
            // Handled by the run loop.
            Command::Close { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn handle_event(&mut self, tagged: Tagged) {
        let Tagged { generation, event } = tagged;
        let terminal = !matches!(event, TurnEvent::Frame(_));
        match event {
            TurnEvent::Frame(frame) => self.session.on_frame(generation, frame),
            TurnEvent::Completed => self.session.on_complete(generation),
            TurnEvent::Failed(error) => self.session.on_error(generation, error),
        };

        if terminal && self.turn.as_ref().map(|t| t.generation) == Some(generation) {
            // The task has already returned or is about to.
            self.turn = None;
        }
    }

    async fn start_turn(&mut self, generation: u64, content: String, attachments: Vec<Attachment>) {
        self.stop_turn().await;

        let cancel = CancellationToken::new();
        let job = TurnJob {
            session_id: self.session.id().to_string(),
            generation,
            content,
            attachments,
            context: self.session.context().clone(),
        };
        let handle = tokio::spawn(run_turn(
            Arc::clone(&self.dispatcher),
            job,
            self.events_tx.clone(),
            cancel.clone(),
        ));
        self.turn = Some(TurnTask {
            generation,
            cancel,
            handle,
        });
    }

    /// Cancel the running turn task, give it `cancel_grace` to close its
    /// exchange, then abort it.
    async fn stop_turn(&mut self) {
        let Some(mut task) = self.turn.take() else {
            return;
        };
        task.cancel.cancel();
        if tokio::time::timeout(self.cancel_grace, &mut task.handle)
            .await
            .is_err()
        {
            tracing::warn!(
                session_id = %self.session.id(),
                generation = task.generation,
                grace_ms = self.cancel_grace.as_millis() as u64,
                "turn task did not stop within grace period, aborting"
            );
            task.handle.abort();
        }
    }

    async fn shutdown(&mut self) {
        self.session.cancel();
        self.stop_turn().await;
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.session.snapshot());
    }
}

// ─── Turn task ───────────────────────────────────────────────────────────────

struct TurnJob {
    session_id: String,
    generation: u64,
    content: String,
    attachments: Vec<Attachment>,
    context: RoutingContext,
}

/// Resolve the target, open the exchange and forward its events until a
/// terminal event, a timeout or cancellation.
async fn run_turn(
    dispatcher: Arc<Dispatcher>,
    job: TurnJob,
    events: mpsc::UnboundedSender<Tagged>,
    cancel: CancellationToken,
) {
    let emit = |event: TurnEvent| {
        events
            .send(Tagged {
                generation: job.generation,
                event,
            })
            .is_ok()
    };

    let target = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        target = dispatcher.selector.select(&job.context) => target,
    };

    let request = DispatchRequest::for_turn(
        &job.session_id,
        &job.content,
        &job.attachments,
        &job.context,
        &target.tools,
        dispatcher.accepted_output_modes.clone(),
    );

    // The response timeout covers opening the exchange and the first frame.
    let response_deadline = Instant::now() + dispatcher.response_timeout;
    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        opened = tokio::time::timeout_at(
            response_deadline,
            dispatcher.transport.open(&target, request.clone()),
        ) => opened,
    };

    let opened = match opened {
        Ok(opened) => opened,
        Err(_) => {
            let error = TurnError::ResponseTimeout {
                secs: dispatcher.response_timeout.as_secs(),
            };
            tracing::warn!(
                session_id = %job.session_id,
                generation = job.generation,
                url = %target.url,
                error = %error,
                "exchange did not open in time"
            );
            dispatcher.selector.report_failure(&target).await;
            emit(TurnEvent::Failed(error));
            return;
        }
    };

    let mut exchange = match opened {
        Ok(exchange) => exchange,
        Err(e) => {
            tracing::warn!(
                session_id = %job.session_id,
                generation = job.generation,
                url = %target.url,
                source = target.source.as_str(),
                error = %e,
                "failed to open exchange"
            );
            dispatcher.selector.report_failure(&target).await;
            match open_fallback(&dispatcher, &target, request, &e).await {
                Some(exchange) => exchange,
                None => {
                    emit(TurnEvent::Failed(TurnError::open_failure(&e)));
                    return;
                }
            }
        }
    };

    let mut received_first = false;
    loop {
        let deadline = if received_first {
            Instant::now() + dispatcher.idle_frame_timeout
        } else {
            response_deadline
        };

        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                exchange.close();
                return;
            }
            next = tokio::time::timeout_at(deadline, exchange.next()) => next,
        };

        match next {
            Err(_) => {
                exchange.close();
                let error = if received_first {
                    TurnError::idle_timeout(dispatcher.idle_frame_timeout.as_secs())
                } else {
                    TurnError::ResponseTimeout {
                        secs: dispatcher.response_timeout.as_secs(),
                    }
                };
                tracing::warn!(
                    session_id = %job.session_id,
                    generation = job.generation,
                    url = %target.url,
                    error = %error,
                    "exchange timed out"
                );
                dispatcher.selector.report_failure(&target).await;
                emit(TurnEvent::Failed(error));
                return;
            }
            Ok(None) => {
                // Closed from outside, e.g. superseded by a newer exchange.
                emit(TurnEvent::Failed(TurnError::mid_stream(
                    &TransportError::Closed,
                )));
                return;
            }
            Ok(Some(ExchangeEvent::Frame(frame))) => {
                // Same rule that moves the session out of AwaitingResponse.
                received_first |= frame.is_content();
                if !emit(TurnEvent::Frame(frame)) {
                    exchange.close();
                    return;
                }
            }
            Ok(Some(ExchangeEvent::Completed)) => {
                emit(TurnEvent::Completed);
                return;
            }
            Ok(Some(ExchangeEvent::Failed(e))) => {
                tracing::warn!(
                    session_id = %job.session_id,
                    generation = job.generation,
                    url = %target.url,
                    error = %e,
                    "exchange failed mid-stream"
                );
                dispatcher.selector.report_failure(&target).await;
                emit(TurnEvent::Failed(TurnError::mid_stream(&e)));
                return;
            }
        }
    }
}

/// Open the synthetic responder when the policy allows it.
async fn open_fallback(
    dispatcher: &Dispatcher,
    target: &DispatchTarget,
    request: DispatchRequest,
    cause: &TransportError,
) -> Option<Exchange> {
    match dispatcher.fallback_policy {
        FallbackPolicy::Disabled => None,
        FallbackPolicy::Synthetic => {
            tracing::info!(url = %target.url, cause = %cause, "using synthetic fallback");
            dispatcher.synthetic.open(target, request).await.ok()
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
