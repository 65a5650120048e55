//! The conversation turn controller.
//!
//! One actor task owns every piece of turn state; public methods marshal
//! commands onto it, and collaborator callbacks (capture events, backend
//! completions) re-enter as internal events tagged with a generation so
//! stale deliveries from a dismissed turn are discarded.
//!
//! Voice path: `Idle → Prompting → Listening → Acknowledging → Processing →
//! Idle`. Typed path: the same backend gate with no visible overlay phases.
//! A voice turn's input is committed to the conversation only once its
//! backend call succeeds; a typed turn commits the user message eagerly.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use talkover_capture::{CaptureError, CaptureEvent, UtteranceCaptureSession};
use talkover_speech::SpeechOutputCoordinator;

use crate::backend::{BackendError, ChatBackend};
use crate::command::VoiceCommand;
use crate::config::ChatConfiguration;
use crate::error::TurnError;
use crate::metrics::TurnMetrics;
use crate::store::{Conversation, ConversationStore, Message};

/// Overlay phase of the voice takeover interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Prompting,
    Listening,
    Acknowledging,
    Processing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOrigin {
    Typed,
    Voice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Idle,
    AwaitingInput,
    AcknowledgingInput,
    AwaitingBackend,
    Completed,
    Failed,
}

/// One user-input-to-assistant-response exchange.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub input_text: String,
    pub origin: TurnOrigin,
    pub response_text: Option<String>,
    pub status: TurnStatus,
}

/// UI-facing notifications, published on a broadcast channel alongside the
/// phase watch.
#[derive(Debug, Clone)]
pub enum TurnUpdate {
    PhaseChanged(TurnPhase),
    Suggestions(Vec<String>),
    TranscriptChanged(String),
    /// Transient message inside the voice overlay.
    OverlayError(String),
    /// Persistent chat error channel; used when the overlay is already gone.
    ChatError(String),
    MessageAppended(Message),
    ConversationCleared,
    SpeakingReply { text: String },
    TurnCompleted(ConversationTurn),
}

/// Injected collaborators. The controller borrows these; it creates none of
/// them.
pub struct TurnDeps {
    pub capture: Arc<UtteranceCaptureSession>,
    pub speech: Arc<SpeechOutputCoordinator>,
    pub backend: Arc<dyn ChatBackend>,
    pub store: Arc<dyn ConversationStore>,
}

enum ControllerCmd {
    BeginVoiceTurn {
        reply: oneshot::Sender<Result<(), TurnError>>,
    },
    SendTypedText {
        text: String,
        reply: oneshot::Sender<Result<(), TurnError>>,
    },
    SelectSuggestion {
        text: String,
        reply: oneshot::Sender<Result<(), TurnError>>,
    },
    Dismiss,
    ApplyConfiguration(Box<ChatConfiguration>),
    SwapBackend(Arc<dyn ChatBackend>),
    Shutdown,
}

enum InternalEvent {
    /// Outcome of the permission + capture-start pipeline.
    StartOutcome {
        generation: u64,
        result: Result<u64, CaptureError>,
    },
    BackendDone {
        generation: u64,
        origin: TurnOrigin,
        input: String,
        result: Result<String, BackendError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeadlineKind {
    Acknowledge,
    ErrorDismiss,
}

/// Handle to the controller actor.
pub struct ConversationTurnController {
    cmd_tx: mpsc::UnboundedSender<ControllerCmd>,
    phase_rx: watch::Receiver<TurnPhase>,
    updates_tx: broadcast::Sender<TurnUpdate>,
    metrics: TurnMetrics,
}

impl ConversationTurnController {
    /// Wire up the collaborators and spawn the actor. Fails when the capture
    /// session's event stream was already consumed.
    pub fn spawn(
        deps: TurnDeps,
        config: ChatConfiguration,
        conversation: Conversation,
    ) -> Result<Self, TurnError> {
        let capture_rx = deps
            .capture
            .take_events()
            .ok_or(TurnError::CaptureEventsTaken)?;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(TurnPhase::Idle);
        let (updates_tx, _) = broadcast::channel(64);
        let (internal_tx, internal_rx) = mpsc::channel(32);
        let metrics = TurnMetrics::new();

        deps.speech.set_params(config.speech.clone());

        let actor = ControllerActor {
            capture: deps.capture,
            speech: deps.speech,
            backend: deps.backend,
            store: deps.store,
            config,
            conversation,
            phase: TurnPhase::Idle,
            phase_tx,
            updates_tx: updates_tx.clone(),
            cmd_rx,
            capture_rx,
            internal_tx,
            internal_rx,
            session_id: None,
            start_generation: 0,
            backend_generation: 0,
            in_flight: false,
            pending_capture: Vec::new(),
            pending_input: None,
            current_turn: None,
            deadline: None,
            metrics: metrics.clone(),
        };
        tokio::spawn(actor.run());

        Ok(Self {
            cmd_tx,
            phase_rx,
            updates_tx,
            metrics,
        })
    }

    pub async fn begin_voice_turn(&self) -> Result<(), TurnError> {
        self.request(|reply| ControllerCmd::BeginVoiceTurn { reply })
            .await
    }

    pub async fn send_typed_text(&self, text: &str) -> Result<(), TurnError> {
        let text = text.to_string();
        self.request(move |reply| ControllerCmd::SendTypedText { text, reply })
            .await
    }

    pub async fn select_suggestion(&self, text: &str) -> Result<(), TurnError> {
        let text = text.to_string();
        self.request(move |reply| ControllerCmd::SelectSuggestion { text, reply })
            .await
    }

    /// Close the voice overlay. Synchronous from the caller's perspective:
    /// the phase flips to `Idle` as soon as the actor processes the command,
    /// without waiting for capture teardown.
    pub fn dismiss(&self) {
        let _ = self.cmd_tx.send(ControllerCmd::Dismiss);
    }

    /// Atomically swap the active configuration for subsequent turns.
    pub fn apply_configuration(&self, config: ChatConfiguration) {
        let _ = self
            .cmd_tx
            .send(ControllerCmd::ApplyConfiguration(Box::new(config)));
    }

    pub fn swap_backend(&self, backend: Arc<dyn ChatBackend>) {
        let _ = self.cmd_tx.send(ControllerCmd::SwapBackend(backend));
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(ControllerCmd::Shutdown);
    }

    pub fn phase(&self) -> watch::Receiver<TurnPhase> {
        self.phase_rx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TurnUpdate> {
        self.updates_tx.subscribe()
    }

    pub fn metrics(&self) -> TurnMetrics {
        self.metrics.clone()
    }

    async fn request(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<(), TurnError>>) -> ControllerCmd,
    ) -> Result<(), TurnError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(make(reply_tx))
            .map_err(|_| TurnError::ControllerClosed)?;
        reply_rx.await.map_err(|_| TurnError::ControllerClosed)?
    }
}

struct ControllerActor {
    capture: Arc<UtteranceCaptureSession>,
    speech: Arc<SpeechOutputCoordinator>,
    backend: Arc<dyn ChatBackend>,
    store: Arc<dyn ConversationStore>,
    config: ChatConfiguration,
    conversation: Conversation,
    phase: TurnPhase,
    phase_tx: watch::Sender<TurnPhase>,
    updates_tx: broadcast::Sender<TurnUpdate>,
    cmd_rx: mpsc::UnboundedReceiver<ControllerCmd>,
    capture_rx: mpsc::Receiver<CaptureEvent>,
    internal_tx: mpsc::Sender<InternalEvent>,
    internal_rx: mpsc::Receiver<InternalEvent>,
    /// Capture session this turn listens to; events from any other id are
    /// stale and dropped.
    session_id: Option<u64>,
    /// Invalidates in-flight permission/start pipelines after a dismissal.
    start_generation: u64,
    backend_generation: u64,
    /// At most one outstanding backend call, across both input paths.
    in_flight: bool,
    /// Capture events that arrived while the start pipeline's outcome was
    /// still in flight; replayed once the session id is known.
    pending_capture: Vec<CaptureEvent>,
    /// Frozen transcript shown during the acknowledging phase.
    pending_input: Option<String>,
    current_turn: Option<ConversationTurn>,
    deadline: Option<(Instant, DeadlineKind)>,
    metrics: TurnMetrics,
}

impl ControllerActor {
    async fn run(mut self) {
        loop {
            let deadline = self.deadline;
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle_command(cmd).await {
                            break;
                        }
                    }
                    None => break,
                },
                Some(event) = self.capture_rx.recv() => {
                    self.handle_capture_event(event).await;
                }
                Some(event) = self.internal_rx.recv() => {
                    self.handle_internal(event).await;
                }
                _ = wait_deadline(deadline) => {
                    self.handle_deadline().await;
                }
            }
        }
        info!(target: "turn", "turn controller shutting down");
    }

    /// Returns true on shutdown.
    async fn handle_command(&mut self, cmd: ControllerCmd) -> bool {
        match cmd {
            ControllerCmd::BeginVoiceTurn { reply } => {
                let result = self.begin_voice_turn().await;
                let _ = reply.send(result);
            }
            ControllerCmd::SendTypedText { text, reply } => {
                let result = self.send_typed_text(text).await;
                let _ = reply.send(result);
            }
            ControllerCmd::SelectSuggestion { text, reply } => {
                let result = self.select_suggestion(text);
                let _ = reply.send(result);
            }
            ControllerCmd::Dismiss => self.dismiss(),
            ControllerCmd::ApplyConfiguration(config) => {
                self.speech.set_params(config.speech.clone());
                self.config = *config;
                info!(target: "turn", "configuration swapped");
            }
            ControllerCmd::SwapBackend(backend) => {
                info!(target: "turn", backend = backend.name(), "backend swapped");
                self.backend = backend;
            }
            ControllerCmd::Shutdown => return true,
        }
        false
    }

    async fn begin_voice_turn(&mut self) -> Result<(), TurnError> {
        if self.phase != TurnPhase::Idle || self.in_flight {
            self.metrics.rejected_attempts.fetch_add(1, Ordering::Relaxed);
            return Err(TurnError::Busy);
        }
        self.metrics
            .voice_turns_started
            .fetch_add(1, Ordering::Relaxed);
        self.current_turn = Some(ConversationTurn {
            input_text: String::new(),
            origin: TurnOrigin::Voice,
            response_text: None,
            status: TurnStatus::AwaitingInput,
        });
        self.enter_prompting();
        Ok(())
    }

    /// Show the prompt affordances and kick off permission + capture start
    /// in the background.
    fn enter_prompting(&mut self) {
        // Capture must not contend with reply playback for the audio session.
        self.speech.stop();
        self.pending_capture.clear();
        self.pending_input = None;
        self.deadline = None;
        self.set_phase(TurnPhase::Prompting);
        self.publish(TurnUpdate::TranscriptChanged(String::new()));
        self.publish(TurnUpdate::Suggestions(self.config.suggestions.clone()));

        self.start_generation += 1;
        let generation = self.start_generation;
        let capture = self.capture.clone();
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = if capture.request_permission().await {
                capture.start().await
            } else {
                Err(CaptureError::PermissionDenied)
            };
            let _ = internal_tx
                .send(InternalEvent::StartOutcome { generation, result })
                .await;
        });
    }

    async fn send_typed_text(&mut self, text: String) -> Result<(), TurnError> {
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(TurnError::EmptyInput);
        }
        // The overlay is a takeover surface; typing is only reachable when
        // it is closed. Processing is the exception: a dismissed voice turn
        // may still be settling while the user types.
        if self.in_flight
            || !matches!(self.phase, TurnPhase::Idle | TurnPhase::Processing)
        {
            self.metrics.rejected_attempts.fetch_add(1, Ordering::Relaxed);
            return Err(TurnError::Busy);
        }
        self.metrics.typed_turns.fetch_add(1, Ordering::Relaxed);

        // Typed input commits eagerly, matching text-chat expectations.
        let message = Message::user(&text);
        self.conversation.messages.push(message.clone());
        self.publish(TurnUpdate::MessageAppended(message));
        self.persist().await;

        self.dispatch_backend(text, TurnOrigin::Typed, false);
        Ok(())
    }

    fn select_suggestion(&mut self, text: String) -> Result<(), TurnError> {
        if !matches!(self.phase, TurnPhase::Prompting | TurnPhase::Listening) {
            return Err(TurnError::InvalidPhase);
        }
        // The chip bypasses capture entirely. A session that already started
        // (or is still coming up) is cancelled, never finalized.
        if self.phase == TurnPhase::Listening {
            self.capture.cancel();
            self.session_id = None;
        }
        self.start_generation += 1;
        self.acknowledge(text);
        Ok(())
    }

    /// Freeze the input for display, then hand it to processing after the
    /// acknowledge delay.
    fn acknowledge(&mut self, text: String) {
        if let Some(turn) = self.current_turn.as_mut() {
            turn.input_text = text.clone();
            turn.status = TurnStatus::AcknowledgingInput;
        }
        self.publish(TurnUpdate::TranscriptChanged(text.clone()));
        self.pending_input = Some(text);
        self.set_phase(TurnPhase::Acknowledging);
        self.deadline = Some((
            Instant::now() + self.config.acknowledge_delay,
            DeadlineKind::Acknowledge,
        ));
    }

    fn dismiss(&mut self) {
        if self.phase == TurnPhase::Idle {
            return;
        }
        self.metrics.dismissals.fetch_add(1, Ordering::Relaxed);
        debug!(target: "turn", phase = ?self.phase, "voice overlay dismissed");
        if self.phase == TurnPhase::Listening {
            // Cancel, not stop: a dismissal must not produce a spurious
            // finalization.
            self.capture.cancel();
        }
        // A backend call in Processing keeps running; its result lands in
        // history without reopening the overlay.
        self.session_id = None;
        self.start_generation += 1;
        self.current_turn = None;
        self.reset_to_idle();
    }

    async fn handle_capture_event(&mut self, event: CaptureEvent) {
        // A fast recognizer can deliver its first events before the start
        // pipeline's outcome is processed. Hold them until the session id is
        // known; dropping them here would strand the turn in Listening.
        if self.phase == TurnPhase::Prompting && self.session_id.is_none() {
            self.pending_capture.push(event);
            return;
        }
        match event {
            CaptureEvent::Partial { session_id, text } => {
                if !self.is_current_session(session_id) {
                    return;
                }
                self.publish(TurnUpdate::TranscriptChanged(text));
            }
            CaptureEvent::Final {
                session_id,
                utterance,
            } => {
                if !self.is_current_session(session_id) {
                    debug!(target: "turn", session_id, "discarding stale final");
                    return;
                }
                self.session_id = None;
                let text = utterance.transcript.trim().to_string();
                if text.is_empty() {
                    // "Didn't catch that": soft re-prompt, not an error.
                    self.metrics.empty_utterances.fetch_add(1, Ordering::Relaxed);
                    debug!(target: "turn", "empty utterance, re-prompting");
                    self.enter_prompting();
                } else {
                    self.acknowledge(text);
                }
            }
            CaptureEvent::Error {
                session_id,
                message,
                recovered_transcript,
                ..
            } => {
                if !self.is_current_session(session_id) {
                    return;
                }
                self.session_id = None;
                // Keep any speech we did catch on screen for a retry.
                if let Some(text) = recovered_transcript {
                    self.publish(TurnUpdate::TranscriptChanged(text));
                }
                self.overlay_error(message);
            }
        }
    }

    async fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::StartOutcome { generation, result } => {
                self.handle_start_outcome(generation, result).await;
            }
            InternalEvent::BackendDone {
                generation,
                origin,
                input,
                result,
            } => {
                self.handle_backend_done(generation, origin, input, result)
                    .await;
            }
        }
    }

    async fn handle_start_outcome(&mut self, generation: u64, result: Result<u64, CaptureError>) {
        if generation != self.start_generation || self.phase != TurnPhase::Prompting {
            // The turn moved on (dismissed, or a suggestion chip was taken)
            // while the capture pipeline was still coming up.
            if result.is_ok() {
                self.capture.cancel();
            }
            return;
        }
        match result {
            Ok(session_id) => {
                self.session_id = Some(session_id);
                if let Some(turn) = self.current_turn.as_mut() {
                    turn.status = TurnStatus::AwaitingInput;
                }
                self.set_phase(TurnPhase::Listening);
                // Events the session produced during the handoff; stale ones
                // fall out through the session-id check.
                let held = std::mem::take(&mut self.pending_capture);
                for event in held {
                    self.handle_capture_event(event).await;
                }
            }
            Err(error) => {
                self.pending_capture.clear();
                warn!(target: "turn", error = %error, "voice capture failed to start");
                self.overlay_error(overlay_message(&error));
            }
        }
    }

    async fn handle_deadline(&mut self) {
        let Some((_, kind)) = self.deadline.take() else {
            return;
        };
        match kind {
            DeadlineKind::Acknowledge => {
                if self.phase != TurnPhase::Acknowledging {
                    return;
                }
                let Some(input) = self.pending_input.take() else {
                    self.reset_to_idle();
                    return;
                };
                self.process_voice_input(input).await;
            }
            DeadlineKind::ErrorDismiss => {
                self.current_turn = None;
                self.reset_to_idle();
            }
        }
    }

    /// Route a finalized voice input: command phrases short-circuit, free
    /// text goes to the backend.
    async fn process_voice_input(&mut self, input: String) {
        match VoiceCommand::parse(&input) {
            VoiceCommand::ClearConversation => {
                info!(target: "turn", "voice command: clear conversation");
                self.conversation.messages.clear();
                self.persist().await;
                self.publish(TurnUpdate::ConversationCleared);
                self.current_turn = None;
                self.reset_to_idle();
            }
            VoiceCommand::StopSpeaking => {
                info!(target: "turn", "voice command: stop speaking");
                self.speech.stop();
                self.current_turn = None;
                self.reset_to_idle();
            }
            VoiceCommand::FreeText(text) => {
                if let Some(turn) = self.current_turn.as_mut() {
                    turn.status = TurnStatus::AwaitingBackend;
                }
                self.set_phase(TurnPhase::Processing);
                self.dispatch_backend(text, TurnOrigin::Voice, true);
            }
        }
    }

    /// Fire the backend call in the background. `include_input` carries a
    /// voice input that is not yet committed to the conversation.
    fn dispatch_backend(&mut self, input: String, origin: TurnOrigin, include_input: bool) {
        self.in_flight = true;
        self.backend_generation += 1;
        let generation = self.backend_generation;

        let mut messages = self.conversation.messages.clone();
        if include_input {
            messages.push(Message::user(&input));
        }
        let backend = self.backend.clone();
        let system_prompt = self.config.system_prompt.clone();
        let internal_tx = self.internal_tx.clone();
        debug!(target: "turn", backend = backend.name(), ?origin, "dispatching backend call");
        tokio::spawn(async move {
            let result = backend.send_conversation(&messages, &system_prompt).await;
            let _ = internal_tx
                .send(InternalEvent::BackendDone {
                    generation,
                    origin,
                    input,
                    result,
                })
                .await;
        });
    }

    async fn handle_backend_done(
        &mut self,
        generation: u64,
        origin: TurnOrigin,
        input: String,
        result: Result<String, BackendError>,
    ) {
        if generation != self.backend_generation {
            debug!(target: "turn", "discarding stale backend completion");
            return;
        }
        self.in_flight = false;
        let overlay_open = self.phase == TurnPhase::Processing;

        match result {
            Ok(reply) => {
                if origin == TurnOrigin::Voice {
                    // Deferred commit: the voice input enters history only
                    // now that the turn succeeded.
                    let user = Message::user(&input);
                    self.conversation.messages.push(user.clone());
                    self.publish(TurnUpdate::MessageAppended(user));
                }
                let assistant = Message::assistant(&reply);
                self.conversation.messages.push(assistant.clone());
                self.publish(TurnUpdate::MessageAppended(assistant));
                self.persist().await;
                self.metrics.commits.fetch_add(1, Ordering::Relaxed);

                if let Some(mut turn) = self.current_turn.take() {
                    turn.response_text = Some(reply.clone());
                    turn.status = TurnStatus::Completed;
                    self.publish(TurnUpdate::TurnCompleted(turn));
                }

                if origin == TurnOrigin::Voice && overlay_open && self.config.speak_replies {
                    match self.speech.speak(&reply).await {
                        Ok(_) => self.publish(TurnUpdate::SpeakingReply { text: reply }),
                        Err(e) => {
                            warn!(target: "turn", error = %e, "reply playback failed to start")
                        }
                    }
                }
            }
            Err(error) => {
                self.metrics.backend_failures.fetch_add(1, Ordering::Relaxed);
                warn!(target: "turn", error = %error, ?origin, "backend call failed");
                // The overlay has closed by now; failures land on the
                // persistent chat channel. A voice input is not committed;
                // an eagerly-committed typed message stays.
                self.publish(TurnUpdate::ChatError(error.to_string()));
                if let Some(mut turn) = self.current_turn.take() {
                    turn.status = TurnStatus::Failed;
                    self.publish(TurnUpdate::TurnCompleted(turn));
                }
            }
        }

        if overlay_open {
            self.reset_to_idle();
        }
    }

    /// Transient overlay error; auto-dismisses back to idle.
    fn overlay_error(&mut self, message: String) {
        self.publish(TurnUpdate::OverlayError(message));
        self.deadline = Some((
            Instant::now() + self.config.error_dismiss_delay,
            DeadlineKind::ErrorDismiss,
        ));
    }

    fn reset_to_idle(&mut self) {
        self.pending_capture.clear();
        self.pending_input = None;
        self.deadline = None;
        self.set_phase(TurnPhase::Idle);
    }

    async fn persist(&self) {
        // Persistence is best-effort; a failing store never ends a turn.
        if let Err(e) = self.store.upsert(&self.conversation).await {
            warn!(target: "turn", error = %e, "conversation upsert failed");
        }
    }

    fn is_current_session(&self, session_id: u64) -> bool {
        self.session_id == Some(session_id)
    }

    fn set_phase(&mut self, phase: TurnPhase) {
        if self.phase == phase {
            return;
        }
        debug!(target: "turn", from = ?self.phase, to = ?phase, "phase transition");
        self.phase = phase;
        self.phase_tx.send_replace(phase);
        self.publish(TurnUpdate::PhaseChanged(phase));
    }

    fn publish(&self, update: TurnUpdate) {
        // No subscribers is fine; the controller works headless.
        let _ = self.updates_tx.send(update);
    }
}

async fn wait_deadline(deadline: Option<(Instant, DeadlineKind)>) {
    match deadline {
        Some((at, _)) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn overlay_message(error: &CaptureError) -> String {
    match error {
        CaptureError::PermissionDenied => {
            "Microphone permission is required for voice input".to_string()
        }
        CaptureError::RecognizerUnavailable(_) => {
            "Speech recognition is not available right now".to_string()
        }
        other => format!("Voice input failed: {other}"),
    }
}
