//! The utterance capture session: one microphone + transcription attempt at
//! a time, with trailing-silence detection.
//!
//! `start()` spawns a session actor that owns the recognition stream and the
//! silence timer. All finalization paths (silence timeout, explicit stop,
//! recognizer-signaled final) converge on one code path, so `Final` is
//! emitted exactly once per session and never after a cancel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use talkover_foundation::{AudioSessionArbiter, AudioSessionMode};

use crate::error::{CaptureError, CaptureErrorKind};
use crate::level::LevelHandle;
use crate::metrics::CaptureMetrics;
use crate::provider::{
    FrameSink, MicrophoneInput, RecognitionStream, RecognitionUpdate, SpeechRecognitionProvider,
    StreamRequest,
};

/// One capture attempt and its evolving transcript.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Utterance {
    pub transcript: String,
    pub is_final: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Utterance {
    fn begin() -> Self {
        Self {
            transcript: String::new(),
            is_final: false,
            started_at: Utc::now(),
            ended_at: None,
        }
    }
}

/// Externally observable session state, published on a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSessionState {
    Idle,
    RequestingPermission,
    Recording,
    Finishing,
    Failed,
}

/// Events delivered to the single consumer. Every event carries the id of
/// the session that produced it so stale deliveries from a just-cancelled
/// session can be discarded.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    Partial {
        session_id: u64,
        text: String,
    },
    /// Exactly once per session; never after a cancel, never followed by a
    /// `Partial` for the same session.
    Final {
        session_id: u64,
        utterance: Utterance,
    },
    Error {
        session_id: u64,
        kind: CaptureErrorKind,
        message: String,
        /// Non-empty partial text collected before a mid-stream failure, so
        /// user intent is not silently lost.
        recovered_transcript: Option<String>,
    },
}

/// Tuning knobs for a capture session.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// BCP-47 locale handed to the recognizer.
    pub locale: String,
    pub partial_results: bool,
    /// Trailing silence after the last transcript activity that finalizes
    /// the utterance.
    pub silence_timeout: Duration,
    /// Cadence of the meter decay tick while no frames arrive.
    pub level_tick: Duration,
    /// Audio queue depth between the mic callback and the recognizer.
    pub audio_queue: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            locale: "vi-VN".to_string(),
            partial_results: true,
            silence_timeout: Duration::from_millis(1800),
            level_tick: Duration::from_millis(100),
            audio_queue: 32,
        }
    }
}

enum SessionCmd {
    Stop,
    Cancel,
}

struct ActiveSession {
    id: u64,
    cmd_tx: mpsc::UnboundedSender<SessionCmd>,
}

/// Owns the microphone resource and at most one in-flight [`Utterance`].
pub struct UtteranceCaptureSession {
    provider: Arc<dyn SpeechRecognitionProvider>,
    mic: Arc<dyn MicrophoneInput>,
    arbiter: Arc<AudioSessionArbiter>,
    config: CaptureConfig,
    state_tx: Arc<watch::Sender<CaptureSessionState>>,
    event_tx: mpsc::Sender<CaptureEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<CaptureEvent>>>,
    level: LevelHandle,
    permission_granted: AtomicBool,
    starting: AtomicBool,
    next_session_id: AtomicU64,
    active: Arc<Mutex<Option<ActiveSession>>>,
    metrics: CaptureMetrics,
}

impl UtteranceCaptureSession {
    pub fn new(
        provider: Arc<dyn SpeechRecognitionProvider>,
        mic: Arc<dyn MicrophoneInput>,
        arbiter: Arc<AudioSessionArbiter>,
        config: CaptureConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(CaptureSessionState::Idle);
        let (event_tx, event_rx) = mpsc::channel(64);
        Self {
            provider,
            mic,
            arbiter,
            config,
            state_tx: Arc::new(state_tx),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            level: LevelHandle::new(),
            permission_granted: AtomicBool::new(false),
            starting: AtomicBool::new(false),
            next_session_id: AtomicU64::new(0),
            active: Arc::new(Mutex::new(None)),
            metrics: CaptureMetrics::new(),
        }
    }

    /// The single event receiver. Yields `None` after the first call.
    pub fn take_events(&self) -> Option<mpsc::Receiver<CaptureEvent>> {
        self.event_rx.lock().take()
    }

    pub fn state(&self) -> watch::Receiver<CaptureSessionState> {
        self.state_tx.subscribe()
    }

    pub fn level(&self) -> LevelHandle {
        self.level.clone()
    }

    pub fn metrics(&self) -> CaptureMetrics {
        self.metrics.clone()
    }

    /// Ask for microphone + speech-recognition consent. Idempotent; a prior
    /// grant is cached and returned without re-prompting. Never errors.
    pub async fn request_permission(&self) -> bool {
        if self.permission_granted.load(Ordering::Acquire) {
            return true;
        }
        let was_idle = *self.state_tx.borrow() == CaptureSessionState::Idle;
        if was_idle {
            self.state_tx
                .send_replace(CaptureSessionState::RequestingPermission);
        }
        let granted = self.provider.request_authorization().await;
        if was_idle {
            self.state_tx.send_replace(CaptureSessionState::Idle);
        }
        if granted {
            self.permission_granted.store(true, Ordering::Release);
        } else {
            info!(target: "capture", "speech recognition permission denied");
        }
        granted
    }

    /// Begin a capture session. Rejected with `AlreadyActive` while another
    /// session exists; the existing session is untouched. Returns the new
    /// session id on success.
    pub async fn start(&self) -> Result<u64, CaptureError> {
        if self.starting.swap(true, Ordering::AcqRel) {
            return Err(CaptureError::AlreadyActive);
        }
        let result = self.start_inner().await;
        self.starting.store(false, Ordering::Release);
        result
    }

    async fn start_inner(&self) -> Result<u64, CaptureError> {
        if self.active.lock().is_some() {
            return Err(CaptureError::AlreadyActive);
        }
        if !self.permission_granted.load(Ordering::Acquire) {
            return Err(CaptureError::PermissionDenied);
        }
        if !self.provider.is_available().await {
            return Err(CaptureError::RecognizerUnavailable(
                "recognizer offline or locale unsupported".into(),
            ));
        }

        self.arbiter.acquire(AudioSessionMode::Capture)?;

        let stream = match self
            .provider
            .start_stream(StreamRequest {
                locale: self.config.locale.clone(),
                partial_results: self.config.partial_results,
            })
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                self.arbiter.release(AudioSessionMode::Capture);
                return Err(e);
            }
        };

        let sink = FrameSink::new(
            stream.feed_sender(),
            self.level.clone(),
            self.metrics.frames_dropped.clone(),
        );
        if let Err(e) = self.mic.start(sink.clone()) {
            stream.abort();
            self.arbiter.release(AudioSessionMode::Capture);
            return Err(e);
        }

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        *self.active.lock() = Some(ActiveSession { id, cmd_tx });
        self.state_tx.send_replace(CaptureSessionState::Recording);
        self.metrics.sessions_started.fetch_add(1, Ordering::Relaxed);
        info!(target: "capture", session_id = id, locale = %self.config.locale, "capture session started");

        let actor = SessionActor {
            id,
            silence_timeout: self.config.silence_timeout,
            level_tick: self.config.level_tick,
            stream,
            cmd_rx,
            sink,
            utterance: Utterance::begin(),
            event_tx: self.event_tx.clone(),
            state_tx: self.state_tx.clone(),
            mic: self.mic.clone(),
            arbiter: self.arbiter.clone(),
            active: self.active.clone(),
            metrics: self.metrics.clone(),
        };
        tokio::spawn(actor.run());
        Ok(id)
    }

    /// Graceful stop: finalize with the transcript collected so far. No-op
    /// when no session is active.
    pub fn stop(&self) {
        if let Some(active) = self.active.lock().as_ref() {
            let _ = active.cmd_tx.send(SessionCmd::Stop);
        }
    }

    /// Like `stop()` but suppresses the final event. No-op when idle.
    pub fn cancel(&self) {
        if let Some(active) = self.active.lock().as_ref() {
            let _ = active.cmd_tx.send(SessionCmd::Cancel);
        }
    }
}

struct SessionActor {
    id: u64,
    silence_timeout: Duration,
    level_tick: Duration,
    stream: RecognitionStream,
    cmd_rx: mpsc::UnboundedReceiver<SessionCmd>,
    sink: FrameSink,
    utterance: Utterance,
    event_tx: mpsc::Sender<CaptureEvent>,
    state_tx: Arc<watch::Sender<CaptureSessionState>>,
    mic: Arc<dyn MicrophoneInput>,
    arbiter: Arc<AudioSessionArbiter>,
    active: Arc<Mutex<Option<ActiveSession>>>,
    metrics: CaptureMetrics,
}

impl SessionActor {
    async fn run(mut self) {
        let mut silence_deadline = Instant::now() + self.silence_timeout;
        let mut meter = tokio::time::interval(self.level_tick);
        meter.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(SessionCmd::Stop) => {
                        self.finalize(None, "explicit stop").await;
                        return;
                    }
                    // A dropped handle tears down like a cancel.
                    Some(SessionCmd::Cancel) | None => {
                        self.cancelled();
                        return;
                    }
                },
                update = self.stream.next_update() => match update {
                    Some(RecognitionUpdate::Partial(text)) => {
                        silence_deadline = Instant::now() + self.silence_timeout;
                        self.utterance.transcript = text.clone();
                        self.metrics.partial_count.fetch_add(1, Ordering::Relaxed);
                        let _ = self.event_tx
                            .send(CaptureEvent::Partial { session_id: self.id, text })
                            .await;
                    }
                    Some(RecognitionUpdate::Final(text)) => {
                        self.finalize(Some(text), "recognizer final").await;
                        return;
                    }
                    Some(RecognitionUpdate::Error { message }) => {
                        self.failed(message).await;
                        return;
                    }
                    // Engine dropped its end without a final.
                    None => {
                        self.failed("recognition stream closed".into()).await;
                        return;
                    }
                },
                _ = tokio::time::sleep_until(silence_deadline) => {
                    self.metrics.silence_timeouts.fetch_add(1, Ordering::Relaxed);
                    self.finalize(None, "silence timeout").await;
                    return;
                }
                _ = meter.tick() => {
                    if self.sink.idle_for() >= self.level_tick {
                        self.sink.decay_tick();
                    }
                }
            }
        }
    }

    /// The single finalization path shared by silence timeout, explicit stop
    /// and recognizer-final.
    async fn finalize(&mut self, override_text: Option<String>, reason: &str) {
        self.state_tx.send_replace(CaptureSessionState::Finishing);
        if let Some(text) = override_text {
            self.utterance.transcript = text;
        }
        self.utterance.is_final = true;
        self.utterance.ended_at = Some(Utc::now());
        debug!(
            target: "capture",
            session_id = self.id,
            reason,
            transcript_len = self.utterance.transcript.len(),
            "finalizing capture session"
        );
        self.stream.finish();
        // Tear down before announcing: a consumer reacting to the final may
        // start a fresh session immediately and must not collide with this
        // one's teardown.
        self.teardown();
        let event = CaptureEvent::Final {
            session_id: self.id,
            utterance: self.utterance.clone(),
        };
        if self.event_tx.send(event).await.is_err() {
            warn!(target: "capture", session_id = self.id, "no consumer for final transcript");
        }
        self.metrics.final_count.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .sessions_completed
            .fetch_add(1, Ordering::Relaxed);
    }

    fn cancelled(&mut self) {
        debug!(target: "capture", session_id = self.id, "capture session cancelled");
        self.metrics
            .sessions_cancelled
            .fetch_add(1, Ordering::Relaxed);
        self.stream.abort();
        self.teardown();
    }

    async fn failed(&mut self, message: String) {
        self.state_tx.send_replace(CaptureSessionState::Failed);
        warn!(target: "capture", session_id = self.id, error = %message, "recognizer failure mid-session");
        let recovered = if self.utterance.transcript.trim().is_empty() {
            None
        } else {
            Some(self.utterance.transcript.clone())
        };
        let _ = self
            .event_tx
            .send(CaptureEvent::Error {
                session_id: self.id,
                kind: CaptureErrorKind::RecognizerFailed,
                message,
                recovered_transcript: recovered,
            })
            .await;
        self.metrics.sessions_failed.fetch_add(1, Ordering::Relaxed);
        self.stream.abort();
        self.teardown();
    }

    /// Best-effort teardown of the audio path; never blocks callers.
    fn teardown(&mut self) {
        self.mic.stop();
        self.arbiter.release(AudioSessionMode::Capture);
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|a| a.id == self.id) {
            *active = None;
        }
        drop(active);
        // Meter snaps to rest once the session is gone.
        self.sink.decay_to_zero();
        self.state_tx.send_replace(CaptureSessionState::Idle);
    }
}
