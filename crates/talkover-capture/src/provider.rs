//! Collaborator seams for the capture session: the speech-recognition
//! provider and the microphone input. Both are injected; the session never
//! constructs a platform engine itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::CaptureError;
use crate::level::{AudioLevelEstimator, LevelHandle};

/// Parameters for opening a streaming recognition attempt.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// BCP-47 locale tag, e.g. "vi-VN".
    pub locale: String,
    /// Ask the engine for incremental partial results.
    pub partial_results: bool,
}

/// Incremental output of a recognition stream.
#[derive(Debug, Clone)]
pub enum RecognitionUpdate {
    /// Evolving transcript; each update replaces the previous text.
    Partial(String),
    /// Engine-signaled finality for the whole utterance.
    Final(String),
    /// Mid-stream engine failure. The stream is dead after this.
    Error { message: String },
}

/// Teardown signals sent back to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamControl {
    /// Graceful stop; the engine may flush but the session does not wait.
    Finish,
    /// Abandon the attempt; no further output is wanted.
    Abort,
}

/// Consumer half of a streaming recognition attempt.
///
/// The provider constructs the pair with [`RecognitionStream::channel`] and
/// drives the [`RecognitionStreamDriver`] from its engine task; the capture
/// session owns this half.
pub struct RecognitionStream {
    feed_tx: mpsc::Sender<Vec<i16>>,
    control_tx: mpsc::UnboundedSender<StreamControl>,
    updates_rx: mpsc::Receiver<RecognitionUpdate>,
}

/// Engine half of a recognition stream.
pub struct RecognitionStreamDriver {
    pub audio_rx: mpsc::Receiver<Vec<i16>>,
    pub control_rx: mpsc::UnboundedReceiver<StreamControl>,
    pub updates_tx: mpsc::Sender<RecognitionUpdate>,
}

impl RecognitionStream {
    pub fn channel(audio_capacity: usize) -> (RecognitionStream, RecognitionStreamDriver) {
        let (feed_tx, audio_rx) = mpsc::channel(audio_capacity);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (updates_tx, updates_rx) = mpsc::channel(64);
        (
            RecognitionStream {
                feed_tx,
                control_tx,
                updates_rx,
            },
            RecognitionStreamDriver {
                audio_rx,
                control_rx,
                updates_tx,
            },
        )
    }

    /// Cloneable audio feed, handed to the microphone frame sink.
    pub fn feed_sender(&self) -> mpsc::Sender<Vec<i16>> {
        self.feed_tx.clone()
    }

    pub async fn next_update(&mut self) -> Option<RecognitionUpdate> {
        self.updates_rx.recv().await
    }

    /// Fire-and-forget; an already-gone engine is not an error here.
    pub fn finish(&self) {
        let _ = self.control_tx.send(StreamControl::Finish);
    }

    pub fn abort(&self) {
        let _ = self.control_tx.send(StreamControl::Abort);
    }
}

/// Streaming speech recognition capability.
#[async_trait]
pub trait SpeechRecognitionProvider: Send + Sync {
    /// Ask the platform for speech-recognition consent. Idempotent; absence
    /// of permission is a normal `false`, never an error.
    async fn request_authorization(&self) -> bool;

    /// Whether the engine can currently serve requests (reachable, locale
    /// supported).
    async fn is_available(&self) -> bool;

    async fn start_stream(
        &self,
        request: StreamRequest,
    ) -> Result<RecognitionStream, CaptureError>;
}

/// Microphone capture capability. `start` is expected to deliver PCM16
/// frames into the sink from the platform's audio callback until `stop`.
pub trait MicrophoneInput: Send + Sync {
    fn start(&self, sink: FrameSink) -> Result<(), CaptureError>;
    fn stop(&self);
}

/// Fan-out point for captured audio: every pushed frame updates the level
/// meter and is forwarded to the recognition stream. Cheap to clone so the
/// platform callback can hold its own copy.
#[derive(Clone)]
pub struct FrameSink {
    inner: Arc<FrameSinkInner>,
}

struct FrameSinkInner {
    estimator: Mutex<AudioLevelEstimator>,
    level: LevelHandle,
    feed_tx: mpsc::Sender<Vec<i16>>,
    last_frame: Mutex<Instant>,
    frames_dropped: Arc<AtomicU64>,
}

impl FrameSink {
    pub(crate) fn new(
        feed_tx: mpsc::Sender<Vec<i16>>,
        level: LevelHandle,
        frames_dropped: Arc<AtomicU64>,
    ) -> Self {
        Self {
            inner: Arc::new(FrameSinkInner {
                estimator: Mutex::new(AudioLevelEstimator::new()),
                level,
                feed_tx,
                last_frame: Mutex::new(Instant::now()),
                frames_dropped,
            }),
        }
    }

    /// Called from the audio callback. Never blocks: a full recognition
    /// queue drops the frame and counts it.
    pub fn push(&self, samples: &[i16]) {
        let level = self.inner.estimator.lock().process_frame(samples);
        self.inner.level.store(level);
        *self.inner.last_frame.lock() = Instant::now();
        if self.inner.feed_tx.try_send(samples.to_vec()).is_err() {
            self.inner.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn idle_for(&self) -> std::time::Duration {
        self.inner.last_frame.lock().elapsed()
    }

    pub(crate) fn decay_tick(&self) {
        let level = self.inner.estimator.lock().decay_tick();
        self.inner.level.store(level);
    }

    pub(crate) fn decay_to_zero(&self) {
        self.inner.estimator.lock().reset();
        self.inner.level.store(0.0);
    }
}
