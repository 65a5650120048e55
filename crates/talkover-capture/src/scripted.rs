//! Scripted recognition/microphone doubles.
//!
//! Ship in-tree so embedders can exercise the capture session without a
//! platform engine. Two modes: tests pull a [`ScriptedStream`] handle and
//! drive updates by hand; demos queue [`UtteranceScript`]s that play back on
//! a timer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::CaptureError;
use crate::provider::{
    FrameSink, MicrophoneInput, RecognitionStream, RecognitionUpdate, SpeechRecognitionProvider,
    StreamControl, StreamRequest,
};

/// A pre-recorded recognition run for the auto-playing mode.
#[derive(Debug, Clone)]
pub struct UtteranceScript {
    pub partials: Vec<String>,
    /// `None` leaves finalization to the session's silence timer.
    pub final_text: Option<String>,
    /// Pause before each update.
    pub gap: Duration,
}

/// Manual driving handle for one started stream.
pub struct ScriptedStream {
    updates_tx: mpsc::Sender<RecognitionUpdate>,
    pub audio_rx: mpsc::Receiver<Vec<i16>>,
    pub control_rx: mpsc::UnboundedReceiver<StreamControl>,
}

impl ScriptedStream {
    pub async fn partial(&self, text: &str) {
        let _ = self
            .updates_tx
            .send(RecognitionUpdate::Partial(text.to_string()))
            .await;
    }

    pub async fn final_text(&self, text: &str) {
        let _ = self
            .updates_tx
            .send(RecognitionUpdate::Final(text.to_string()))
            .await;
    }

    pub async fn error(&self, message: &str) {
        let _ = self
            .updates_tx
            .send(RecognitionUpdate::Error {
                message: message.to_string(),
            })
            .await;
    }

    pub async fn recv_control(&mut self) -> Option<StreamControl> {
        self.control_rx.recv().await
    }
}

/// Scripted [`SpeechRecognitionProvider`].
pub struct ScriptedRecognizer {
    authorize: AtomicBool,
    available: AtomicBool,
    authorization_delay: Mutex<Duration>,
    fail_next_start: Mutex<Option<CaptureError>>,
    scripts: Mutex<VecDeque<UtteranceScript>>,
    streams_tx: mpsc::UnboundedSender<ScriptedStream>,
    streams_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ScriptedStream>>,
}

impl Default for ScriptedRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRecognizer {
    pub fn new() -> Self {
        let (streams_tx, streams_rx) = mpsc::unbounded_channel();
        Self {
            authorize: AtomicBool::new(true),
            available: AtomicBool::new(true),
            authorization_delay: Mutex::new(Duration::ZERO),
            fail_next_start: Mutex::new(None),
            scripts: Mutex::new(VecDeque::new()),
            streams_tx,
            streams_rx: tokio::sync::Mutex::new(streams_rx),
        }
    }

    /// Recognizer that auto-plays the given scripts, one per started stream.
    pub fn with_scripts(scripts: impl IntoIterator<Item = UtteranceScript>) -> Self {
        let this = Self::new();
        *this.scripts.lock() = scripts.into_iter().collect();
        this
    }

    pub fn push_script(&self, script: UtteranceScript) {
        self.scripts.lock().push_back(script);
    }

    pub fn deny_authorization(&self) {
        self.authorize.store(false, Ordering::SeqCst);
    }

    /// Simulate the system permission dialog staying open for a while.
    pub fn set_authorization_delay(&self, delay: Duration) {
        *self.authorization_delay.lock() = delay;
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn fail_next_start(&self, error: CaptureError) {
        *self.fail_next_start.lock() = Some(error);
    }

    /// Handle for the next stream opened in manual mode. Panics if the
    /// recognizer is gone; test-side only.
    pub async fn next_stream(&self) -> ScriptedStream {
        self.streams_rx
            .lock()
            .await
            .recv()
            .await
            .expect("scripted recognizer dropped")
    }
}

#[async_trait]
impl SpeechRecognitionProvider for ScriptedRecognizer {
    async fn request_authorization(&self) -> bool {
        let delay = *self.authorization_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.authorize.load(Ordering::SeqCst)
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn start_stream(&self, _request: StreamRequest) -> Result<RecognitionStream, CaptureError> {
        if let Some(error) = self.fail_next_start.lock().take() {
            return Err(error);
        }
        let (stream, driver) = RecognitionStream::channel(32);
        if let Some(script) = self.scripts.lock().pop_front() {
            tokio::spawn(play_script(script, driver));
        } else {
            let _ = self.streams_tx.send(ScriptedStream {
                updates_tx: driver.updates_tx,
                audio_rx: driver.audio_rx,
                control_rx: driver.control_rx,
            });
        }
        Ok(stream)
    }
}

async fn play_script(script: UtteranceScript, mut driver: crate::provider::RecognitionStreamDriver) {
    for text in script.partials {
        tokio::time::sleep(script.gap).await;
        if driver
            .updates_tx
            .send(RecognitionUpdate::Partial(text))
            .await
            .is_err()
        {
            return;
        }
    }
    if let Some(text) = script.final_text {
        tokio::time::sleep(script.gap).await;
        let _ = driver
            .updates_tx
            .send(RecognitionUpdate::Final(text))
            .await;
    }
    // Keep the engine ends open until the session tears the stream down,
    // otherwise a closed update channel reads as a mid-stream failure.
    loop {
        tokio::select! {
            control = driver.control_rx.recv() => match control {
                Some(_) | None => return,
            },
            frame = driver.audio_rx.recv() => if frame.is_none() {
                return;
            },
        }
    }
}

/// Scripted [`MicrophoneInput`]: tests feed frames by hand.
#[derive(Default)]
pub struct ScriptedMicrophone {
    sink: Mutex<Option<FrameSink>>,
}

impl ScriptedMicrophone {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push one PCM frame into the active sink. Returns false when no
    /// capture is running.
    pub fn feed(&self, samples: &[i16]) -> bool {
        match self.sink.lock().as_ref() {
            Some(sink) => {
                sink.push(samples);
                true
            }
            None => false,
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.sink.lock().is_some()
    }
}

impl MicrophoneInput for ScriptedMicrophone {
    fn start(&self, sink: FrameSink) -> Result<(), CaptureError> {
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    fn stop(&self) {
        self.sink.lock().take();
    }
}
