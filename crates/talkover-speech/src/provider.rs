//! Synthesis provider seam. The coordinator never touches a platform
//! synthesis object directly; it consumes lifecycle events from a
//! [`PlaybackHandle`] the provider returns per request.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SpeakError;
use crate::voice::VoiceInfo;

/// One synthesis request.
#[derive(Debug, Clone)]
pub struct SpeechRequest {
    pub text: String,
    /// Playback rate multiplier; 1.0 is the voice's natural rate.
    pub rate: f32,
    /// Resolved voice, or `None` for the provider default.
    pub voice: Option<VoiceInfo>,
}

/// Lifecycle of one playback as reported by the provider.
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    Started,
    Finished,
    Cancelled,
    Failed { message: String },
}

/// Consumer half of one playback. Dropping the handle does not stop
/// playback; send an explicit cancel for that.
pub struct PlaybackHandle {
    events_rx: mpsc::Receiver<PlaybackEvent>,
    cancel_tx: mpsc::UnboundedSender<()>,
}

/// Provider half of one playback.
pub struct PlaybackDriver {
    pub events_tx: mpsc::Sender<PlaybackEvent>,
    pub cancel_rx: mpsc::UnboundedReceiver<()>,
}

impl PlaybackHandle {
    pub fn channel() -> (PlaybackHandle, PlaybackDriver) {
        let (events_tx, events_rx) = mpsc::channel(8);
        let (cancel_tx, cancel_rx) = mpsc::unbounded_channel();
        (
            PlaybackHandle {
                events_rx,
                cancel_tx,
            },
            PlaybackDriver {
                events_tx,
                cancel_rx,
            },
        )
    }

    pub async fn next_event(&mut self) -> Option<PlaybackEvent> {
        self.events_rx.recv().await
    }

    /// Cloneable cancel signal, usable after the handle moved elsewhere.
    pub fn cancel_sender(&self) -> mpsc::UnboundedSender<()> {
        self.cancel_tx.clone()
    }
}

/// Text-to-speech capability.
#[async_trait]
pub trait SpeechSynthesisProvider: Send + Sync {
    async fn list_voices(&self) -> Result<Vec<VoiceInfo>, SpeakError>;

    /// Begin synthesis/playback of `request`. Resolution of the returned
    /// handle's events is asynchronous; `speak` itself only fails for
    /// request-time problems.
    async fn speak(&self, request: SpeechRequest) -> Result<PlaybackHandle, SpeakError>;
}
