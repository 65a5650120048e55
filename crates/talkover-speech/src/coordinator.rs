//! Serializes text-to-speech playback and arbitrates the shared audio
//! session with capture.
//!
//! Interrupt semantics: the latest `speak()` wins, there is no queue. The
//! shared audio resource is released only after a short grace delay past the
//! end of playback so back-to-back replies do not thrash the platform
//! session toggle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use talkover_foundation::{AudioSessionArbiter, AudioSessionMode};

use crate::error::SpeakError;
use crate::provider::{PlaybackEvent, PlaybackHandle, SpeechRequest, SpeechSynthesisProvider};
use crate::voice::{resolve_voice, VoiceInfo};

/// Speech parameters applied to every request.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SpeechParams {
    /// Playback rate multiplier; 1.0 is natural.
    pub rate: f32,
    pub preferred_voice: Option<String>,
    pub preferred_language: Option<String>,
}

impl Default for SpeechParams {
    fn default() -> Self {
        Self {
            rate: 1.0,
            preferred_voice: None,
            preferred_language: Some("vi-VN".to_string()),
        }
    }
}

/// Lifecycle events published per spoken utterance.
#[derive(Debug, Clone)]
pub enum SpeechOutputEvent {
    Started { utterance_id: u64 },
    Finished { utterance_id: u64 },
    Cancelled { utterance_id: u64 },
    Failed { utterance_id: u64, message: String },
}

/// Receipt for one accepted `speak()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeakTicket {
    pub utterance_id: u64,
}

struct CurrentPlayback {
    id: u64,
    cancel: mpsc::UnboundedSender<()>,
}

/// Owns the current "speaking" resource.
pub struct SpeechOutputCoordinator {
    provider: Arc<dyn SpeechSynthesisProvider>,
    arbiter: Arc<AudioSessionArbiter>,
    params: Mutex<SpeechParams>,
    release_grace: Duration,
    events_tx: broadcast::Sender<SpeechOutputEvent>,
    current: Arc<Mutex<Option<CurrentPlayback>>>,
    /// Bumped on every claim or synchronous release; a pending grace-release
    /// task gives up when it no longer matches.
    claim_seq: Arc<AtomicU64>,
    next_id: AtomicU64,
}

impl SpeechOutputCoordinator {
    pub fn new(
        provider: Arc<dyn SpeechSynthesisProvider>,
        arbiter: Arc<AudioSessionArbiter>,
        params: SpeechParams,
        release_grace: Duration,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(32);
        Self {
            provider,
            arbiter,
            params: Mutex::new(params),
            release_grace,
            events_tx,
            current: Arc::new(Mutex::new(None)),
            claim_seq: Arc::new(AtomicU64::new(0)),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpeechOutputEvent> {
        self.events_tx.subscribe()
    }

    /// Atomically swap the speech parameters used for subsequent requests.
    pub fn set_params(&self, params: SpeechParams) {
        *self.params.lock() = params;
    }

    /// Speak `text`, interrupting any current playback.
    pub async fn speak(&self, text: &str) -> Result<SpeakTicket, SpeakError> {
        self.stop();

        let params = self.params.lock().clone();
        let voices = match self.provider.list_voices().await {
            Ok(voices) => voices,
            Err(e) => {
                warn!(target: "speech", error = %e, "voice listing failed, using provider default");
                Vec::new()
            }
        };
        let voice = resolve_voice(
            params.preferred_voice.as_deref(),
            params.preferred_language.as_deref(),
            &voices,
        );

        self.arbiter.acquire(AudioSessionMode::Playback)?;
        let claim = self.claim_seq.fetch_add(1, Ordering::Relaxed) + 1;

        let handle = match self
            .provider
            .speak(SpeechRequest {
                text: text.to_string(),
                rate: params.rate,
                voice,
            })
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                if self.claim_seq.load(Ordering::Relaxed) == claim {
                    self.arbiter.release(AudioSessionMode::Playback);
                }
                return Err(e);
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        *self.current.lock() = Some(CurrentPlayback {
            id,
            cancel: handle.cancel_sender(),
        });
        info!(target: "speech", utterance_id = id, chars = text.len(), "playback started");

        tokio::spawn(monitor_playback(
            handle,
            id,
            claim,
            self.events_tx.clone(),
            self.current.clone(),
            self.claim_seq.clone(),
            self.arbiter.clone(),
            self.release_grace,
        ));

        Ok(SpeakTicket { utterance_id: id })
    }

    /// Cancel current playback, if any, and release the shared audio
    /// resource immediately. Idempotent and synchronous: a capture session
    /// can acquire the resource as soon as this returns.
    pub fn stop(&self) {
        let mut current = self.current.lock();
        if let Some(playback) = current.take() {
            debug!(target: "speech", utterance_id = playback.id, "stopping playback");
            let _ = playback.cancel.send(());
        }
        drop(current);
        self.claim_seq.fetch_add(1, Ordering::Relaxed);
        self.arbiter.release(AudioSessionMode::Playback);
    }

    pub fn is_speaking(&self) -> bool {
        self.current.lock().is_some()
    }
}

#[allow(clippy::too_many_arguments)]
async fn monitor_playback(
    mut handle: PlaybackHandle,
    id: u64,
    claim: u64,
    events_tx: broadcast::Sender<SpeechOutputEvent>,
    current: Arc<Mutex<Option<CurrentPlayback>>>,
    claim_seq: Arc<AtomicU64>,
    arbiter: Arc<AudioSessionArbiter>,
    release_grace: Duration,
) {
    let mut terminal = None;
    while let Some(event) = handle.next_event().await {
        match event {
            PlaybackEvent::Started => {
                let _ = events_tx.send(SpeechOutputEvent::Started { utterance_id: id });
            }
            PlaybackEvent::Finished => {
                terminal = Some(SpeechOutputEvent::Finished { utterance_id: id });
                break;
            }
            PlaybackEvent::Cancelled => {
                terminal = Some(SpeechOutputEvent::Cancelled { utterance_id: id });
                break;
            }
            PlaybackEvent::Failed { message } => {
                warn!(target: "speech", utterance_id = id, error = %message, "synthesis failed");
                terminal = Some(SpeechOutputEvent::Failed {
                    utterance_id: id,
                    message,
                });
                break;
            }
        }
    }
    // A provider that drops its driver without a terminal event reads as a
    // cancellation.
    let terminal = terminal.unwrap_or(SpeechOutputEvent::Cancelled { utterance_id: id });

    {
        let mut current = current.lock();
        if current.as_ref().is_some_and(|c| c.id == id) {
            *current = None;
        }
    }
    let _ = events_tx.send(terminal);

    // Grace delay before giving the audio session back, skipped when a newer
    // speak() or an explicit stop has touched the claim in the meantime.
    tokio::time::sleep(release_grace).await;
    if claim_seq.load(Ordering::Relaxed) == claim && current.lock().is_none() {
        debug!(target: "speech", utterance_id = id, "releasing audio session after grace");
        arbiter.release(AudioSessionMode::Playback);
    }
}
