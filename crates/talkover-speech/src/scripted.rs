//! Scripted synthesis double: plays nothing, reports a plausible lifecycle.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::SpeakError;
use crate::provider::{PlaybackEvent, PlaybackHandle, SpeechRequest, SpeechSynthesisProvider};
use crate::voice::VoiceInfo;

/// Scripted [`SpeechSynthesisProvider`]. Every request emits `Started`
/// immediately, then `Finished` after a fixed playback duration unless
/// cancelled first. Requests are recorded for assertions.
pub struct ScriptedSynthesizer {
    voices: Vec<VoiceInfo>,
    playback_duration: Duration,
    requests: Mutex<Vec<SpeechRequest>>,
    fail_next: Mutex<Option<SpeakError>>,
}

impl ScriptedSynthesizer {
    pub fn new(voices: Vec<VoiceInfo>, playback_duration: Duration) -> Self {
        Self {
            voices,
            playback_duration,
            requests: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
        }
    }

    pub fn fail_next(&self, error: SpeakError) {
        *self.fail_next.lock() = Some(error);
    }

    pub fn requests(&self) -> Vec<SpeechRequest> {
        self.requests.lock().clone()
    }

    pub fn spoken_texts(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.text.clone()).collect()
    }
}

impl Default for ScriptedSynthesizer {
    fn default() -> Self {
        Self::new(Vec::new(), Duration::from_secs(1))
    }
}

#[async_trait]
impl SpeechSynthesisProvider for ScriptedSynthesizer {
    async fn list_voices(&self) -> Result<Vec<VoiceInfo>, SpeakError> {
        Ok(self.voices.clone())
    }

    async fn speak(&self, request: SpeechRequest) -> Result<PlaybackHandle, SpeakError> {
        if let Some(error) = self.fail_next.lock().take() {
            return Err(error);
        }
        self.requests.lock().push(request);
        let (handle, mut driver) = PlaybackHandle::channel();
        let duration = self.playback_duration;
        tokio::spawn(async move {
            let _ = driver.events_tx.send(PlaybackEvent::Started).await;
            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    let _ = driver.events_tx.send(PlaybackEvent::Finished).await;
                }
                _ = driver.cancel_rx.recv() => {
                    let _ = driver.events_tx.send(PlaybackEvent::Cancelled).await;
                }
            }
        });
        Ok(handle)
    }
}
