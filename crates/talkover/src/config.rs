//! Explicit, immutable configuration for the turn controller.
//!
//! Everything that used to be ambient (backend choice, voice, rate, tuning
//! constants) travels in one struct handed to the controller constructor and
//! swapped atomically via `apply_configuration`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use talkover_capture::CaptureConfig;
use talkover_speech::SpeechParams;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfiguration {
    /// System prompt sent with every backend request.
    pub system_prompt: String,
    /// Recognition locale, BCP-47.
    pub locale: String,
    /// Quick-suggestion chips shown while prompting.
    pub suggestions: Vec<String>,
    /// Hand assistant replies to the speech coordinator after a successful
    /// voice turn.
    pub speak_replies: bool,
    pub speech: SpeechParams,
    /// Trailing silence that finalizes an utterance.
    pub silence_timeout: Duration,
    /// How long the frozen transcript is shown before the backend call.
    pub acknowledge_delay: Duration,
    /// How long a transient overlay error stays up before auto-dismissing.
    pub error_dismiss_delay: Duration,
    /// Grace before the playback side releases the shared audio session.
    pub release_grace: Duration,
}

impl Default for ChatConfiguration {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful assistant.".to_string(),
            locale: "vi-VN".to_string(),
            suggestions: Vec::new(),
            speak_replies: true,
            speech: SpeechParams::default(),
            silence_timeout: Duration::from_millis(1800),
            acknowledge_delay: Duration::from_millis(700),
            error_dismiss_delay: Duration::from_millis(2500),
            release_grace: Duration::from_millis(300),
        }
    }
}

impl ChatConfiguration {
    /// Capture-session knobs derived from this configuration.
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            locale: self.locale.clone(),
            silence_timeout: self.silence_timeout,
            ..CaptureConfig::default()
        }
    }
}
