use thiserror::Error;

use talkover_foundation::AudioSessionError;

#[derive(Error, Debug)]
pub enum SpeakError {
    #[error("speech synthesizer unavailable: {0}")]
    SynthesizerUnavailable(String),

    #[error("synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error(transparent)]
    AudioSession(#[from] AudioSessionError),
}
