//! Foundation layer for the Talkover voice-interaction core.
//!
//! Holds the pieces every other crate leans on: the shared audio-session
//! arbiter that keeps microphone capture and speech playback from fighting
//! over the platform audio resource, and the error types for that arbitration.

pub mod audio_session;
pub mod error;

pub use audio_session::{
    AudioSessionArbiter, AudioSessionControl, AudioSessionMode, NoopAudioSession,
};
pub use error::AudioSessionError;
