//! Speech output for the Talkover voice-interaction core.
//!
//! Serializes text-to-speech playback behind a single coordinator and hands
//! the shared audio session back and forth with capture through the
//! foundation arbiter. The synthesis engine is an injected seam; a scripted
//! double ships in-tree.

pub mod coordinator;
pub mod error;
pub mod provider;
pub mod scripted;
pub mod voice;

pub use coordinator::{SpeakTicket, SpeechOutputCoordinator, SpeechOutputEvent, SpeechParams};
pub use error::SpeakError;
pub use provider::{PlaybackDriver, PlaybackEvent, PlaybackHandle, SpeechRequest, SpeechSynthesisProvider};
pub use scripted::ScriptedSynthesizer;
pub use voice::{resolve_voice, VoiceInfo};
