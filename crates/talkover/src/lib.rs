//! Talkover: a voice-interaction core for chat UIs.
//!
//! The crate is a library-level state machine meant to be embedded behind a
//! UI. It coordinates microphone capture, streaming transcription, silence
//! detection, a takeover voice overlay, and handoff to a conversational
//! backend, while arbitrating audio-session ownership with text-to-speech
//! playback.
//!
//! Entry point is [`ConversationTurnController`]; capture and speech output
//! live in the `talkover-capture` and `talkover-speech` crates, re-exported
//! here for convenience.

pub mod backend;
pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod metrics;
pub mod store;

pub use backend::{select_backend, BackendError, ChatBackend, ConfigNotice, MockBackend};
pub use command::VoiceCommand;
pub use config::ChatConfiguration;
pub use controller::{
    ConversationTurn, ConversationTurnController, TurnDeps, TurnOrigin, TurnPhase, TurnStatus,
    TurnUpdate,
};
pub use error::TurnError;
pub use metrics::{TurnMetrics, TurnMetricsSnapshot};
pub use store::{Conversation, ConversationStore, MemoryStore, Message, Role, StoreError};

pub use talkover_capture as capture;
pub use talkover_foundation as foundation;
pub use talkover_speech as speech;
