use thiserror::Error;

use talkover_foundation::AudioSessionError;

/// Errors surfaced at the capture-session boundary.
///
/// Every provider/platform failure is translated into one of these before it
/// reaches the turn controller; no raw engine errors cross this boundary.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("a capture session is already active")]
    AlreadyActive,

    #[error("microphone or speech-recognition permission not granted")]
    PermissionDenied,

    #[error("speech recognizer unavailable: {0}")]
    RecognizerUnavailable(String),

    #[error("recognizer failed: {0}")]
    RecognizerFailed(String),

    #[error("microphone error: {0}")]
    Microphone(String),

    #[error(transparent)]
    AudioSession(#[from] AudioSessionError),
}

/// Coarse classification carried on [`crate::session::CaptureEvent::Error`]
/// so consumers can map failures onto their own error taxonomy without
/// string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureErrorKind {
    PermissionDenied,
    RecognizerUnavailable,
    RecognizerFailed,
}
