//! Speech capture for the Talkover voice-interaction core.
//!
//! Owns the microphone capture pipeline and an incremental transcription
//! stream: partial/final transcript events, trailing-silence detection, and
//! a loudness meter for the voice UI. The recognition engine and the
//! microphone are injected collaborator seams; scripted doubles for both
//! ship in-tree.

pub mod error;
pub mod level;
pub mod metrics;
pub mod provider;
pub mod scripted;
pub mod session;

pub use error::{CaptureError, CaptureErrorKind};
pub use level::{AudioLevelEstimator, LevelHandle};
pub use metrics::{CaptureMetrics, CaptureMetricsSnapshot};
pub use provider::{
    FrameSink, MicrophoneInput, RecognitionStream, RecognitionStreamDriver, RecognitionUpdate,
    SpeechRecognitionProvider, StreamControl, StreamRequest,
};
pub use scripted::{ScriptedMicrophone, ScriptedRecognizer, ScriptedStream, UtteranceScript};
pub use session::{
    CaptureConfig, CaptureEvent, CaptureSessionState, Utterance, UtteranceCaptureSession,
};
