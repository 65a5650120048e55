use thiserror::Error;

/// Errors returned by the turn controller's public surface.
#[derive(Error, Debug)]
pub enum TurnError {
    /// Another voice turn or an in-flight backend call blocks this attempt.
    /// Never queued; the user retries.
    #[error("another turn is already in progress")]
    Busy,

    #[error("operation not valid in the current phase")]
    InvalidPhase,

    #[error("input text is empty")]
    EmptyInput,

    /// The capture session's event stream was consumed elsewhere.
    #[error("capture session events already consumed")]
    CaptureEventsTaken,

    #[error("controller has shut down")]
    ControllerClosed,
}
