use thiserror::Error;

use crate::audio_session::AudioSessionMode;

#[derive(Error, Debug)]
pub enum AudioSessionError {
    #[error("audio session busy: held for {held:?}, requested {requested:?}")]
    Busy {
        held: AudioSessionMode,
        requested: AudioSessionMode,
    },

    #[error("audio session activation failed: {0}")]
    ActivationFailed(String),

    #[error("audio session deactivation failed: {0}")]
    DeactivationFailed(String),
}
