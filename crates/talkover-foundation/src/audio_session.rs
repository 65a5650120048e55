//! Shared audio-session arbitration.
//!
//! Capture (microphone recording) and playback (speech synthesis) are
//! mutually exclusive users of the platform audio session. The arbiter
//! serializes ownership: a holder must release its mode before the other
//! side can acquire. Platform activation/deactivation is delegated to an
//! injected [`AudioSessionControl`], so the arbiter itself stays pure
//! bookkeeping and is trivially testable.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::AudioSessionError;

/// Who currently owns the platform audio session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSessionMode {
    Inactive,
    Capture,
    Playback,
}

/// Platform toggle for the underlying audio session.
///
/// Implementations talk to whatever the host platform provides. The arbiter
/// never retries `activate`; `deactivate` failures are logged and swallowed
/// since they do not affect logical ownership.
pub trait AudioSessionControl: Send + Sync {
    fn activate(&self, mode: AudioSessionMode) -> Result<(), AudioSessionError>;
    fn deactivate(&self) -> Result<(), AudioSessionError>;
}

/// Control implementation that accepts every toggle. Default for embedders
/// whose platform needs no explicit session management, and for tests.
#[derive(Debug, Default)]
pub struct NoopAudioSession;

impl AudioSessionControl for NoopAudioSession {
    fn activate(&self, _mode: AudioSessionMode) -> Result<(), AudioSessionError> {
        Ok(())
    }

    fn deactivate(&self) -> Result<(), AudioSessionError> {
        Ok(())
    }
}

/// Mutual-exclusion gate over the shared audio session.
pub struct AudioSessionArbiter {
    mode: Mutex<AudioSessionMode>,
    control: Arc<dyn AudioSessionControl>,
}

impl AudioSessionArbiter {
    pub fn new(control: Arc<dyn AudioSessionControl>) -> Self {
        Self {
            mode: Mutex::new(AudioSessionMode::Inactive),
            control,
        }
    }

    /// Arbiter backed by a no-op platform toggle.
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopAudioSession))
    }

    pub fn current(&self) -> AudioSessionMode {
        *self.mode.lock()
    }

    /// Claim the session for `mode`. Re-acquiring the mode already held is
    /// allowed (no platform toggle). Acquiring while the other mode is held
    /// fails with `Busy` — callers are expected to stop the other side first.
    pub fn acquire(&self, mode: AudioSessionMode) -> Result<(), AudioSessionError> {
        debug_assert_ne!(mode, AudioSessionMode::Inactive);
        let mut held = self.mode.lock();
        match *held {
            AudioSessionMode::Inactive => {
                self.control.activate(mode)?;
                debug!(target: "audio_session", ?mode, "audio session acquired");
                *held = mode;
                Ok(())
            }
            current if current == mode => Ok(()),
            current => Err(AudioSessionError::Busy {
                held: current,
                requested: mode,
            }),
        }
    }

    /// Release the session if `mode` is the current holder. Releasing a mode
    /// that is not held is a no-op, so teardown paths can call this blindly.
    pub fn release(&self, mode: AudioSessionMode) {
        let mut held = self.mode.lock();
        if *held != mode {
            return;
        }
        *held = AudioSessionMode::Inactive;
        drop(held);
        if let Err(e) = self.control.deactivate() {
            // Deactivation failure does not change logical ownership.
            warn!(target: "audio_session", error = %e, "audio session deactivation failed");
        } else {
            debug!(target: "audio_session", ?mode, "audio session released");
        }
    }
}
