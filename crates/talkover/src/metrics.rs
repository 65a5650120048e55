use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared counters for turn-level monitoring. Cheap to clone; every handle
/// observes the same underlying atomics.
#[derive(Clone, Default)]
pub struct TurnMetrics {
    pub voice_turns_started: Arc<AtomicU64>,
    pub typed_turns: Arc<AtomicU64>,
    pub commits: Arc<AtomicU64>,
    pub backend_failures: Arc<AtomicU64>,
    pub rejected_attempts: Arc<AtomicU64>,
    pub empty_utterances: Arc<AtomicU64>,
    pub dismissals: Arc<AtomicU64>,
}

impl TurnMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> TurnMetricsSnapshot {
        TurnMetricsSnapshot {
            voice_turns_started: self.voice_turns_started.load(Ordering::Relaxed),
            typed_turns: self.typed_turns.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            backend_failures: self.backend_failures.load(Ordering::Relaxed),
            rejected_attempts: self.rejected_attempts.load(Ordering::Relaxed),
            empty_utterances: self.empty_utterances.load(Ordering::Relaxed),
            dismissals: self.dismissals.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnMetricsSnapshot {
    pub voice_turns_started: u64,
    pub typed_turns: u64,
    pub commits: u64,
    pub backend_failures: u64,
    pub rejected_attempts: u64,
    pub empty_utterances: u64,
    pub dismissals: u64,
}
