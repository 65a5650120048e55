use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared counters for capture-session monitoring. Cheap to clone; every
/// handle observes the same underlying atomics.
#[derive(Clone, Default)]
pub struct CaptureMetrics {
    pub sessions_started: Arc<AtomicU64>,
    pub sessions_completed: Arc<AtomicU64>,
    pub sessions_cancelled: Arc<AtomicU64>,
    pub sessions_failed: Arc<AtomicU64>,
    pub partial_count: Arc<AtomicU64>,
    pub final_count: Arc<AtomicU64>,
    pub silence_timeouts: Arc<AtomicU64>,
    pub frames_dropped: Arc<AtomicU64>,
}

impl CaptureMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy for logging or assertions.
    pub fn snapshot(&self) -> CaptureMetricsSnapshot {
        CaptureMetricsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_cancelled: self.sessions_cancelled.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            partial_count: self.partial_count.load(Ordering::Relaxed),
            final_count: self.final_count.load(Ordering::Relaxed),
            silence_timeouts: self.silence_timeouts.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureMetricsSnapshot {
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_cancelled: u64,
    pub sessions_failed: u64,
    pub partial_count: u64,
    pub final_count: u64,
    pub silence_timeouts: u64,
    pub frames_dropped: u64,
}
