//! Audio level estimation for the voice UI meter.
//!
//! Converts raw PCM frames into a smoothed loudness value in [0, 1]:
//! RMS over the frame, mapped to dBFS, normalized against a fixed dB window,
//! then exponentially smoothed against the previous value so the meter does
//! not jitter. A caller-driven decay tick lets the meter settle to zero once
//! frames stop arriving instead of freezing at the last value.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Normalization window: levels at or below the floor render as 0.0,
/// at or above the ceiling as 1.0.
pub const LEVEL_DB_FLOOR: f32 = -55.0;
pub const LEVEL_DB_CEIL: f32 = -5.0;

const SMOOTH_PREV: f32 = 0.3;
const SMOOTH_NEW: f32 = 0.7;
const DECAY_FACTOR: f32 = 0.85;
// Below this the decayed level snaps to exactly 0.0 so the meter settles
// in a bounded number of ticks.
const SETTLE_FLOOR: f32 = 1e-3;

/// Smoothed loudness estimator. No state beyond the last emitted value.
#[derive(Debug, Default)]
pub struct AudioLevelEstimator {
    smoothed: f32,
}

impl AudioLevelEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one frame of i16 PCM into the smoothed level and return it.
    pub fn process_frame(&mut self, samples: &[i16]) -> f32 {
        let normalized = normalize_db(dbfs(rms(samples)));
        self.smoothed = self.smoothed * SMOOTH_PREV + normalized * SMOOTH_NEW;
        self.smoothed
    }

    /// Advance one decay step without input. Monotonically decreases toward
    /// zero and reaches exactly 0.0 once below the settle floor.
    pub fn decay_tick(&mut self) -> f32 {
        self.smoothed *= DECAY_FACTOR;
        if self.smoothed < SETTLE_FLOOR {
            self.smoothed = 0.0;
        }
        self.smoothed
    }

    pub fn level(&self) -> f32 {
        self.smoothed
    }

    pub fn reset(&mut self) {
        self.smoothed = 0.0;
    }
}

fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: i64 = samples
        .iter()
        .map(|&s| {
            let s = s as i64;
            s * s
        })
        .sum();
    let mean_square = sum_squares as f64 / samples.len() as f64;
    (mean_square.sqrt() / 32768.0) as f32
}

fn dbfs(rms: f32) -> f32 {
    if rms <= 1e-10 {
        return -100.0;
    }
    20.0 * rms.log10()
}

fn normalize_db(db: f32) -> f32 {
    ((db - LEVEL_DB_FLOOR) / (LEVEL_DB_CEIL - LEVEL_DB_FLOOR)).clamp(0.0, 1.0)
}

/// Lock-free publication point for the current level. The audio callback
/// thread stores, the UI thread loads; f32 bits travel through an `AtomicU32`.
#[derive(Debug, Clone, Default)]
pub struct LevelHandle {
    bits: Arc<AtomicU32>,
}

impl LevelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, level: f32) {
        self.bits.store(level.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }
}
