//! Threshold-duration detectors fed one accelerometer sample per tick.
//!
//! A detector only changes status once the matching accumulator reaches its
//! configured duration. Accumulators stop growing at that point and restart
//! from zero when the triggering condition flips.

pub mod detect_6d;
pub mod free_fall;
pub mod wake_up;

pub use detect_6d::{Detect6d, Detect6dConf, Orientation};
pub use free_fall::{FreeFall, FreeFallConf, FreeFallStatus};
pub use wake_up::{WakeStatus, WakeUp, WakeUpConf};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DetectorInput {
    /// Acceleration in g.
    pub acc: [f32; 3],
    /// Seconds since the previous sample.
    pub dtime: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DurationAccumulator {
    elapsed: f32,
}

impl DurationAccumulator {
    pub const fn new() -> Self {
        Self { elapsed: 0.0 }
    }

    /// Adds `dtime` unless `target` was already reached; returns whether it
    /// has been reached now.
    pub fn advance(&mut self, dtime: f32, target: f32) -> bool {
        if self.elapsed < target {
            self.elapsed += dtime;
        }
        self.reached(target)
    }

    pub fn reached(&self, target: f32) -> bool {
        self.elapsed >= target
    }

    pub fn reset(&mut self) {
        self.elapsed = 0.0;
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }
}
