//! Monotonic clocks measured in seconds, as playback start times are.

use std::sync::atomic::{AtomicU64, Ordering};

/// Trait for time operations, allowing mock time in tests.
pub trait Clock: Send + Sync {
    /// Seconds since the clock's origin. Never decreases.
    fn now(&self) -> f64;
}

/// Clock driven by the number of frames an output device has rendered.
///
/// This is the audio device's own notion of time, so scheduled start times
/// line up with what is actually heard.
#[derive(Debug)]
pub struct SampleClock {
    frames: AtomicU64,
    sample_rate: u32,
}

impl SampleClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: AtomicU64::new(0),
            sample_rate,
        }
    }

    /// Called from the render callback after `frames` have been produced.
    pub fn advance_frames(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::Relaxed);
    }

    /// Total frames rendered so far.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Clock for SampleClock {
    fn now(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Manually driven clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            bits: AtomicU64::new(start.to_bits()),
        }
    }

    pub fn set(&self, seconds: f64) {
        self.bits.store(seconds.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}
