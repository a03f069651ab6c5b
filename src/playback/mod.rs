//! Playback of streamed response audio.

pub mod clock;
pub mod scheduler;

pub use clock::{Clock, ManualClock, SampleClock};
pub use scheduler::{EndedNotifier, PlaybackId, PlaybackScheduler, PlaybackUnit};
