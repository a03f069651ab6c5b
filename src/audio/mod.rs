//! Audio capture and the platform capability layer.
//!
//! ```text
//! ┌────────────┐    ┌────────────┐    ┌──────────┐    ┌────────────┐
//! │ Microphone │───▶│ High-pass  │───▶│  Framer  │───▶│ Frame sink │───▶ transport
//! │  (16 kHz)  │    │  (85 Hz)   │    │  (2048)  │    │            │
//! └────────────┘    └────────────┘    └──────────┘    └────────────┘
//! ```

pub mod capture;
#[cfg(feature = "cpal-audio")]
pub mod cpal_backend;
pub mod filter;
pub mod mock;
pub mod platform;

pub use capture::{ActiveCapture, CaptureConfig, CapturePipeline, FrameSink};
pub use filter::HighPassFilter;
pub use mock::MockAudioPlatform;
pub use platform::{
    AudioPlatform, EndedCallback, ErrorCallback, InputContext, MicConstraints, MicrophoneStream,
    OutputContext, PlaybackHandle, SampleCallback, classify_acquisition_failure,
};
