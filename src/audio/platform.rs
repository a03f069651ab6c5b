//! Audio platform capability interface.
//!
//! The session core never talks to an audio API directly. It asks an
//! [`AudioPlatform`] for an input context, an output context with scheduled
//! playback, and a microphone stream. Real backends (cpal) and the mock used
//! in tests both implement these traits.

use crate::codec::AudioBuffer;
use crate::defaults;
use crate::error::{LivevoxError, Result};
use crate::playback::clock::Clock;
use async_trait::async_trait;
use std::sync::Arc;

/// Invoked once when a scheduled buffer finishes playing on its own.
pub type EndedCallback = Box<dyn FnOnce() + Send>;

/// Receives microphone samples, mono `f32` in [-1, 1], at the context rate.
pub type SampleCallback = Box<dyn FnMut(&[f32]) + Send>;

/// Receives device failures that happen after a stream is running, such as
/// the device being unplugged.
pub type ErrorCallback = Box<dyn FnMut(LivevoxError) + Send>;

/// Constraints negotiated when acquiring the microphone.
#[derive(Debug, Clone, PartialEq)]
pub struct MicConstraints {
    /// Device name, `None` for the platform default.
    pub device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for MicConstraints {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::INPUT_SAMPLE_RATE,
            channels: 1,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Cancellation handle for one scheduled buffer.
pub trait PlaybackHandle: Send {
    /// Stop immediately. The ended callback must not fire afterwards.
    fn stop(&mut self);
}

/// Output audio context with sample-accurate scheduled playback.
pub trait OutputContext: Send {
    fn sample_rate(&self) -> u32;

    /// The context's monotonic clock; start times are expressed against it.
    fn clock(&self) -> Arc<dyn Clock>;

    /// Schedule `buffer` to start at `start_at` seconds on [`Self::clock`].
    fn schedule(
        &mut self,
        buffer: AudioBuffer,
        start_at: f64,
        on_ended: EndedCallback,
    ) -> Result<Box<dyn PlaybackHandle>>;

    /// Report device failures of the running output stream to `on_error`.
    fn set_error_callback(&mut self, on_error: ErrorCallback);

    /// Close the context, silencing everything. Idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Input audio context the microphone stream is processed in.
pub trait InputContext: Send {
    fn sample_rate(&self) -> u32;

    /// Close the context. Idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// An acquired, exclusive microphone stream.
pub trait MicrophoneStream: Send {
    /// Begin delivering samples to `on_samples`. Device failures while
    /// delivering go to `on_error`.
    fn start(&mut self, on_samples: SampleCallback, on_error: ErrorCallback) -> Result<()>;

    /// Stop all device tracks and release the device. Idempotent.
    fn stop(&mut self);

    /// Returns true while the device is held.
    fn is_live(&self) -> bool;
}

/// Everything the session core needs from the host audio subsystem.
#[async_trait]
pub trait AudioPlatform: Send + Sync {
    /// Open an input context at `sample_rate`.
    fn open_input(&self, sample_rate: u32) -> Result<Box<dyn InputContext>>;

    /// Open an output context at `sample_rate`.
    fn open_output(&self, sample_rate: u32) -> Result<Box<dyn OutputContext>>;

    /// Acquire the microphone.
    ///
    /// # Errors
    /// `DeviceUnavailable`, `PermissionDenied` or `DeviceBusy`, mapped from
    /// the backend's failure.
    async fn acquire_microphone(
        &self,
        constraints: &MicConstraints,
    ) -> Result<Box<dyn MicrophoneStream>>;
}

/// Patterns in backend error text that identify a permission failure.
const PERMISSION_PATTERNS: &[&str] = &["permission", "denied", "not allowed", "eacces"];

/// Patterns in backend error text that identify a device held elsewhere.
const BUSY_PATTERNS: &[&str] = &["busy", "in use", "ebusy", "exclusive"];

/// Map a backend acquisition failure message onto the device error taxonomy.
///
/// Anything not recognisably a permission or busy failure is reported as the
/// device being unavailable.
pub fn classify_acquisition_failure(device: &str, message: &str) -> LivevoxError {
    let lower = message.to_lowercase();
    if PERMISSION_PATTERNS.iter().any(|p| lower.contains(p)) {
        LivevoxError::PermissionDenied {
            message: message.to_string(),
        }
    } else if BUSY_PATTERNS.iter().any(|p| lower.contains(p)) {
        LivevoxError::DeviceBusy {
            message: message.to_string(),
        }
    } else {
        LivevoxError::DeviceUnavailable {
            device: format!("{device} ({message})"),
        }
    }
}
