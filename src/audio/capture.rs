//! Capture pipeline: microphone samples → high-pass → fixed-size frames.
//!
//! Capture is push-driven. Every device callback is one processing tick; each
//! completed frame goes straight to the sink. Only the remainder of an
//! incomplete frame is held between ticks, so there is no queue to back up.

use crate::audio::filter::HighPassFilter;
use crate::audio::platform::{ErrorCallback, MicrophoneStream};
use crate::codec::AudioFrame;
use crate::defaults;
use crate::error::{LivevoxError, Result};

/// Receives every completed frame, on the device callback's thread.
pub type FrameSink = Box<dyn FnMut(AudioFrame) + Send>;

/// Capture parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub frame_samples: usize,
    pub highpass_cutoff_hz: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::INPUT_SAMPLE_RATE,
            frame_samples: defaults::FRAME_SAMPLES,
            highpass_cutoff_hz: defaults::HIGHPASS_CUTOFF_HZ,
        }
    }
}

/// Filter and frame raw microphone samples.
#[derive(Debug, Clone)]
pub struct CapturePipeline {
    filter: HighPassFilter,
    sample_rate: u32,
    frame_samples: usize,
    pending: Vec<f32>,
    frames_emitted: u64,
}

impl CapturePipeline {
    /// # Errors
    /// Returns `LivevoxError::ConfigInvalidValue` for a zero frame size or a
    /// cutoff outside (0, Nyquist).
    pub fn new(config: &CaptureConfig) -> Result<Self> {
        if config.frame_samples == 0 {
            return Err(LivevoxError::ConfigInvalidValue {
                key: "audio.frame_samples".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(Self {
            filter: HighPassFilter::new(config.sample_rate, config.highpass_cutoff_hz)?,
            sample_rate: config.sample_rate,
            frame_samples: config.frame_samples,
            pending: Vec::with_capacity(config.frame_samples),
            frames_emitted: 0,
        })
    }

    /// Process one tick of samples, emitting every frame it completes.
    pub fn process<F: FnMut(AudioFrame)>(&mut self, samples: &[f32], mut emit: F) {
        for &sample in samples {
            self.pending.push(self.filter.process_sample(sample));
            if self.pending.len() == self.frame_samples {
                emit(AudioFrame::from_float(&self.pending, self.sample_rate));
                self.pending.clear();
                self.frames_emitted += 1;
            }
        }
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    /// Samples waiting to complete the next frame.
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }
}

/// A microphone stream wired to a capture pipeline and a frame sink.
///
/// Dropping it releases the device.
pub struct ActiveCapture {
    mic: Box<dyn MicrophoneStream>,
}

impl ActiveCapture {
    /// Start delivering frames from `mic` to `sink`. Device failures after
    /// this point go to `on_error`.
    ///
    /// On failure the microphone is released before the error is returned.
    pub fn start(
        mut mic: Box<dyn MicrophoneStream>,
        mut pipeline: CapturePipeline,
        mut sink: FrameSink,
        on_error: ErrorCallback,
    ) -> Result<Self> {
        let started = mic.start(
            Box::new(move |samples: &[f32]| {
                pipeline.process(samples, &mut sink);
            }),
            on_error,
        );
        if let Err(e) = started {
            mic.stop();
            return Err(e);
        }
        Ok(Self { mic })
    }

    /// Stop all device tracks. Idempotent.
    pub fn stop(&mut self) {
        if self.mic.is_live() {
            self.mic.stop();
        }
    }

    pub fn is_live(&self) -> bool {
        self.mic.is_live()
    }
}

impl Drop for ActiveCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
