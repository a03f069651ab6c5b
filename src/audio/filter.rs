//! Second-order high-pass filter for microphone input.

use crate::error::{LivevoxError, Result};
use std::f32::consts::PI;

/// Butterworth quality factor (maximally flat passband).
const BUTTERWORTH_Q: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Biquad high-pass (RBJ cookbook coefficients), transposed direct form II.
#[derive(Debug, Clone)]
pub struct HighPassFilter {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: f32,
    z2: f32,
    cutoff_hz: f32,
}

impl HighPassFilter {
    /// Create a filter for `sample_rate` with the given cutoff.
    ///
    /// # Errors
    /// Returns `LivevoxError::ConfigInvalidValue` unless `0 < cutoff < sample_rate / 2`.
    pub fn new(sample_rate: u32, cutoff_hz: f32) -> Result<Self> {
        let nyquist = sample_rate as f32 / 2.0;
        if !(cutoff_hz > 0.0 && cutoff_hz < nyquist) {
            return Err(LivevoxError::ConfigInvalidValue {
                key: "audio.highpass_cutoff_hz".to_string(),
                message: format!("{cutoff_hz} Hz must be between 0 and {nyquist} Hz"),
            });
        }

        let w0 = 2.0 * PI * cutoff_hz / sample_rate as f32;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * BUTTERWORTH_Q);
        let a0 = 1.0 + alpha;

        Ok(Self {
            b0: (1.0 + cos_w0) / 2.0 / a0,
            b1: -(1.0 + cos_w0) / a0,
            b2: (1.0 + cos_w0) / 2.0 / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
            z1: 0.0,
            z2: 0.0,
            cutoff_hz,
        })
    }

    pub fn cutoff_hz(&self) -> f32 {
        self.cutoff_hz
    }

    /// Filter one sample.
    pub fn process_sample(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }

    /// Filter a block in place.
    pub fn process(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            *s = self.process_sample(*s);
        }
    }

    /// Clear the filter's memory.
    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: u32, seconds: f32) -> Vec<f32> {
        let n = (rate as f32 * seconds) as usize;
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f32 / rate as f32).sin() * 0.5)
            .collect()
    }

    /// Peak amplitude over the second half, after the filter has settled.
    fn settled_peak(samples: &[f32]) -> f32 {
        samples[samples.len() / 2..]
            .iter()
            .fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    #[test]
    fn removes_dc_offset() {
        let mut filter = HighPassFilter::new(16000, 85.0).unwrap();
        let mut samples = vec![0.3f32; 16000];
        filter.process(&mut samples);
        assert!(settled_peak(&samples) < 1e-3);
    }

    #[test]
    fn attenuates_rumble() {
        let mut filter = HighPassFilter::new(16000, 85.0).unwrap();
        let mut samples = sine(20.0, 16000, 1.0);
        filter.process(&mut samples);
        assert!(settled_peak(&samples) < 0.05, "20 Hz should be cut");
    }

    #[test]
    fn passes_speech_band() {
        let mut filter = HighPassFilter::new(16000, 85.0).unwrap();
        let mut samples = sine(1000.0, 16000, 0.5);
        filter.process(&mut samples);
        let peak = settled_peak(&samples);
        assert!((peak - 0.5).abs() < 0.02, "1 kHz should pass, got {peak}");
    }

    #[test]
    fn rejects_cutoff_above_nyquist() {
        assert!(HighPassFilter::new(16000, 8000.0).is_err());
        assert!(HighPassFilter::new(16000, 0.0).is_err());
        assert!(HighPassFilter::new(16000, f32::NAN).is_err());
    }

    #[test]
    fn reset_clears_state() {
        let mut filter = HighPassFilter::new(16000, 85.0).unwrap();
        filter.process_sample(1.0);
        filter.reset();
        let mut fresh = HighPassFilter::new(16000, 85.0).unwrap();
        assert_eq!(filter.process_sample(0.5), fresh.process_sample(0.5));
    }
}
