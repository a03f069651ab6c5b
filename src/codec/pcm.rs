//! PCM16 conversion between float samples and wire bytes.

use crate::defaults::{PCM_NEGATIVE_SCALE, PCM_POSITIVE_SCALE};
use crate::error::{LivevoxError, Result};

/// MIME prefix of raw little-endian PCM16 audio.
pub const PCM_MIME_PREFIX: &str = "audio/pcm";

/// Build the MIME tag for PCM16 audio at `sample_rate`.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("{PCM_MIME_PREFIX};rate={sample_rate}")
}

/// Convert one float sample to PCM16.
///
/// Clamps to [-1, 1]. Negative values scale by 32768 and non-negative values
/// by 32767, so -1.0 reaches `i16::MIN` and 1.0 reaches `i16::MAX` without
/// overflow. The fractional part is truncated toward zero.
pub fn quantize(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * PCM_NEGATIVE_SCALE) as i16
    } else {
        (s * PCM_POSITIVE_SCALE) as i16
    }
}

/// Convert one PCM16 sample back to float.
pub fn dequantize(sample: i16) -> f32 {
    sample as f32 / PCM_NEGATIVE_SCALE
}

/// One captured frame of PCM16 audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    sample_rate: u32,
    channels: u16,
}

impl AudioFrame {
    /// Creates a frame from interleaved PCM16 samples.
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Creates a mono frame by quantizing float samples.
    pub fn from_float(samples: &[f32], sample_rate: u32) -> Self {
        Self::new(samples.iter().map(|&s| quantize(s)).collect(), sample_rate, 1)
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Returns the duration of this frame in milliseconds.
    pub fn duration_ms(&self) -> u32 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        let frames = self.samples.len() as u64 / self.channels as u64;
        (frames * 1000 / self.sample_rate as u64) as u32
    }

    /// Packs the samples little-endian and tags them with the sample rate.
    pub fn encode(&self) -> EncodedPayload {
        let mut data = Vec::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        EncodedPayload {
            data,
            mime_type: pcm_mime_type(self.sample_rate),
        }
    }
}

/// Raw audio bytes plus the MIME tag describing them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl EncodedPayload {
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
        }
    }

    /// Sample rate carried in the `rate=` parameter of the MIME tag, if any.
    pub fn sample_rate(&self) -> Option<u32> {
        self.mime_type
            .split(';')
            .skip(1)
            .filter_map(|param| param.trim().split_once('='))
            .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
            .and_then(|(_, value)| value.trim().parse().ok())
    }

    /// Returns true if the tag describes raw PCM audio.
    pub fn is_pcm(&self) -> bool {
        self.mime_type
            .split(';')
            .next()
            .is_some_and(|base| base.trim().eq_ignore_ascii_case(PCM_MIME_PREFIX))
    }

    /// Decodes the payload, preferring the tagged sample rate over `fallback_rate`.
    pub fn decode(&self, fallback_rate: u32, channels: u16) -> Result<AudioBuffer> {
        decode(
            &self.data,
            self.sample_rate().unwrap_or(fallback_rate),
            channels,
        )
    }
}

/// Encode float samples in [-1, 1] into a tagged PCM16 payload.
pub fn encode(samples: &[f32], sample_rate: u32) -> EncodedPayload {
    AudioFrame::from_float(samples, sample_rate).encode()
}

/// Decode little-endian PCM16 bytes into per-channel float buffers.
///
/// # Errors
/// Returns `LivevoxError::MalformedPayload` when the byte length is not a
/// multiple of `2 * channels`; a partial buffer is never returned.
pub fn decode(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<AudioBuffer> {
    let frame_bytes = 2 * channels as usize;
    if frame_bytes == 0 || bytes.len() % frame_bytes != 0 {
        return Err(LivevoxError::MalformedPayload {
            len: bytes.len(),
            frame_bytes,
        });
    }

    let frame_count = bytes.len() / frame_bytes;
    let mut data = vec![Vec::with_capacity(frame_count); channels as usize];
    for frame in bytes.chunks_exact(frame_bytes) {
        for (channel, sample) in frame.chunks_exact(2).enumerate() {
            let value = i16::from_le_bytes([sample[0], sample[1]]);
            data[channel].push(dequantize(value));
        }
    }

    Ok(AudioBuffer {
        sample_rate,
        channels: data,
    })
}

/// Decoded, de-interleaved audio ready for playback.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    /// Creates a mono buffer from float samples.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: vec![samples],
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel.
    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Playback duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// Average all channels into one.
    pub fn mixdown(&self) -> Vec<f32> {
        match self.channels.as_slice() {
            [] => Vec::new(),
            [only] => only.clone(),
            many => {
                let scale = 1.0 / many.len() as f32;
                (0..self.frame_count())
                    .map(|i| many.iter().map(|ch| ch[i]).sum::<f32>() * scale)
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_uses_asymmetric_scale() {
        assert_eq!(quantize(-1.0), i16::MIN);
        assert_eq!(quantize(1.0), i16::MAX);
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(0.5), 16383);
        assert_eq!(quantize(-0.5), -16384);
    }

    #[test]
    fn quantize_clamps_out_of_range() {
        assert_eq!(quantize(3.5), i16::MAX);
        assert_eq!(quantize(-7.0), i16::MIN);
    }

    #[test]
    fn encode_packs_little_endian_and_tags_rate() {
        let payload = encode(&[1.0, -1.0], 16000);
        assert_eq!(payload.data, vec![0xFF, 0x7F, 0x00, 0x80]);
        assert_eq!(payload.mime_type, "audio/pcm;rate=16000");
        assert_eq!(payload.sample_rate(), Some(16000));
        assert!(payload.is_pcm());
    }

    #[test]
    fn round_trip_stays_within_quantization_error() {
        let samples: Vec<f32> = (0..4096)
            .map(|i| ((i as f32 * 0.0137).sin() * 0.999).clamp(-1.0, 1.0))
            .collect();

        let payload = encode(&samples, 16000);
        let buffer = decode(&payload.data, 16000, 1).unwrap();
        let decoded = buffer.channel(0).unwrap();

        assert_eq!(decoded.len(), samples.len());
        for (orig, back) in samples.iter().zip(decoded) {
            // Non-negative samples are scaled by 32767 but divided by 32768,
            // which adds up to one more step of error on the positive side.
            let bound = if *orig < 0.0 { 1.0 } else { 2.0 } / 32768.0;
            assert!(
                (orig - back).abs() <= bound,
                "sample {orig} decoded as {back}"
            );
        }
    }

    #[test]
    fn negative_samples_round_trip_within_one_step() {
        let samples: Vec<f32> = (1..=1000).map(|i| -(i as f32) / 1000.0).collect();
        let buffer = decode(&encode(&samples, 16000).data, 16000, 1).unwrap();
        for (orig, back) in samples.iter().zip(buffer.channel(0).unwrap()) {
            assert!((orig - back).abs() <= 1.0 / 32768.0);
        }
    }

    #[test]
    fn decode_rejects_odd_byte_length() {
        let err = decode(&[0, 0, 0], 24000, 1).unwrap_err();
        assert!(matches!(
            err,
            LivevoxError::MalformedPayload {
                len: 3,
                frame_bytes: 2
            }
        ));
    }

    #[test]
    fn decode_rejects_partial_stereo_frame() {
        // 6 bytes = 3 samples, not a whole number of stereo frames
        let err = decode(&[0; 6], 24000, 2).unwrap_err();
        assert!(matches!(err, LivevoxError::MalformedPayload { .. }));
    }

    #[test]
    fn decode_rejects_zero_channels() {
        assert!(decode(&[0; 4], 24000, 0).is_err());
    }

    #[test]
    fn decode_deinterleaves_stereo() {
        let frame = AudioFrame::new(vec![16384, -16384, 8192, -8192], 24000, 2);
        let buffer = decode(&frame.encode().data, 24000, 2).unwrap();

        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.frame_count(), 2);
        assert_eq!(buffer.channel(0).unwrap(), &[0.5, 0.25]);
        assert_eq!(buffer.channel(1).unwrap(), &[-0.5, -0.25]);
    }

    #[test]
    fn decode_empty_payload_is_empty_buffer() {
        let buffer = decode(&[], 24000, 1).unwrap();
        assert_eq!(buffer.frame_count(), 0);
        assert_eq!(buffer.duration(), 0.0);
    }

    #[test]
    fn buffer_duration_follows_frame_count() {
        let buffer = AudioBuffer::mono(vec![0.0; 12000], 24000);
        assert!((buffer.duration() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn payload_decode_prefers_tagged_rate() {
        let payload = EncodedPayload::new(vec![0; 480], "audio/pcm;rate=24000");
        let buffer = payload.decode(16000, 1).unwrap();
        assert_eq!(buffer.sample_rate(), 24000);
        assert!((buffer.duration() - 0.01).abs() < 1e-9);

        let untagged = EncodedPayload::new(vec![0; 320], "audio/pcm");
        assert_eq!(untagged.decode(16000, 1).unwrap().sample_rate(), 16000);
    }

    #[test]
    fn mixdown_averages_channels() {
        let frame = AudioFrame::new(vec![16384, 0, -16384, -16384], 24000, 2);
        let buffer = decode(&frame.encode().data, 24000, 2).unwrap();
        assert_eq!(buffer.mixdown(), vec![0.25, -0.5]);
    }

    #[test]
    fn frame_duration_ms() {
        let frame = AudioFrame::from_float(&[0.0; 2048], 16000);
        assert_eq!(frame.duration_ms(), 128);
    }
}
