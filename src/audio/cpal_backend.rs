//! Real audio I/O using CPAL (Cross-Platform Audio Library).
//!
//! Input: the microphone stream is built and started at acquisition time and
//! forwards converted samples into a callback slot that the capture pipeline
//! fills in later.
//!
//! Output: one device stream per output context runs a small mixer. Buffers
//! are handed to it over a channel with an absolute start frame, and the
//! mixer's frame counter is the context clock.

use crate::audio::platform::{
    AudioPlatform, EndedCallback, ErrorCallback, InputContext, MicConstraints, MicrophoneStream,
    OutputContext, PlaybackHandle, SampleCallback, classify_acquisition_failure,
};
use crate::codec::AudioBuffer;
use crate::error::{LivevoxError, Result};
use crate::playback::clock::{Clock, SampleClock};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long to wait for the first input callback before falling back to the
/// device's native format.
const CALLBACK_PROBE: Duration = Duration::from_millis(200);

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Quiet JACK/ALSA/PipeWire chatter during backend probing.
///
/// # Safety
/// Modifies environment variables; call at startup before any threads exist.
pub fn suppress_audio_warnings() {
    // SAFETY: called from main before the runtime starts
    unsafe {
        std::env::set_var("JACK_NO_START_SERVER", "1");
        std::env::set_var("JACK_NO_AUDIO_RESERVATION", "1");
        std::env::set_var("PIPEWIRE_DEBUG", "0");
        std::env::set_var("ALSA_DEBUG", "0");
        std::env::set_var("PW_LOG", "0");
    }
}

/// Preferred device names for desktop PipeWire/Pulse environments.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Input device name patterns that are never a microphone.
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// List usable input devices, preferred ones marked "\[recommended\]".
///
/// # Errors
/// Returns `LivevoxError::DeviceUnavailable` if enumeration fails.
pub fn list_input_devices() -> Result<Vec<String>> {
    let (host, devices) = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = host.input_devices();
        (host, devices)
    });
    let _host = host;
    let devices = devices.map_err(|e| LivevoxError::DeviceUnavailable {
        device: format!("input enumeration failed: {e}"),
    })?;

    let mut names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            if should_filter_device(&name) {
                continue;
            }
            if is_preferred_device(&name) {
                names.push(format!("{name} [recommended]"));
            } else {
                names.push(name);
            }
        }
    }
    Ok(names)
}

/// List output devices.
///
/// # Errors
/// Returns `LivevoxError::AudioPlayback` if enumeration fails.
pub fn list_output_devices() -> Result<Vec<String>> {
    let (host, devices) = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = host.output_devices();
        (host, devices)
    });
    let _host = host;
    let devices = devices.map_err(|e| LivevoxError::AudioPlayback {
        message: format!("output enumeration failed: {e}"),
    })?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Find an input device by exact name, or the best default.
///
/// The default prefers PipeWire/Pulse over the raw system default so the
/// desktop's device selection is respected.
fn find_input_device(name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| LivevoxError::DeviceUnavailable {
                device: format!("input enumeration failed: {e}"),
            })?;

        if let Some(name) = name {
            let mut found = None;
            for dev in devices {
                if let Ok(dev_name) = dev.name()
                    && dev_name == name
                {
                    found = Some(dev);
                    break;
                }
            }
            return found.ok_or_else(|| LivevoxError::DeviceUnavailable {
                device: name.to_string(),
            });
        }

        for dev in devices {
            if let Ok(dev_name) = dev.name()
                && is_preferred_device(&dev_name)
            {
                return Ok(dev);
            }
        }
        host.default_input_device()
            .ok_or_else(|| LivevoxError::DeviceUnavailable {
                device: "default".to_string(),
            })
    })
}

fn find_output_device(name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        if let Some(name) = name {
            let devices = host
                .output_devices()
                .map_err(|e| LivevoxError::AudioPlayback {
                    message: format!("output enumeration failed: {e}"),
                })?;
            for dev in devices {
                if let Ok(dev_name) = dev.name()
                    && dev_name == name
                {
                    return Ok(dev);
                }
            }
            return Err(LivevoxError::AudioPlayback {
                message: format!("output device not found: {name}"),
            });
        }
        host.default_output_device()
            .ok_or_else(|| LivevoxError::AudioPlayback {
                message: "no default output device".to_string(),
            })
    })
}

/// Wrapper for `cpal::Stream` to make it Send.
///
/// SAFETY: the stream is only touched by its single owner (a microphone or an
/// output context), never concurrently.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Average interleaved frames down to mono.
fn to_mono(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    let scale = 1.0 / channels as f32;
    data.chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}

/// Linear-interpolation resampler.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let last = samples.len() - 1;
    let out_len = (samples.len() as f64 / ratio).round() as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = (pos.floor() as usize).min(last);
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx];
            let b = samples[(idx + 1).min(last)];
            a + (b - a) * frac
        })
        .collect()
}

/// CPAL-backed audio platform.
#[derive(Debug, Clone, Default)]
pub struct CpalPlatform {
    input_device: Option<String>,
    output_device: Option<String>,
}

impl CpalPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a named input device when the constraints don't name one.
    pub fn with_input_device(mut self, name: Option<String>) -> Self {
        self.input_device = name;
        self
    }

    pub fn with_output_device(mut self, name: Option<String>) -> Self {
        self.output_device = name;
        self
    }
}

#[async_trait]
impl AudioPlatform for CpalPlatform {
    fn open_input(&self, sample_rate: u32) -> Result<Box<dyn InputContext>> {
        Ok(Box::new(CpalInputContext {
            sample_rate,
            closed: false,
        }))
    }

    fn open_output(&self, sample_rate: u32) -> Result<Box<dyn OutputContext>> {
        let device = find_output_device(self.output_device.as_deref())?;
        let context = CpalOutputContext::open(&device, sample_rate)?;
        Ok(Box::new(context))
    }

    async fn acquire_microphone(
        &self,
        constraints: &MicConstraints,
    ) -> Result<Box<dyn MicrophoneStream>> {
        let wanted = constraints
            .device
            .clone()
            .or_else(|| self.input_device.clone());
        let slot: CallbackSlot = Arc::new(Mutex::new(None));
        let callbacks = Arc::new(AtomicU64::new(0));
        let target_rate = constraints.sample_rate;

        // The device handle is not held across the probe below.
        let (stream, label) = {
            let device = find_input_device(wanted.as_deref())?;
            let label = device.name().unwrap_or_else(|_| "default".to_string());
            let stream = match build_preferred_input(&device, target_rate, &slot, &callbacks) {
                Ok(stream) => stream,
                Err(_) => build_native_input(&device, target_rate, &slot, &callbacks)
                    .map_err(|e| classify_acquisition_failure(&label, &e.to_string()))?,
            };
            stream
                .play()
                .map_err(|e| classify_acquisition_failure(&label, &e.to_string()))?;
            (SendableStream(stream), label)
        };

        // Some PipeWire-ALSA setups accept a non-native config but never fire
        // the data callback.
        tokio::time::sleep(CALLBACK_PROBE).await;
        let stream = if callbacks.load(Ordering::Relaxed) == 0 {
            drop(stream);
            debug!(device = %label, "no input callbacks at preferred format, retrying native");
            let device = find_input_device(wanted.as_deref())?;
            let native = build_native_input(&device, target_rate, &slot, &callbacks)
                .map_err(|e| classify_acquisition_failure(&label, &e.to_string()))?;
            native
                .play()
                .map_err(|e| classify_acquisition_failure(&label, &e.to_string()))?;
            SendableStream(native)
        } else {
            stream
        };

        info!(device = %label, rate = target_rate, "microphone acquired");
        Ok(Box::new(CpalMicrophone {
            stream: Some(stream),
            slot,
        }))
    }
}

/// Where a running input stream delivers samples and failures.
struct Listeners {
    on_samples: SampleCallback,
    on_error: ErrorCallback,
}

type CallbackSlot = Arc<Mutex<Option<Listeners>>>;

type ErrorSlot = Arc<Mutex<Option<ErrorCallback>>>;

fn forward(slot: &CallbackSlot, samples: &[f32]) {
    if let Ok(mut guard) = slot.lock()
        && let Some(listeners) = guard.as_mut()
    {
        (listeners.on_samples)(samples);
    }
}

/// A vanished device is fatal to the session. Other stream errors are
/// glitches the stream recovers from, so they are only logged.
fn device_lost(err: &cpal::StreamError, what: &str) -> Option<LivevoxError> {
    match err {
        cpal::StreamError::DeviceNotAvailable => Some(LivevoxError::DeviceUnavailable {
            device: format!("{what} device disconnected"),
        }),
        _ => None,
    }
}

fn report_input_error(slot: &CallbackSlot, err: cpal::StreamError) {
    warn!("audio input stream error: {err}");
    if let Some(error) = device_lost(&err, "input")
        && let Ok(mut guard) = slot.lock()
        && let Some(listeners) = guard.as_mut()
    {
        (listeners.on_error)(error);
    }
}

fn report_output_error(slot: &ErrorSlot, err: cpal::StreamError) {
    warn!("audio output stream error: {err}");
    if let Some(error) = device_lost(&err, "output")
        && let Ok(mut guard) = slot.lock()
        && let Some(on_error) = guard.as_mut()
    {
        on_error(error);
    }
}

/// Mono f32 at the target rate; the device converts.
fn build_preferred_input(
    device: &cpal::Device,
    target_rate: u32,
    slot: &CallbackSlot,
    callbacks: &Arc<AtomicU64>,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError> {
    let config = cpal::StreamConfig {
        channels: 1,
        sample_rate: target_rate,
        buffer_size: cpal::BufferSize::Default,
    };
    let errors = Arc::clone(slot);
    let slot = Arc::clone(slot);
    let counter = Arc::clone(callbacks);
    device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            counter.fetch_add(1, Ordering::Relaxed);
            forward(&slot, data);
        },
        move |err| report_input_error(&errors, err),
        None,
    )
}

/// The device's native config, mixed to mono and resampled in software.
fn build_native_input(
    device: &cpal::Device,
    target_rate: u32,
    slot: &CallbackSlot,
    callbacks: &Arc<AtomicU64>,
) -> Result<cpal::Stream> {
    let default_config = device
        .default_input_config()
        .map_err(|e| LivevoxError::DeviceUnavailable {
            device: format!("no default input config: {e}"),
        })?;
    let native_rate = default_config.sample_rate();
    let channels = default_config.channels() as usize;
    let config: cpal::StreamConfig = default_config.clone().into();

    debug!(
        channels,
        native_rate,
        format = ?default_config.sample_format(),
        "using native input format"
    );

    let built = match default_config.sample_format() {
        cpal::SampleFormat::F32 => {
            native_input::<f32>(device, &config, channels, native_rate, target_rate, slot, callbacks)
        }
        cpal::SampleFormat::I16 => {
            native_input::<i16>(device, &config, channels, native_rate, target_rate, slot, callbacks)
        }
        cpal::SampleFormat::U16 => {
            native_input::<u16>(device, &config, channels, native_rate, target_rate, slot, callbacks)
        }
        fmt => {
            return Err(LivevoxError::DeviceUnavailable {
                device: format!("unsupported native sample format {fmt:?}"),
            });
        }
    };
    built.map_err(|e| LivevoxError::DeviceUnavailable {
        device: format!("failed to build input stream: {e}"),
    })
}

fn native_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    native_rate: u32,
    target_rate: u32,
    slot: &CallbackSlot,
    callbacks: &Arc<AtomicU64>,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let errors = Arc::clone(slot);
    let slot = Arc::clone(slot);
    let counter = Arc::clone(callbacks);
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            counter.fetch_add(1, Ordering::Relaxed);
            let floats: Vec<f32> = data.iter().map(|&s| f32::from_sample(s)).collect();
            let mono = to_mono(&floats, channels);
            forward(&slot, &resample_linear(&mono, native_rate, target_rate));
        },
        move |err| report_input_error(&errors, err),
        None,
    )
}

struct CpalMicrophone {
    stream: Option<SendableStream>,
    slot: CallbackSlot,
}

impl MicrophoneStream for CpalMicrophone {
    fn start(&mut self, on_samples: SampleCallback, on_error: ErrorCallback) -> Result<()> {
        if self.stream.is_none() {
            return Err(LivevoxError::DeviceUnavailable {
                device: "microphone was released".to_string(),
            });
        }
        let mut guard = self.slot.lock().map_err(|e| LivevoxError::Other(format!(
            "microphone callback lock poisoned: {e}"
        )))?;
        *guard = Some(Listeners {
            on_samples,
            on_error,
        });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.0.pause() {
                debug!("failed to pause input stream: {e}");
            }
            drop(stream);
            debug!("microphone released");
        }
        if let Ok(mut guard) = self.slot.lock() {
            *guard = None;
        }
    }

    fn is_live(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}

/// CPAL has no input context object; this tracks the session's view of one.
struct CpalInputContext {
    sample_rate: u32,
    closed: bool,
}

impl InputContext for CpalInputContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

enum MixerCommand {
    Play {
        id: u64,
        start_frame: u64,
        samples: Vec<f32>,
        on_ended: EndedCallback,
    },
    Stop(u64),
    StopAll,
}

struct Voice {
    id: u64,
    start_frame: u64,
    samples: Vec<f32>,
    on_ended: Option<EndedCallback>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Render-thread side of an output context.
struct Mixer {
    commands: Receiver<MixerCommand>,
    voices: Vec<Voice>,
    clock: Arc<SampleClock>,
}

impl Mixer {
    fn new(commands: Receiver<MixerCommand>, clock: Arc<SampleClock>) -> Self {
        Self {
            commands,
            voices: Vec::new(),
            clock,
        }
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                MixerCommand::Play {
                    id,
                    start_frame,
                    samples,
                    on_ended,
                } => self.voices.push(Voice {
                    id,
                    start_frame,
                    samples,
                    on_ended: Some(on_ended),
                }),
                MixerCommand::Stop(id) => self.voices.retain(|v| v.id != id),
                MixerCommand::StopAll => self.voices.clear(),
            }
        }
    }

    /// Fill `out` (mono) with the mix for the next `out.len()` frames.
    fn render(&mut self, out: &mut [f32]) {
        self.apply_commands();
        out.fill(0.0);

        let base = self.clock.frames();
        for voice in &self.voices {
            let end = voice.end_frame();
            for (i, slot) in out.iter_mut().enumerate() {
                let frame = base + i as u64;
                if frame >= voice.start_frame && frame < end {
                    *slot += voice.samples[(frame - voice.start_frame) as usize];
                }
            }
        }
        for slot in out.iter_mut() {
            *slot = slot.clamp(-1.0, 1.0);
        }

        let rendered_to = base + out.len() as u64;
        self.clock.advance_frames(out.len() as u64);

        let mut i = 0;
        while i < self.voices.len() {
            if self.voices[i].end_frame() <= rendered_to {
                let mut voice = self.voices.swap_remove(i);
                if let Some(on_ended) = voice.on_ended.take() {
                    on_ended();
                }
            } else {
                i += 1;
            }
        }
    }
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut mixer: Mixer,
    errors: ErrorSlot,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = (config.channels as usize).max(1);
    let mut scratch: Vec<f32> = Vec::new();
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            scratch.resize(data.len() / channels, 0.0);
            mixer.render(&mut scratch);
            for (frame, value) in data.chunks_mut(channels).zip(&scratch) {
                for sample in frame {
                    *sample = T::from_sample(*value);
                }
            }
        },
        move |err| report_output_error(&errors, err),
        None,
    )
}

/// Output context backed by a device stream running a [`Mixer`].
struct CpalOutputContext {
    sample_rate: u32,
    device_rate: u32,
    clock: Arc<SampleClock>,
    commands: Sender<MixerCommand>,
    next_id: u64,
    stream: Option<SendableStream>,
    errors: ErrorSlot,
    closed: Arc<AtomicBool>,
}

impl CpalOutputContext {
    fn open(device: &cpal::Device, sample_rate: u32) -> Result<Self> {
        let playback_err = |message: String| LivevoxError::AudioPlayback { message };

        let default_config = device
            .default_output_config()
            .map_err(|e| playback_err(format!("no default output config: {e}")))?;
        let device_rate = default_config.sample_rate();
        let config: cpal::StreamConfig = default_config.clone().into();

        let clock = Arc::new(SampleClock::new(device_rate));
        let (commands, rx) = crossbeam_channel::unbounded();
        let mixer = Mixer::new(rx, Arc::clone(&clock));
        let errors: ErrorSlot = Arc::new(Mutex::new(None));
        let stream_errors = Arc::clone(&errors);

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => {
                build_output_stream::<f32>(device, &config, mixer, stream_errors)
            }
            cpal::SampleFormat::I16 => {
                build_output_stream::<i16>(device, &config, mixer, stream_errors)
            }
            cpal::SampleFormat::U16 => {
                build_output_stream::<u16>(device, &config, mixer, stream_errors)
            }
            fmt => {
                return Err(playback_err(format!(
                    "unsupported output sample format {fmt:?}"
                )));
            }
        }
        .map_err(|e| playback_err(format!("failed to build output stream: {e}")))?;
        stream
            .play()
            .map_err(|e| playback_err(format!("failed to start output stream: {e}")))?;

        debug!(device_rate, sample_rate, "output context opened");
        Ok(Self {
            sample_rate,
            device_rate,
            clock,
            commands,
            next_id: 0,
            stream: Some(SendableStream(stream)),
            errors,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl OutputContext for CpalOutputContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock) as Arc<dyn Clock>
    }

    fn schedule(
        &mut self,
        buffer: AudioBuffer,
        start_at: f64,
        on_ended: EndedCallback,
    ) -> Result<Box<dyn PlaybackHandle>> {
        if self.is_closed() {
            return Err(LivevoxError::AudioPlayback {
                message: "output context is closed".to_string(),
            });
        }
        let id = self.next_id;
        self.next_id += 1;
        let samples = resample_linear(&buffer.mixdown(), buffer.sample_rate(), self.device_rate);
        let start_frame = (start_at.max(0.0) * self.device_rate as f64).round() as u64;

        self.commands
            .send(MixerCommand::Play {
                id,
                start_frame,
                samples,
                on_ended,
            })
            .map_err(|_| LivevoxError::AudioPlayback {
                message: "output stream has stopped".to_string(),
            })?;

        Ok(Box::new(CpalPlaybackHandle {
            id,
            commands: self.commands.clone(),
        }))
    }

    fn set_error_callback(&mut self, on_error: ErrorCallback) {
        if let Ok(mut guard) = self.errors.lock() {
            *guard = Some(on_error);
        }
    }

    fn close(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut guard) = self.errors.lock() {
            *guard = None;
        }
        if self.commands.send(MixerCommand::StopAll).is_err() {
            debug!("mixer already gone");
        }
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.0.pause() {
                debug!("failed to pause output stream: {e}");
            }
            drop(stream);
        }
        debug!("output context closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for CpalOutputContext {
    fn drop(&mut self) {
        self.close();
    }
}

struct CpalPlaybackHandle {
    id: u64,
    commands: Sender<MixerCommand>,
}

impl PlaybackHandle for CpalPlaybackHandle {
    fn stop(&mut self) {
        // The mixer may already be gone with its context.
        if self.commands.send(MixerCommand::Stop(self.id)).is_err() {
            debug!(id = self.id, "stop after output closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixer() -> (Mixer, Sender<MixerCommand>, Arc<SampleClock>) {
        let clock = Arc::new(SampleClock::new(48000));
        let (tx, rx) = crossbeam_channel::unbounded();
        (Mixer::new(rx, Arc::clone(&clock)), tx, clock)
    }

    fn play(
        tx: &Sender<MixerCommand>,
        id: u64,
        start_frame: u64,
        samples: Vec<f32>,
        ended: &Arc<AtomicU64>,
    ) {
        let ended = Arc::clone(ended);
        tx.send(MixerCommand::Play {
            id,
            start_frame,
            samples,
            on_ended: Box::new(move || {
                ended.fetch_add(1, Ordering::SeqCst);
            }),
        })
        .unwrap();
    }

    #[test]
    fn test_should_filter_device() {
        assert!(should_filter_device("surround51"));
        assert!(should_filter_device("front:CARD=PCH"));
        assert!(should_filter_device("HDMI Output"));
        assert!(!should_filter_device("pipewire"));
        assert!(!should_filter_device("Built-in Audio"));
    }

    #[test]
    fn test_disconnected_input_reaches_the_error_listener() {
        let slot: CallbackSlot = Arc::new(Mutex::new(None));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&errors);
        *slot.lock().unwrap() = Some(Listeners {
            on_samples: Box::new(|_| {}),
            on_error: Box::new(move |e| seen.lock().unwrap().push(e.kind())),
        });

        report_input_error(&slot, cpal::StreamError::DeviceNotAvailable);
        report_input_error(
            &slot,
            cpal::StreamError::BackendSpecific {
                err: cpal::BackendSpecificError {
                    description: "buffer overrun".to_string(),
                },
            },
        );
        assert_eq!(
            *errors.lock().unwrap(),
            vec![crate::error::ErrorKind::DeviceUnavailable]
        );
    }

    #[test]
    fn test_disconnected_output_reaches_the_error_callback() {
        let slot: ErrorSlot = Arc::new(Mutex::new(None));
        report_output_error(&slot, cpal::StreamError::DeviceNotAvailable);

        let count = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&count);
        *slot.lock().unwrap() = Some(Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        report_output_error(&slot, cpal::StreamError::DeviceNotAvailable);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_is_preferred_device() {
        assert!(is_preferred_device("PipeWire"));
        assert!(is_preferred_device("pulse"));
        assert!(!is_preferred_device("hw:0,0"));
        assert!(!is_preferred_device("default"));
    }

    #[test]
    fn test_to_mono_averages_channels() {
        assert_eq!(to_mono(&[0.2, 0.4, -1.0, 1.0], 2), vec![0.3, 0.0]);
        assert_eq!(to_mono(&[0.5, 0.25], 1), vec![0.5, 0.25]);
    }

    #[test]
    fn test_resample_linear_lengths() {
        let input = vec![0.0f32; 24000];
        assert_eq!(resample_linear(&input, 24000, 48000).len(), 48000);
        assert_eq!(resample_linear(&input, 48000, 16000).len(), 8000);
        assert_eq!(resample_linear(&input, 24000, 24000).len(), 24000);
    }

    #[test]
    fn test_resample_linear_interpolates() {
        let out = resample_linear(&[0.0, 1.0], 1, 2);
        assert_eq!(out.len(), 4);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_mixer_starts_voice_at_its_frame() {
        let (mut mixer, tx, clock) = mixer();
        let ended = Arc::new(AtomicU64::new(0));
        play(&tx, 0, 2, vec![0.5; 3], &ended);

        let mut out = vec![0.0; 4];
        mixer.render(&mut out);
        assert_eq!(out, vec![0.0, 0.0, 0.5, 0.5]);
        assert_eq!(clock.frames(), 4);
        assert_eq!(ended.load(Ordering::SeqCst), 0);

        mixer.render(&mut out);
        assert_eq!(out, vec![0.5, 0.0, 0.0, 0.0]);
        assert_eq!(ended.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mixer_stop_suppresses_ended() {
        let (mut mixer, tx, _clock) = mixer();
        let ended = Arc::new(AtomicU64::new(0));
        play(&tx, 7, 0, vec![0.5; 2], &ended);
        tx.send(MixerCommand::Stop(7)).unwrap();

        let mut out = vec![0.0; 4];
        mixer.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(ended.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_mixer_clamps_overlapping_voices() {
        let (mut mixer, tx, _clock) = mixer();
        let ended = Arc::new(AtomicU64::new(0));
        play(&tx, 0, 0, vec![0.8; 2], &ended);
        play(&tx, 1, 0, vec![0.8; 2], &ended);

        let mut out = vec![0.0; 2];
        mixer.render(&mut out);
        assert_eq!(out, vec![1.0, 1.0]);
        assert_eq!(ended.load(Ordering::SeqCst), 2);
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_list_input_devices() {
        let devices = list_input_devices().unwrap();
        assert!(devices.iter().all(|d| !d.to_lowercase().contains("hdmi")));
    }
}
