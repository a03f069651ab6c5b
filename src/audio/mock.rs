//! Mock audio platform for testing.
//!
//! Records every context, microphone and scheduled buffer so tests can assert
//! on resource lifecycles without audio hardware.

use crate::audio::platform::{
    AudioPlatform, EndedCallback, ErrorCallback, InputContext, MicConstraints, MicrophoneStream,
    OutputContext, PlaybackHandle, SampleCallback,
};
use crate::codec::AudioBuffer;
use crate::error::{ErrorKind, LivevoxError, Result};
use crate::playback::clock::{Clock, ManualClock};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

struct MockPlayback {
    start_at: f64,
    duration: f64,
    stopped: Arc<AtomicBool>,
    on_ended: Option<EndedCallback>,
}

#[derive(Default)]
struct MicSlot {
    live: bool,
    callback: Option<SampleCallback>,
    on_error: Option<ErrorCallback>,
}

type ErrorSlot = Arc<Mutex<Option<ErrorCallback>>>;

#[derive(Default)]
struct MockState {
    input_contexts: Vec<Arc<AtomicBool>>,
    output_contexts: Vec<Arc<AtomicBool>>,
    output_errors: Vec<ErrorSlot>,
    playbacks: Vec<MockPlayback>,
    microphones: Vec<Arc<Mutex<MicSlot>>>,
    acquisitions: usize,
    last_constraints: Option<MicConstraints>,
}

/// Mock audio platform. Clones share state.
#[derive(Clone)]
pub struct MockAudioPlatform {
    state: Arc<Mutex<MockState>>,
    clock: Arc<ManualClock>,
    acquire_failure: Option<ErrorKind>,
    acquire_delay: Option<Duration>,
    output_failure: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The error a backend would report for `kind`.
fn mock_error(kind: ErrorKind, device: &str) -> LivevoxError {
    match kind {
        ErrorKind::PermissionDenied => LivevoxError::PermissionDenied {
            message: "mock permission denied".to_string(),
        },
        ErrorKind::DeviceBusy => LivevoxError::DeviceBusy {
            message: format!("mock device {device} busy"),
        },
        ErrorKind::DeviceUnavailable => LivevoxError::DeviceUnavailable {
            device: device.to_string(),
        },
        ErrorKind::TransientConnection => LivevoxError::TransientConnection {
            message: "mock transient failure".to_string(),
        },
        _ => LivevoxError::Other("mock failure".to_string()),
    }
}

impl MockAudioPlatform {
    /// Create a mock platform whose output clock starts at zero.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            clock: Arc::new(ManualClock::new(0.0)),
            acquire_failure: None,
            acquire_delay: None,
            output_failure: false,
        }
    }

    /// Configure microphone acquisition to fail with `kind`.
    pub fn with_acquire_failure(mut self, kind: ErrorKind) -> Self {
        self.acquire_failure = Some(kind);
        self
    }

    /// Configure microphone acquisition to take `delay` (on the tokio clock).
    pub fn with_acquire_delay(mut self, delay: Duration) -> Self {
        self.acquire_delay = Some(delay);
        self
    }

    /// Configure `open_output` to fail.
    pub fn with_output_failure(mut self) -> Self {
        self.output_failure = true;
        self
    }

    /// Output clock shared by every output context of this platform.
    pub fn clock(&self) -> Arc<ManualClock> {
        Arc::clone(&self.clock)
    }

    /// Number of microphone acquisitions attempted.
    pub fn acquisitions(&self) -> usize {
        lock(&self.state).acquisitions
    }

    /// Constraints passed to the most recent acquisition.
    pub fn last_constraints(&self) -> Option<MicConstraints> {
        lock(&self.state).last_constraints.clone()
    }

    /// Number of microphones currently held.
    pub fn live_microphones(&self) -> usize {
        lock(&self.state)
            .microphones
            .iter()
            .filter(|slot| lock(slot).live)
            .count()
    }

    pub fn input_contexts_opened(&self) -> usize {
        lock(&self.state).input_contexts.len()
    }

    pub fn output_contexts_opened(&self) -> usize {
        lock(&self.state).output_contexts.len()
    }

    /// Number of input and output contexts not yet closed.
    pub fn open_context_count(&self) -> usize {
        let state = lock(&self.state);
        state
            .input_contexts
            .iter()
            .chain(state.output_contexts.iter())
            .filter(|closed| !closed.load(Ordering::SeqCst))
            .count()
    }

    pub fn all_contexts_closed(&self) -> bool {
        self.open_context_count() == 0
    }

    /// `(start_at, duration)` of every buffer scheduled so far, in order.
    pub fn scheduled_playbacks(&self) -> Vec<(f64, f64)> {
        lock(&self.state)
            .playbacks
            .iter()
            .map(|p| (p.start_at, p.duration))
            .collect()
    }

    pub fn stopped_playback_count(&self) -> usize {
        lock(&self.state)
            .playbacks
            .iter()
            .filter(|p| p.stopped.load(Ordering::SeqCst))
            .count()
    }

    /// Let the `index`-th scheduled buffer finish naturally.
    ///
    /// Returns false if it was stopped or has already finished.
    pub fn finish_playback(&self, index: usize) -> bool {
        let callback = {
            let mut state = lock(&self.state);
            match state.playbacks.get_mut(index) {
                Some(p) if !p.stopped.load(Ordering::SeqCst) => p.on_ended.take(),
                _ => None,
            }
        };
        match callback {
            Some(on_ended) => {
                on_ended();
                true
            }
            None => false,
        }
    }

    /// Report a device failure from the most recently started live
    /// microphone, as an unplugged device would.
    ///
    /// Returns false if no microphone is delivering.
    pub fn fail_microphone(&self, kind: ErrorKind) -> bool {
        let slot = lock(&self.state)
            .microphones
            .iter()
            .rev()
            .find(|slot| {
                let slot = lock(slot);
                slot.live && slot.on_error.is_some()
            })
            .cloned();

        let Some(slot) = slot else {
            return false;
        };
        let mut slot = lock(&slot);
        match slot.on_error.as_mut() {
            Some(on_error) => {
                on_error(mock_error(kind, "default"));
                true
            }
            None => false,
        }
    }

    /// Report a device failure from the most recent open output context.
    ///
    /// Returns false if no open context has an error callback.
    pub fn fail_output(&self, kind: ErrorKind) -> bool {
        let target = {
            let state = lock(&self.state);
            state
                .output_contexts
                .iter()
                .zip(state.output_errors.iter())
                .rev()
                .find(|(closed, _)| !closed.load(Ordering::SeqCst))
                .map(|(_, errors)| Arc::clone(errors))
        };
        let Some(errors) = target else {
            return false;
        };
        let mut errors = lock(&errors);
        match errors.as_mut() {
            Some(on_error) => {
                on_error(mock_error(kind, "default output"));
                true
            }
            None => false,
        }
    }

    /// Push samples through the most recently started live microphone.
    ///
    /// Returns false if no microphone is delivering.
    pub fn feed_microphone(&self, samples: &[f32]) -> bool {
        let slot = lock(&self.state)
            .microphones
            .iter()
            .rev()
            .find(|slot| {
                let slot = lock(slot);
                slot.live && slot.callback.is_some()
            })
            .cloned();

        let Some(slot) = slot else {
            return false;
        };
        let mut slot = lock(&slot);
        match slot.callback.as_mut() {
            Some(callback) => {
                callback(samples);
                true
            }
            None => false,
        }
    }
}

impl Default for MockAudioPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioPlatform for MockAudioPlatform {
    fn open_input(&self, sample_rate: u32) -> Result<Box<dyn InputContext>> {
        let closed = Arc::new(AtomicBool::new(false));
        lock(&self.state).input_contexts.push(Arc::clone(&closed));
        Ok(Box::new(MockInputContext {
            sample_rate,
            closed,
        }))
    }

    fn open_output(&self, sample_rate: u32) -> Result<Box<dyn OutputContext>> {
        if self.output_failure {
            return Err(LivevoxError::AudioPlayback {
                message: "mock output failure".to_string(),
            });
        }
        let closed = Arc::new(AtomicBool::new(false));
        let errors: ErrorSlot = Arc::new(Mutex::new(None));
        {
            let mut state = lock(&self.state);
            state.output_contexts.push(Arc::clone(&closed));
            state.output_errors.push(Arc::clone(&errors));
        }
        Ok(Box::new(MockOutputContext {
            sample_rate,
            closed,
            errors,
            clock: Arc::clone(&self.clock),
            state: Arc::clone(&self.state),
        }))
    }

    async fn acquire_microphone(
        &self,
        constraints: &MicConstraints,
    ) -> Result<Box<dyn MicrophoneStream>> {
        {
            let mut state = lock(&self.state);
            state.acquisitions += 1;
            state.last_constraints = Some(constraints.clone());
        }

        if let Some(delay) = self.acquire_delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(kind) = self.acquire_failure {
            let device = constraints.device.as_deref().unwrap_or("default");
            return Err(mock_error(kind, device));
        }

        let slot = Arc::new(Mutex::new(MicSlot {
            live: true,
            ..MicSlot::default()
        }));
        lock(&self.state).microphones.push(Arc::clone(&slot));
        Ok(Box::new(MockMicrophone { slot }))
    }
}

struct MockInputContext {
    sample_rate: u32,
    closed: Arc<AtomicBool>,
}

impl InputContext for MockInputContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockOutputContext {
    sample_rate: u32,
    closed: Arc<AtomicBool>,
    errors: ErrorSlot,
    clock: Arc<ManualClock>,
    state: Arc<Mutex<MockState>>,
}

impl OutputContext for MockOutputContext {
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
        let stopped = Arc::new(AtomicBool::new(false));
        lock(&self.state).playbacks.push(MockPlayback {
            start_at,
            duration: buffer.duration(),
            stopped: Arc::clone(&stopped),
            on_ended: Some(on_ended),
        });
        Ok(Box::new(MockPlaybackHandle { stopped }))
    }

    fn set_error_callback(&mut self, on_error: ErrorCallback) {
        *lock(&self.errors) = Some(on_error);
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        *lock(&self.errors) = None;
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockPlaybackHandle {
    stopped: Arc<AtomicBool>,
}

impl PlaybackHandle for MockPlaybackHandle {
    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

struct MockMicrophone {
    slot: Arc<Mutex<MicSlot>>,
}

impl MicrophoneStream for MockMicrophone {
    fn start(&mut self, on_samples: SampleCallback, on_error: ErrorCallback) -> Result<()> {
        let mut slot = lock(&self.slot);
        if !slot.live {
            return Err(LivevoxError::DeviceUnavailable {
                device: "mock microphone was released".to_string(),
            });
        }
        slot.callback = Some(on_samples);
        slot.on_error = Some(on_error);
        Ok(())
    }

    fn stop(&mut self) {
        let mut slot = lock(&self.slot);
        slot.live = false;
        slot.callback = None;
        slot.on_error = None;
    }

    fn is_live(&self) -> bool {
        lock(&self.slot).live
    }
}

// An abandoned acquisition releases the device, as a real stream would.
impl Drop for MockMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}
