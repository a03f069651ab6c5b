//! Resources of one live session.

use crate::audio::capture::{ActiveCapture, CapturePipeline, FrameSink};
use crate::audio::platform::{
    AudioPlatform, ErrorCallback, InputContext, MicrophoneStream, OutputContext,
};
use crate::codec::AudioBuffer;
use crate::error::{LivevoxError, Result};
use crate::playback::{EndedNotifier, PlaybackId, PlaybackScheduler, PlaybackUnit};
use crate::session::retry::TimerGuard;
use crate::transport::ClientMessage;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::debug;

enum Parked {
    Waiting,
    Held(Box<dyn MicrophoneStream>),
    Closed,
}

/// The microphone between acquisition and the start of capture.
///
/// The connect task parks the device here as soon as it is acquired, so a
/// teardown during the handshake releases it on the spot instead of waiting
/// for the aborted task to be dropped.
#[derive(Clone)]
pub struct MicrophoneSlot(Arc<Mutex<Parked>>);

impl MicrophoneSlot {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(Parked::Waiting)))
    }

    fn lock(&self) -> MutexGuard<'_, Parked> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Park an acquired microphone. A closed slot hands it back.
    pub fn fill(
        &self,
        mic: Box<dyn MicrophoneStream>,
    ) -> std::result::Result<(), Box<dyn MicrophoneStream>> {
        let mut parked = self.lock();
        if matches!(*parked, Parked::Closed) {
            return Err(mic);
        }
        *parked = Parked::Held(mic);
        Ok(())
    }

    /// Take the parked microphone, if any.
    pub fn take(&self) -> Option<Box<dyn MicrophoneStream>> {
        let mut parked = self.lock();
        match std::mem::replace(&mut *parked, Parked::Waiting) {
            Parked::Held(mic) => Some(mic),
            other => {
                *parked = other;
                None
            }
        }
    }

    pub fn is_held(&self) -> bool {
        matches!(*self.lock(), Parked::Held(_))
    }

    /// Release a parked microphone and refuse any later one. Idempotent.
    pub fn close(&self) {
        let previous = std::mem::replace(&mut *self.lock(), Parked::Closed);
        if let Parked::Held(mut mic) = previous {
            mic.stop();
            debug!("parked microphone released");
        }
    }
}

/// Output side: a bare context while connecting, a scheduler once active.
enum Output {
    Pending(Box<dyn OutputContext>),
    Armed(PlaybackScheduler),
    Released,
}

/// Everything one connection holds: contexts, microphone, link, tasks.
///
/// At most one exists per session manager. [`SessionHandle::teardown`] (or
/// drop) releases all of it.
pub struct SessionHandle {
    generation: u64,
    input: Option<Box<dyn InputContext>>,
    output: Output,
    microphone: MicrophoneSlot,
    capture: Option<ActiveCapture>,
    outbound: Option<UnboundedSender<ClientMessage>>,
    tasks: Vec<JoinHandle<()>>,
    connect_timer: Option<TimerGuard>,
}

impl SessionHandle {
    /// Open both audio contexts for a new connection attempt.
    ///
    /// # Errors
    /// Fails if either context cannot be opened; nothing is left open.
    pub fn open(
        platform: &dyn AudioPlatform,
        generation: u64,
        input_rate: u32,
        output_rate: u32,
    ) -> Result<Self> {
        let mut input = platform.open_input(input_rate)?;
        let output = match platform.open_output(output_rate) {
            Ok(output) => output,
            Err(e) => {
                input.close();
                return Err(e);
            }
        };
        Ok(Self {
            generation,
            input: Some(input),
            output: Output::Pending(output),
            microphone: MicrophoneSlot::new(),
            capture: None,
            outbound: None,
            tasks: Vec::new(),
            connect_timer: None,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Keep a background task alive for as long as this handle.
    pub fn track(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    /// Where the connect task parks the acquired microphone.
    pub fn microphone_slot(&self) -> MicrophoneSlot {
        self.microphone.clone()
    }

    /// Report output device failures to `on_error` while connecting and
    /// active.
    pub fn watch_output(&mut self, on_error: ErrorCallback) {
        if let Output::Pending(context) = &mut self.output {
            context.set_error_callback(on_error);
        }
    }

    pub fn set_connect_timer(&mut self, timer: TimerGuard) {
        self.connect_timer = Some(timer);
    }

    pub fn cancel_connect_timer(&mut self) {
        self.connect_timer = None;
    }

    /// Turn the pending output context into a playback scheduler.
    pub fn arm_playback(&mut self, notifier: EndedNotifier) -> Result<()> {
        match std::mem::replace(&mut self.output, Output::Released) {
            Output::Pending(context) => {
                self.output = Output::Armed(PlaybackScheduler::new(context, notifier));
                Ok(())
            }
            other => {
                self.output = other;
                Err(LivevoxError::Other(
                    "playback armed twice or after release".to_string(),
                ))
            }
        }
    }

    /// Start delivering frames from the parked microphone to `sink`.
    pub fn start_capture(
        &mut self,
        pipeline: CapturePipeline,
        sink: FrameSink,
        on_error: ErrorCallback,
    ) -> Result<()> {
        let mic = self.microphone.take().ok_or_else(|| {
            LivevoxError::Other("no microphone acquired for this session".to_string())
        })?;
        self.capture = Some(ActiveCapture::start(mic, pipeline, sink, on_error)?);
        Ok(())
    }

    pub fn set_outbound(&mut self, outbound: UnboundedSender<ClientMessage>) {
        self.outbound = Some(outbound);
    }

    /// Schedule response audio.
    pub fn enqueue(&mut self, buffer: AudioBuffer) -> Result<PlaybackUnit> {
        match &mut self.output {
            Output::Armed(scheduler) => scheduler.enqueue(buffer),
            _ => Err(LivevoxError::AudioPlayback {
                message: "playback is not armed".to_string(),
            }),
        }
    }

    /// Barge-in: stop scheduled playback. Returns how many units stopped.
    pub fn interrupt(&mut self) -> usize {
        match &mut self.output {
            Output::Armed(scheduler) => scheduler.interrupt(),
            _ => 0,
        }
    }

    pub fn on_playback_ended(&mut self, id: PlaybackId) {
        if let Output::Armed(scheduler) = &mut self.output {
            scheduler.on_ended(id);
        }
    }

    pub fn scheduled_playback(&self) -> usize {
        match &self.output {
            Output::Armed(scheduler) => scheduler.scheduled_count(),
            _ => 0,
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.as_ref().is_some_and(ActiveCapture::is_live)
    }

    /// Release everything. Idempotent.
    pub fn teardown(&mut self) {
        self.microphone.close();
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        match std::mem::replace(&mut self.output, Output::Released) {
            Output::Armed(mut scheduler) => scheduler.close(),
            Output::Pending(mut context) => context.close(),
            Output::Released => {}
        }
        if let Some(mut input) = self.input.take() {
            input.close();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.outbound = None;
        self.connect_timer = None;
    }

    pub fn is_released(&self) -> bool {
        matches!(self.output, Output::Released) && self.input.is_none()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if !self.is_released() {
            debug!(generation = self.generation, "session handle dropped while live");
        }
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::CaptureConfig;
    use crate::audio::mock::MockAudioPlatform;
    use crate::audio::platform::MicConstraints;
    use crate::error::ErrorKind;

    fn buffer() -> AudioBuffer {
        AudioBuffer::mono(vec![0.0; 2400], 24000)
    }

    #[test]
    fn open_failure_leaves_nothing_open() {
        let platform = MockAudioPlatform::new().with_output_failure();
        assert!(SessionHandle::open(&platform, 1, 16000, 24000).is_err());
        assert_eq!(platform.input_contexts_opened(), 1);
        assert!(platform.all_contexts_closed());
    }

    #[test]
    fn playback_requires_arming() {
        let platform = MockAudioPlatform::new();
        let mut handle = SessionHandle::open(&platform, 1, 16000, 24000).unwrap();
        assert!(handle.enqueue(buffer()).is_err());

        handle.arm_playback(Arc::new(|_| {})).unwrap();
        assert!(handle.arm_playback(Arc::new(|_| {})).is_err());
        handle.enqueue(buffer()).unwrap();
        assert_eq!(handle.scheduled_playback(), 1);
        assert_eq!(handle.interrupt(), 1);
    }

    #[tokio::test]
    async fn teardown_releases_everything_once() {
        let platform = MockAudioPlatform::new();
        let mut handle = SessionHandle::open(&platform, 3, 16000, 24000).unwrap();
        let mic = platform
            .acquire_microphone(&MicConstraints::default())
            .await
            .unwrap();
        assert!(handle.microphone_slot().fill(mic).is_ok());
        handle.arm_playback(Arc::new(|_| {})).unwrap();
        handle
            .start_capture(
                CapturePipeline::new(&CaptureConfig::default()).unwrap(),
                Box::new(|_| {}),
                Box::new(|_| {}),
            )
            .unwrap();
        handle.enqueue(buffer()).unwrap();
        let task = tokio::spawn(std::future::pending::<()>());
        handle.track(task);
        assert!(handle.is_capturing());

        handle.teardown();
        handle.teardown();
        assert!(handle.is_released());
        assert!(!handle.is_capturing());
        assert_eq!(platform.live_microphones(), 0);
        assert_eq!(platform.stopped_playback_count(), 1);
        assert!(platform.all_contexts_closed());
    }

    #[tokio::test]
    async fn teardown_releases_a_parked_microphone_immediately() {
        let platform = MockAudioPlatform::new();
        let mut handle = SessionHandle::open(&platform, 1, 16000, 24000).unwrap();
        let slot = handle.microphone_slot();
        let mic = platform
            .acquire_microphone(&MicConstraints::default())
            .await
            .unwrap();
        assert!(slot.fill(mic).is_ok());
        assert!(slot.is_held());
        assert_eq!(platform.live_microphones(), 1);

        handle.teardown();
        assert!(!slot.is_held());
        assert_eq!(platform.live_microphones(), 0);
    }

    #[tokio::test]
    async fn a_closed_slot_refuses_late_microphones() {
        let platform = MockAudioPlatform::new();
        let mut handle = SessionHandle::open(&platform, 1, 16000, 24000).unwrap();
        let slot = handle.microphone_slot();
        handle.teardown();

        let mic = platform
            .acquire_microphone(&MicConstraints::default())
            .await
            .unwrap();
        let Err(mut refused) = slot.fill(mic) else {
            panic!("closed slot accepted a microphone");
        };
        refused.stop();
        assert_eq!(platform.live_microphones(), 0);
    }

    #[test]
    fn capture_needs_an_acquired_microphone() {
        let platform = MockAudioPlatform::new();
        let mut handle = SessionHandle::open(&platform, 1, 16000, 24000).unwrap();
        let started = handle.start_capture(
            CapturePipeline::new(&CaptureConfig::default()).unwrap(),
            Box::new(|_| {}),
            Box::new(|_| {}),
        );
        assert!(started.is_err());
        assert!(!handle.is_capturing());
    }

    #[test]
    fn output_failures_reach_the_watcher() {
        let platform = MockAudioPlatform::new();
        let mut handle = SessionHandle::open(&platform, 1, 16000, 24000).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::clone(&seen);
        handle.watch_output(Box::new(move |e| errors.lock().unwrap().push(e.kind())));
        handle.arm_playback(Arc::new(|_| {})).unwrap();

        assert!(platform.fail_output(ErrorKind::DeviceUnavailable));
        assert_eq!(*seen.lock().unwrap(), vec![ErrorKind::DeviceUnavailable]);

        handle.teardown();
        assert!(!platform.fail_output(ErrorKind::DeviceUnavailable));
    }

    #[test]
    fn drop_releases_contexts() {
        let platform = MockAudioPlatform::new();
        let handle = SessionHandle::open(&platform, 1, 16000, 24000).unwrap();
        assert_eq!(platform.open_context_count(), 2);
        drop(handle);
        assert!(platform.all_contexts_closed());
    }
}
