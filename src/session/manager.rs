//! The session driver.
//!
//! [`SessionManager`] owns the state machine and the one live
//! [`SessionHandle`]. All mutation happens on the task that calls its
//! methods. Background work (acquiring the microphone and connecting, reading
//! the link, timers, playback completion) posts generation-tagged signals back
//! to it; signals from an older generation are ignored.

use crate::audio::capture::{CaptureConfig, CapturePipeline, FrameSink};
use crate::audio::platform::{AudioPlatform, ErrorCallback, MicConstraints};
use crate::codec::{AudioFrame, EncodedPayload};
use crate::defaults;
use crate::error::{ErrorKind, LivevoxError, Result};
use crate::language::Language;
use crate::playback::{EndedNotifier, PlaybackId};
use crate::session::handle::SessionHandle;
use crate::session::retry::{RetryPolicy, TimerGuard};
use crate::session::state::{Effect, Machine, Rejected, SessionEvent, SessionState, transition};
use crate::transport::{
    ClientMessage, ConnectRequest, ServerEvent, TransportConnector, TransportLink,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

/// Static inputs of every session the manager opens.
#[derive(Clone)]
pub struct SessionConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub voice: String,
    pub language: Language,
    /// Overrides the language's default system instruction.
    pub instructions: Option<String>,
    pub capture: CaptureConfig,
    pub microphone: MicConstraints,
    pub output_sample_rate: u32,
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            model: defaults::DEFAULT_MODEL.to_string(),
            voice: defaults::DEFAULT_VOICE.to_string(),
            language: Language::default(),
            instructions: None,
            capture: CaptureConfig::default(),
            microphone: MicConstraints::default(),
            output_sample_rate: defaults::OUTPUT_SAMPLE_RATE,
            retry: RetryPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn has_credential(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.trim().is_empty())
    }

    /// The request for the current language, if a credential is configured.
    pub fn connect_request(&self) -> Option<ConnectRequest> {
        if !self.has_credential() {
            return None;
        }
        Some(ConnectRequest {
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone()?,
            model: self.model.clone(),
            voice: self.voice.clone(),
            language: self.language,
            instructions: self
                .instructions
                .clone()
                .unwrap_or_else(|| self.language.system_instruction()),
            input_sample_rate: self.capture.sample_rate,
            output_sample_rate: self.output_sample_rate,
        })
    }
}

/// Observable snapshot of the session, published on every change.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Retries used since the last explicit start.
    pub attempt: u32,
    pub max_attempts: u32,
    /// Delay before the pending retry, while retrying.
    pub retry_delay: Option<Duration>,
    pub error: Option<ErrorKind>,
    /// User-facing message for the error, if any.
    pub message: Option<String>,
    pub language: Language,
}

impl SessionStatus {
    fn initial(config: &SessionConfig) -> Self {
        Self {
            state: SessionState::Idle,
            attempt: 0,
            max_attempts: config.retry.max_attempts,
            retry_delay: None,
            error: None,
            message: None,
            language: config.language,
        }
    }
}

/// Requests from the user-facing side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Start,
    Stop,
    /// Explicit retry after an error; same as start, named for the UI.
    Retry,
    SetLanguage(Language),
}

enum Signal {
    Opened {
        generation: u64,
        link: TransportLink,
    },
    Failed {
        generation: u64,
        error: LivevoxError,
    },
    Server {
        generation: u64,
        event: ServerEvent,
    },
    PlaybackEnded {
        generation: u64,
        id: PlaybackId,
    },
    RetryDue {
        generation: u64,
    },
    ConnectTimeout {
        generation: u64,
    },
}

impl Signal {
    fn generation(&self) -> u64 {
        match self {
            Signal::Opened { generation, .. }
            | Signal::Failed { generation, .. }
            | Signal::Server { generation, .. }
            | Signal::PlaybackEnded { generation, .. }
            | Signal::RetryDue { generation }
            | Signal::ConnectTimeout { generation } => *generation,
        }
    }
}

fn post(tx: &mpsc::UnboundedSender<Signal>, signal: Signal) {
    if tx.send(signal).is_err() {
        trace!("session manager gone, signal dropped");
    }
}

/// Drives one voice session at a time.
pub struct SessionManager {
    platform: Arc<dyn AudioPlatform>,
    connector: Arc<dyn TransportConnector>,
    config: SessionConfig,
    machine: Machine,
    generation: u64,
    /// Read by the capture callback, which runs off the manager's task.
    live_generation: Arc<AtomicU64>,
    handle: Option<SessionHandle>,
    retry_timer: Option<TimerGuard>,
    /// Error shown while idle (a start refused for lack of a credential).
    notice: Option<ErrorKind>,
    signals_tx: mpsc::UnboundedSender<Signal>,
    signals_rx: mpsc::UnboundedReceiver<Signal>,
    status_tx: watch::Sender<SessionStatus>,
}

impl SessionManager {
    pub fn new(
        platform: Arc<dyn AudioPlatform>,
        connector: Arc<dyn TransportConnector>,
        config: SessionConfig,
    ) -> Self {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(SessionStatus::initial(&config));
        Self {
            platform,
            connector,
            machine: Machine::new(config.retry.clone()),
            config,
            generation: 0,
            live_generation: Arc::new(AtomicU64::new(0)),
            handle: None,
            retry_timer: None,
            notice: None,
            signals_tx,
            signals_rx,
            status_tx,
        }
    }

    /// Watch status changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        let machine = &self.machine;
        let error = match machine.state {
            SessionState::ErrorRetrying | SessionState::ErrorTerminal => machine.last_error,
            SessionState::Idle => self.notice,
            SessionState::Connecting | SessionState::Active => None,
        };
        SessionStatus {
            state: machine.state,
            attempt: machine.attempt,
            max_attempts: machine.policy.max_attempts,
            retry_delay: (machine.state == SessionState::ErrorRetrying)
                .then(|| machine.policy.delay_for(machine.attempt)),
            error,
            message: error.map(|kind| kind.user_message().to_string()),
            language: self.config.language,
        }
    }

    pub fn state(&self) -> SessionState {
        self.machine.state
    }

    pub fn language(&self) -> Language {
        self.config.language
    }

    /// Bumped on every open and every teardown.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True while the microphone is delivering frames.
    pub fn is_capturing(&self) -> bool {
        self.handle.as_ref().is_some_and(SessionHandle::is_capturing)
    }

    /// Response units scheduled or playing.
    pub fn scheduled_playback(&self) -> usize {
        self.handle
            .as_ref()
            .map_or(0, SessionHandle::scheduled_playback)
    }

    /// Start a session, or retry after an error.
    ///
    /// # Errors
    /// `SessionAlreadyActive` while connecting or active (nothing is
    /// acquired); `MissingCredential` when no API key is configured, in which
    /// case the session stays idle and the status carries the message.
    pub fn start(&mut self) -> Result<()> {
        if self.machine.state.holds_resources() {
            return Err(LivevoxError::SessionAlreadyActive {
                state: self.machine.state.to_string(),
            });
        }
        if !self.config.has_credential() {
            warn!("cannot start: no API key configured");
            if let Err(rejected) = self.apply(SessionEvent::Stop, None) {
                debug!("{rejected}");
            }
            self.notice = Some(ErrorKind::MissingCredential);
            self.publish();
            return Err(LivevoxError::MissingCredential);
        }
        self.notice = None;
        self.apply(SessionEvent::Start, None)
            .map_err(|rejected| LivevoxError::SessionAlreadyActive {
                state: rejected.state.to_string(),
            })
    }

    /// Stop the session, or dismiss an error. No-op while idle.
    pub fn stop(&mut self) {
        self.notice = None;
        if let Err(rejected) = self.apply(SessionEvent::Stop, None) {
            debug!("{rejected}");
        }
        self.publish();
    }

    /// Switch language. A live session is torn down; the next start uses
    /// the new language.
    pub fn set_language(&mut self, language: Language) {
        if language == self.config.language {
            return;
        }
        info!(from = %self.config.language, to = %language, "language changed");
        self.config.language = language;
        if let Err(rejected) = self.apply(SessionEvent::LanguageChanged, None) {
            debug!("{rejected}");
        }
        self.publish();
    }

    pub fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start | SessionCommand::Retry => {
                if let Err(e) = self.start() {
                    info!("start refused: {e}");
                }
            }
            SessionCommand::Stop => self.stop(),
            SessionCommand::SetLanguage(language) => self.set_language(language),
        }
    }

    /// Wait for and handle one background signal.
    pub async fn step(&mut self) {
        if let Some(signal) = self.signals_rx.recv().await {
            self.handle_signal(signal);
        }
    }

    /// Process commands and signals until `commands` closes, then stop.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(signal) = self.signals_rx.recv() => self.handle_signal(signal),
            }
        }
        self.stop();
        debug!("session manager finished");
    }

    fn handle_signal(&mut self, signal: Signal) {
        if signal.generation() != self.generation {
            // Dropping a stale Opened closes its link.
            trace!(
                stale = signal.generation(),
                current = self.generation,
                "ignoring signal from an earlier session"
            );
            return;
        }
        match signal {
            Signal::Opened { link, .. } => {
                if let Err(rejected) = self.apply(SessionEvent::Opened, Some(link)) {
                    debug!("{rejected}");
                }
            }
            Signal::Failed { error, .. } => self.fail(error),
            Signal::Server { event, .. } => self.handle_server_event(event),
            Signal::PlaybackEnded { id, .. } => {
                if let Some(handle) = self.handle.as_mut() {
                    handle.on_playback_ended(id);
                }
            }
            Signal::RetryDue { .. } => {
                self.retry_timer = None;
                if let Err(rejected) = self.apply(SessionEvent::RetryTimerFired, None) {
                    debug!("{rejected}");
                }
            }
            Signal::ConnectTimeout { .. } => {
                if self.machine.state == SessionState::Connecting {
                    self.fail(LivevoxError::TransientConnection {
                        message: format!(
                            "no answer within {} ms",
                            self.config.retry.connect_timeout.as_millis()
                        ),
                    });
                }
            }
        }
        self.publish();
    }

    fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Audio(payload) => self.play(payload),
            ServerEvent::Interrupted => {
                if let Some(handle) = self.handle.as_mut() {
                    let stopped = handle.interrupt();
                    debug!(stopped, "barge-in");
                }
            }
            ServerEvent::TurnComplete => trace!("turn complete"),
            ServerEvent::Closed { reason } => {
                info!(reason = reason.as_deref().unwrap_or(""), "remote closed the session");
                if let Err(rejected) = self.apply(SessionEvent::RemoteClosed, None) {
                    debug!("{rejected}");
                }
            }
            ServerEvent::Failed(error) => self.fail(error),
        }
    }

    fn play(&mut self, payload: EncodedPayload) {
        let Some(handle) = self.handle.as_mut() else {
            return;
        };
        let buffer = match payload.decode(self.config.output_sample_rate, 1) {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!("dropping response audio: {e}");
                return;
            }
        };
        if let Err(e) = handle.enqueue(buffer) {
            warn!("playback failed: {e}");
        }
    }

    fn fail(&mut self, error: LivevoxError) {
        let kind = error.kind();
        if kind == ErrorKind::MalformedPayload {
            warn!("dropping payload: {error}");
            return;
        }
        warn!(?kind, state = %self.machine.state, "session error: {error}");
        if let Err(rejected) = self.apply(SessionEvent::Failed(kind), None) {
            debug!("{rejected}");
        }
    }

    /// Run one event through the machine and execute its effects.
    fn apply(
        &mut self,
        event: SessionEvent,
        mut opened: Option<TransportLink>,
    ) -> std::result::Result<(), Rejected> {
        let (next, effects) = transition(&self.machine, &event)?;
        let from = self.machine.state;
        self.machine = next;
        if from != self.machine.state {
            info!(from = %from, to = %self.machine.state, ?event, "session state changed");
        }

        for effect in effects {
            match effect {
                Effect::BeginConnect => {
                    if let Err(e) = self.begin_connect() {
                        self.fail(e);
                    }
                }
                Effect::Activate => match opened.take() {
                    Some(link) => {
                        if let Err(e) = self.activate(link) {
                            self.fail(e);
                        }
                    }
                    None => debug!("activation without an open connection"),
                },
                Effect::Teardown => self.teardown(),
                Effect::ScheduleRetry { attempt, delay } => self.schedule_retry(attempt, delay),
            }
        }
        self.publish();
        Ok(())
    }

    fn advance_generation(&mut self) -> u64 {
        self.generation += 1;
        self.live_generation.store(self.generation, Ordering::SeqCst);
        self.generation
    }

    fn begin_connect(&mut self) -> Result<()> {
        let request = self
            .config
            .connect_request()
            .ok_or(LivevoxError::MissingCredential)?;
        if let Some(mut previous) = self.handle.take() {
            previous.teardown();
        }
        let generation = self.advance_generation();
        let mut handle = SessionHandle::open(
            self.platform.as_ref(),
            generation,
            self.config.capture.sample_rate,
            self.config.output_sample_rate,
        )?;

        handle.watch_output(self.device_errors(generation));

        let platform = Arc::clone(&self.platform);
        let connector = Arc::clone(&self.connector);
        let constraints = self.config.microphone.clone();
        let microphone = handle.microphone_slot();
        let tx = self.signals_tx.clone();
        handle.track(tokio::spawn(async move {
            let mic = match platform.acquire_microphone(&constraints).await {
                Ok(mic) => mic,
                Err(error) => {
                    post(&tx, Signal::Failed { generation, error });
                    return;
                }
            };
            if let Err(mut mic) = microphone.fill(mic) {
                mic.stop();
                return;
            }
            match connector.connect(request).await {
                Ok(link) => post(&tx, Signal::Opened { generation, link }),
                Err(error) => {
                    microphone.close();
                    post(&tx, Signal::Failed { generation, error });
                }
            }
        }));

        let tx = self.signals_tx.clone();
        handle.set_connect_timer(TimerGuard::after(
            self.config.retry.connect_timeout,
            move || post(&tx, Signal::ConnectTimeout { generation }),
        ));

        info!(
            generation,
            attempt = self.machine.attempt,
            language = %self.config.language,
            "connecting"
        );
        self.handle = Some(handle);
        Ok(())
    }

    fn activate(&mut self, link: TransportLink) -> Result<()> {
        let generation = self.generation;
        let pipeline = CapturePipeline::new(&self.config.capture)?;
        let mic_errors = self.device_errors(generation);
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| LivevoxError::Other("no session to activate".to_string()))?;
        handle.cancel_connect_timer();

        let TransportLink {
            outbound,
            mut inbound,
        } = link;

        let tx = self.signals_tx.clone();
        handle.track(tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                post(&tx, Signal::Server { generation, event });
            }
            post(
                &tx,
                Signal::Server {
                    generation,
                    event: ServerEvent::Closed { reason: None },
                },
            );
        }));

        let tx = self.signals_tx.clone();
        let notifier: EndedNotifier =
            Arc::new(move |id| post(&tx, Signal::PlaybackEnded { generation, id }));
        handle.arm_playback(notifier)?;

        let live = Arc::clone(&self.live_generation);
        let frames = outbound.clone();
        let sink: FrameSink = Box::new(move |frame: AudioFrame| {
            if live.load(Ordering::SeqCst) != generation {
                return;
            }
            if frames.send(ClientMessage::Media(frame.encode())).is_err() {
                trace!("link closed, frame dropped");
            }
        });
        handle.start_capture(pipeline, sink, mic_errors)?;
        handle.set_outbound(outbound);

        info!(generation, "session active");
        Ok(())
    }

    /// Device failures of `generation`, posted as session errors.
    fn device_errors(&self, generation: u64) -> ErrorCallback {
        let tx = self.signals_tx.clone();
        Box::new(move |error| post(&tx, Signal::Failed { generation, error }))
    }

    fn teardown(&mut self) {
        self.advance_generation();
        self.retry_timer = None;
        if let Some(mut handle) = self.handle.take() {
            handle.teardown();
            debug!(generation = handle.generation(), "session torn down");
        }
    }

    fn schedule_retry(&mut self, attempt: u32, delay: Duration) {
        let generation = self.generation;
        let tx = self.signals_tx.clone();
        self.retry_timer = Some(TimerGuard::after(delay, move || {
            post(&tx, Signal::RetryDue { generation })
        }));
        info!(
            attempt,
            max = self.machine.policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "retrying"
        );
    }

    fn publish(&self) {
        let status = self.status();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.retry_timer = None;
        if let Some(mut handle) = self.handle.take() {
            handle.teardown();
        }
    }
}
