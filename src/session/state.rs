//! Session lifecycle as a pure transition function.
//!
//! The manager feeds [`SessionEvent`]s through [`transition`] and executes the
//! returned [`Effect`]s. Nothing in here touches devices, sockets or timers.

use crate::error::ErrorKind;
use crate::session::retry::RetryPolicy;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Active,
    ErrorRetrying,
    ErrorTerminal,
}

impl SessionState {
    /// Capture resources and the output context exist only in these states.
    pub fn holds_resources(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Active)
    }

    pub fn is_error(self) -> bool {
        matches!(self, SessionState::ErrorRetrying | SessionState::ErrorTerminal)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::ErrorRetrying => "retrying",
            SessionState::ErrorTerminal => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// User start, or explicit retry from an error state.
    Start,
    /// User stop, or dismissal of an error.
    Stop,
    LanguageChanged,
    /// The transport acknowledged the open.
    Opened,
    Failed(ErrorKind),
    /// The remote side closed the connection normally.
    RemoteClosed,
    RetryTimerFired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Open contexts, acquire the microphone, connect, arm the connect timeout.
    BeginConnect,
    /// Start capture and arm the playback scheduler.
    Activate,
    /// Release every resource of the current session and cancel its timers.
    Teardown,
    ScheduleRetry { attempt: u32, delay: Duration },
}

/// An event that is not allowed in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected {
    pub state: SessionState,
    pub event: SessionEvent,
}

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} is not allowed while {}", self.event, self.state)
    }
}

/// Lifecycle state plus the retry bookkeeping that goes with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Machine {
    pub state: SessionState,
    /// Retries used since the last explicit start.
    pub attempt: u32,
    pub last_error: Option<ErrorKind>,
    pub policy: RetryPolicy,
}

impl Machine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: SessionState::Idle,
            attempt: 0,
            last_error: None,
            policy,
        }
    }

    fn to(&self, state: SessionState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }

    fn reset(&self, state: SessionState) -> Self {
        Self {
            state,
            attempt: 0,
            last_error: None,
            policy: self.policy.clone(),
        }
    }

    fn unchanged(&self) -> (Self, Vec<Effect>) {
        (self.clone(), Vec::new())
    }

    fn failed(&self, kind: ErrorKind) -> (Self, Vec<Effect>) {
        if kind.is_retryable() && self.attempt < self.policy.max_attempts {
            let attempt = self.attempt + 1;
            let next = Self {
                state: SessionState::ErrorRetrying,
                attempt,
                last_error: Some(kind),
                policy: self.policy.clone(),
            };
            let delay = self.policy.delay_for(attempt);
            (
                next,
                vec![Effect::Teardown, Effect::ScheduleRetry { attempt, delay }],
            )
        } else {
            let next = Self {
                state: SessionState::ErrorTerminal,
                last_error: Some(kind),
                ..self.clone()
            };
            (next, vec![Effect::Teardown])
        }
    }
}

/// Compute the next machine and the effects to run.
pub fn transition(
    machine: &Machine,
    event: &SessionEvent,
) -> Result<(Machine, Vec<Effect>), Rejected> {
    use SessionEvent as E;
    use SessionState as S;

    let outcome = match (machine.state, *event) {
        (S::Connecting | S::Active, E::Start) => {
            return Err(Rejected {
                state: machine.state,
                event: *event,
            });
        }
        (S::Idle, E::Start) => (machine.reset(S::Connecting), vec![Effect::BeginConnect]),
        (S::ErrorRetrying | S::ErrorTerminal, E::Start) => (
            machine.reset(S::Connecting),
            vec![Effect::Teardown, Effect::BeginConnect],
        ),

        (S::Idle, E::Stop | E::LanguageChanged) => machine.unchanged(),
        (S::Connecting | S::Active | S::ErrorRetrying, E::Stop | E::LanguageChanged) => {
            (machine.reset(S::Idle), vec![Effect::Teardown])
        }
        (S::ErrorTerminal, E::Stop) => (machine.reset(S::Idle), Vec::new()),
        (S::ErrorTerminal, E::LanguageChanged) => machine.unchanged(),

        (S::Connecting, E::Opened) => (machine.to(S::Active), vec![Effect::Activate]),
        (_, E::Opened) => machine.unchanged(),

        (S::Connecting | S::Active, E::Failed(kind)) => machine.failed(kind),
        (S::ErrorRetrying, E::Failed(kind)) if !kind.is_retryable() => machine.failed(kind),
        (_, E::Failed(_)) => machine.unchanged(),

        (S::Active, E::RemoteClosed) => (machine.reset(S::Idle), vec![Effect::Teardown]),
        (S::Connecting, E::RemoteClosed) => machine.failed(ErrorKind::TransientConnection),
        (_, E::RemoteClosed) => machine.unchanged(),

        (S::ErrorRetrying, E::RetryTimerFired) => {
            (machine.to(S::Connecting), vec![Effect::BeginConnect])
        }
        (_, E::RetryTimerFired) => machine.unchanged(),
    };
    Ok(outcome)
}
