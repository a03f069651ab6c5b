//! What the widget shows, derived from session status.
//!
//! The widget never drives the session directly: it renders a
//! [`WidgetView`] for each published [`SessionStatus`] and turns user
//! gestures ([`WidgetAction`]) into [`SessionCommand`]s.

use crate::language::Language;
use crate::session::{SessionCommand, SessionState, SessionStatus};
use std::fmt;
use std::time::Duration;

/// Whether and how the session will try again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryHint {
    /// Retrying on its own after `delay`.
    Automatic {
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
    },
    /// Waiting for the user to press retry.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetView {
    /// Collapsed launcher. `notice` explains a refused start.
    IdleBubble { notice: Option<String> },
    Connecting { attempt: u32 },
    Listening,
    ErrorCard { message: String, retry: RetryHint },
}

impl WidgetView {
    pub fn from_status(status: &SessionStatus) -> Self {
        let message = || {
            status
                .message
                .clone()
                .unwrap_or_else(|| "Something went wrong.".to_string())
        };
        match status.state {
            SessionState::Idle => WidgetView::IdleBubble {
                notice: status.message.clone(),
            },
            SessionState::Connecting => WidgetView::Connecting {
                attempt: status.attempt,
            },
            SessionState::Active => WidgetView::Listening,
            SessionState::ErrorRetrying => WidgetView::ErrorCard {
                message: message(),
                retry: RetryHint::Automatic {
                    attempt: status.attempt,
                    max_attempts: status.max_attempts,
                    delay: status.retry_delay.unwrap_or_default(),
                },
            },
            SessionState::ErrorTerminal => WidgetView::ErrorCard {
                message: message(),
                retry: RetryHint::Manual,
            },
        }
    }
}

impl fmt::Display for WidgetView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WidgetView::IdleBubble { notice: None } => write!(f, "Tap to talk"),
            WidgetView::IdleBubble {
                notice: Some(notice),
            } => write!(f, "Tap to talk ({notice})"),
            WidgetView::Connecting { attempt: 0 } => write!(f, "Connecting..."),
            WidgetView::Connecting { attempt } => write!(f, "Reconnecting (attempt {attempt})..."),
            WidgetView::Listening => write!(f, "Listening"),
            WidgetView::ErrorCard {
                message,
                retry:
                    RetryHint::Automatic {
                        attempt,
                        max_attempts,
                        delay,
                    },
            } => write!(
                f,
                "{message} Retrying in {}s ({attempt}/{max_attempts})",
                delay.as_secs()
            ),
            WidgetView::ErrorCard {
                message,
                retry: RetryHint::Manual,
            } => write!(f, "{message} Press retry to try again."),
        }
    }
}

/// User gestures on the widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetAction {
    Open,
    Close,
    Retry,
    SwitchLanguage(Language),
}

impl From<WidgetAction> for SessionCommand {
    fn from(action: WidgetAction) -> Self {
        match action {
            WidgetAction::Open => SessionCommand::Start,
            WidgetAction::Close => SessionCommand::Stop,
            WidgetAction::Retry => SessionCommand::Retry,
            WidgetAction::SwitchLanguage(language) => SessionCommand::SetLanguage(language),
        }
    }
}
