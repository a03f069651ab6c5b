//! Interactive terminal front end.
//!
//! Wires the real audio platform and WebSocket transport into a
//! [`SessionManager`], renders each status change as a widget line, and reads
//! widget gestures from stdin.

use crate::audio::cpal_backend::CpalPlatform;
use crate::config::Config;
use crate::error::{LivevoxError, Result};
use crate::language::Language;
use crate::session::{SessionCommand, SessionManager, SessionState, SessionStatus};
use crate::transport::WebSocketConnector;
use crate::widget::{WidgetAction, WidgetView};
use owo_colors::OwoColorize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Command-line overrides for a talk session.
#[derive(Debug, Clone, Default)]
pub struct TalkOptions {
    pub language: Option<Language>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub connect_timeout: Option<Duration>,
    pub auto_start: bool,
    pub quiet: bool,
}

/// One line typed by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Action(WidgetAction),
    /// Bare Enter: open, close or retry depending on the state.
    Toggle,
    Help,
    Quit,
}

/// Parse a stdin line into an [`Input`].
pub fn parse_input(line: &str) -> std::result::Result<Input, String> {
    let mut words = line.split_whitespace();
    let Some(word) = words.next() else {
        return Ok(Input::Toggle);
    };
    match word.to_ascii_lowercase().as_str() {
        "start" | "open" | "talk" => Ok(Input::Action(WidgetAction::Open)),
        "stop" | "close" => Ok(Input::Action(WidgetAction::Close)),
        "retry" => Ok(Input::Action(WidgetAction::Retry)),
        "lang" | "language" => {
            let code = words
                .next()
                .ok_or_else(|| "usage: lang <en|ru|de|fr>".to_string())?;
            code.parse::<Language>()
                .map(|language| Input::Action(WidgetAction::SwitchLanguage(language)))
                .map_err(|e| e.to_string())
        }
        "help" | "?" => Ok(Input::Help),
        "quit" | "exit" | "q" => Ok(Input::Quit),
        other => Err(format!("unknown command '{other}', type 'help'")),
    }
}

/// What a bare Enter means in `state`.
pub fn toggle_action(state: SessionState) -> WidgetAction {
    match state {
        SessionState::Idle => WidgetAction::Open,
        SessionState::Connecting | SessionState::Active => WidgetAction::Close,
        SessionState::ErrorRetrying | SessionState::ErrorTerminal => WidgetAction::Retry,
    }
}

fn print_help() {
    eprintln!("Commands:");
    eprintln!("  <Enter>          start, stop or retry");
    eprintln!("  start | stop     open or close the session");
    eprintln!("  retry            try again after an error");
    eprintln!("  lang <code>      switch language (en, ru, de, fr)");
    eprintln!("  quit             leave");
}

fn render(status: &SessionStatus) {
    let view = WidgetView::from_status(status);
    let tag = format!("[{}]", status.language.code());
    let line = view.to_string();
    match view {
        WidgetView::IdleBubble { notice: None } => println!("{} {}", tag.dimmed(), line.dimmed()),
        WidgetView::IdleBubble { notice: Some(_) } => println!("{} {}", tag.dimmed(), line.yellow()),
        WidgetView::Connecting { .. } => println!("{} {}", tag.dimmed(), line.cyan()),
        WidgetView::Listening => println!("{} {}", tag.dimmed(), line.green().bold()),
        WidgetView::ErrorCard { .. } => println!("{} {}", tag.dimmed(), line.red()),
    }
}

/// Apply CLI overrides on top of the loaded configuration.
pub fn apply_overrides(mut config: Config, options: &TalkOptions) -> Config {
    if let Some(language) = options.language {
        config.session.language = language;
    }
    if let Some(device) = &options.input_device {
        config.audio.input_device = Some(device.clone());
    }
    if let Some(device) = &options.output_device {
        config.audio.output_device = Some(device.clone());
    }
    if let Some(timeout) = options.connect_timeout {
        config.retry.connect_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    }
    config
}

async fn read_commands(
    commands: mpsc::UnboundedSender<SessionCommand>,
    status: watch::Receiver<SessionStatus>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("stdin: {e}");
                break;
            }
        };
        let action = match parse_input(&line) {
            Ok(Input::Action(action)) => action,
            Ok(Input::Toggle) => toggle_action(status.borrow().state),
            Ok(Input::Help) => {
                print_help();
                continue;
            }
            Ok(Input::Quit) => break,
            Err(message) => {
                eprintln!("{message}");
                continue;
            }
        };
        if commands.send(action.into()).is_err() {
            break;
        }
    }
    debug!("command input closed");
}

/// Run an interactive session until the user quits or presses Ctrl-C.
pub async fn run_talk_command(config: Config, options: TalkOptions) -> Result<()> {
    let config = apply_overrides(config, &options);
    match config.validate() {
        // The widget reports this itself when a start is attempted.
        Ok(()) | Err(LivevoxError::MissingCredential) => {}
        Err(e) => return Err(e),
    }

    let platform = CpalPlatform::new()
        .with_input_device(config.audio.input_device.clone())
        .with_output_device(config.audio.output_device.clone());
    let manager = SessionManager::new(
        Arc::new(platform),
        Arc::new(WebSocketConnector::new()),
        config.session_config(),
    );

    let mut status = manager.subscribe();
    render(&status.borrow_and_update());
    let renderer = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            render(&status.borrow_and_update());
        }
    });

    if !options.quiet {
        print_help();
    }

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    if options.auto_start && commands_tx.send(SessionCommand::Start).is_err() {
        debug!("auto start dropped");
    }
    let input = tokio::spawn(read_commands(commands_tx, manager.subscribe()));

    tokio::select! {
        _ = manager.run(commands_rx) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("ctrl-c handler: {e}");
            }
            debug!("interrupted");
        }
    }

    input.abort();
    if let Err(e) = renderer.await
        && !e.is_cancelled()
    {
        warn!("status renderer failed: {e}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_widget_commands() {
        assert_eq!(
            parse_input("start"),
            Ok(Input::Action(WidgetAction::Open))
        );
        assert_eq!(
            parse_input("  STOP "),
            Ok(Input::Action(WidgetAction::Close))
        );
        assert_eq!(
            parse_input("retry"),
            Ok(Input::Action(WidgetAction::Retry))
        );
        assert_eq!(
            parse_input("lang ru"),
            Ok(Input::Action(WidgetAction::SwitchLanguage(Language::Ru)))
        );
        assert_eq!(parse_input(""), Ok(Input::Toggle));
        assert_eq!(parse_input("quit"), Ok(Input::Quit));
        assert_eq!(parse_input("?"), Ok(Input::Help));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_input("lang").is_err());
        assert!(parse_input("lang tlh").is_err());
        assert!(parse_input("dance").is_err());
    }

    #[test]
    fn toggle_follows_state() {
        assert_eq!(toggle_action(SessionState::Idle), WidgetAction::Open);
        assert_eq!(toggle_action(SessionState::Active), WidgetAction::Close);
        assert_eq!(toggle_action(SessionState::Connecting), WidgetAction::Close);
        assert_eq!(toggle_action(SessionState::ErrorTerminal), WidgetAction::Retry);
    }

    #[test]
    fn overrides_replace_config_values() {
        let options = TalkOptions {
            language: Some(Language::Fr),
            input_device: Some("pulse".to_string()),
            connect_timeout: Some(Duration::from_secs(4)),
            ..TalkOptions::default()
        };
        let config = apply_overrides(Config::default(), &options);
        assert_eq!(config.session.language, Language::Fr);
        assert_eq!(config.audio.input_device.as_deref(), Some("pulse"));
        assert_eq!(config.audio.output_device, None);
        assert_eq!(config.retry.connect_timeout_ms, 4000);
    }
}
