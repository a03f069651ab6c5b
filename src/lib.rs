//! livevox - realtime voice assistant session core
//!
//! Captures microphone audio, streams it to a remote voice model, and plays
//! the spoken replies back gaplessly, with a reconnecting session lifecycle.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod codec;
pub mod config;
pub mod defaults;
pub mod error;
pub mod language;
pub mod logging;
pub mod playback;
pub mod session;
pub mod transport;
pub mod widget;

// Composition root - needs the real audio platform, transport and terminal
#[cfg(all(feature = "cpal-audio", feature = "websocket", feature = "cli"))]
pub mod app;

// Platform seams (audio host, remote service)
pub use audio::platform::{AudioPlatform, InputContext, MicrophoneStream, OutputContext};
pub use transport::TransportConnector;

// Session
pub use session::{SessionCommand, SessionConfig, SessionManager, SessionState, SessionStatus};
pub use widget::{WidgetAction, WidgetView};

// Codec
pub use codec::{AudioBuffer, AudioFrame, EncodedPayload};

// Error handling
pub use error::{ErrorKind, LivevoxError, Result};

// Config
pub use config::Config;
pub use language::Language;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_appends_git_hash() {
        let ver = version_string();
        if option_env!("GIT_HASH").is_some_and(|h| !h.is_empty()) {
            let hash_part = ver.split('+').nth(1).unwrap_or("");
            assert_eq!(hash_part.len(), 7, "Git hash should be 7 chars, got: {}", ver);
        } else {
            assert_eq!(ver, env!("CARGO_PKG_VERSION"));
        }
    }
}
