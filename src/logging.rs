//! Diagnostic logging setup.
//!
//! Logs go to stderr so the status line on stdout stays readable.
//! `RUST_LOG` wins over the verbosity flags when set.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Default filter directive for a verbosity level.
///
/// - quiet → errors only
/// - 0 → warnings
/// - 1 (`-v`) → info for livevox
/// - 2+ (`-vv`) → debug for livevox, info for dependencies
pub fn default_directive(verbosity: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbosity {
        0 => "warn",
        1 => "warn,livevox=info",
        2 => "info,livevox=debug",
        _ => "info,livevox=trace",
    }
}

/// Install the global subscriber. Calling it twice is harmless.
pub fn init(verbosity: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity, quiet)));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbosity >= 2),
        )
        .try_init();
    if installed.is_err() {
        tracing::debug!("logging already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_overrides_verbosity() {
        assert_eq!(default_directive(3, true), "error");
    }

    #[test]
    fn verbosity_raises_livevox_level() {
        assert_eq!(default_directive(0, false), "warn");
        assert!(default_directive(1, false).contains("livevox=info"));
        assert!(default_directive(2, false).contains("livevox=debug"));
        assert!(default_directive(9, false).contains("livevox=trace"));
    }

    #[test]
    fn directives_parse() {
        for level in 0..4 {
            assert!(EnvFilter::try_new(default_directive(level, false)).is_ok());
        }
    }

    #[test]
    fn init_twice_does_not_panic() {
        init(0, false);
        init(2, false);
    }
}
