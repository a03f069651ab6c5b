//! Command-line interface for livevox
//!
//! Provides argument parsing using clap derive macros.

use crate::language::Language;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Talk to a realtime voice assistant from the terminal
#[derive(Parser, Debug)]
#[command(
    name = "livevox",
    version,
    about = "Talk to a realtime voice assistant from the terminal"
)]
pub struct Cli {
    /// Subcommand to execute (default: talk)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: session events, -vv: full diagnostics)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Conversation language: en, ru, de, fr
    #[arg(long, value_name = "LANG")]
    pub language: Option<Language>,

    /// Audio input device (e.g., pulse)
    #[arg(long, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Audio output device
    #[arg(long, value_name = "DEVICE")]
    pub output_device: Option<String>,

    /// Give up on a connection attempt after this long. Examples: 10s, 1m
    #[arg(long, value_name = "DURATION", value_parser = parse_timeout)]
    pub connect_timeout: Option<Duration>,

    /// Start talking immediately instead of waiting for `start`
    #[arg(long)]
    pub auto_start: bool,
}

/// Parse a timeout. Bare numbers are seconds.
fn parse_timeout(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Open an interactive voice session (default)
    Talk,

    /// List available audio devices
    Devices,

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration (API key masked)
    Show,
    /// Print the configuration file path
    Path,
    /// Validate the effective configuration
    Check,
}
