use anyhow::Result;
use clap::{CommandFactory, Parser};
use livevox::app::{TalkOptions, run_talk_command};
use livevox::audio::cpal_backend::{list_input_devices, list_output_devices, suppress_audio_warnings};
use livevox::cli::{Cli, Commands, ConfigAction};
use livevox::config::Config;
use owo_colors::OwoColorize;
use std::path::Path;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    livevox::logging::init(cli.verbose, cli.quiet);

    match cli.command {
        None | Some(Commands::Talk) => {
            // Suppress noisy JACK/ALSA warnings before audio init
            suppress_audio_warnings();
            let config = load_config(cli.config.as_deref())?;
            let options = TalkOptions {
                language: cli.language,
                input_device: cli.device,
                output_device: cli.output_device,
                connect_timeout: cli.connect_timeout,
                auto_start: cli.auto_start,
                quiet: cli.quiet,
            };
            run_talk_command(config, options).await?;
        }
        Some(Commands::Devices) => {
            suppress_audio_warnings();
            list_audio_devices()?;
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "livevox", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config), which must exist
/// 2. Default config path (~/.config/livevox/config.toml)
/// 3. Built-in defaults
///
/// Environment variable overrides apply on top of all three.
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path())?,
    };
    Ok(config.with_env_overrides())
}

/// List available audio devices.
fn list_audio_devices() -> Result<()> {
    let inputs = list_input_devices()?;
    let outputs = list_output_devices()?;

    if inputs.is_empty() {
        eprintln!("No audio input devices found");
    } else {
        println!("Input devices:");
        for (idx, device) in inputs.iter().enumerate() {
            println!("  [{}] {}", idx, device);
        }
    }

    if outputs.is_empty() {
        eprintln!("No audio output devices found");
    } else {
        println!("Output devices:");
        for (idx, device) in outputs.iter().enumerate() {
            println!("  [{}] {}", idx, device);
        }
    }

    if inputs.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    let config_path = custom_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", config.redacted().to_toml()?);
        }
        ConfigAction::Check => {
            let config = load_config(custom_path)?;
            match config.validate() {
                Ok(()) => println!("{} {}", "ok".green(), config_path.display()),
                Err(e) => {
                    eprintln!("{} {}", "invalid:".red(), e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
