use crate::audio::capture::CaptureConfig;
use crate::audio::filter::HighPassFilter;
use crate::audio::platform::MicConstraints;
use crate::defaults;
use crate::error::{LivevoxError, Result};
use crate::language::Language;
use crate::session::{RetryPolicy, SessionConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub session: ServiceConfig,
    pub audio: AudioConfig,
    pub retry: RetryConfig,
}

/// Remote voice service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    pub language: Language,
    /// Replaces the per-language system instruction.
    pub instructions: Option<String>,
}

/// Audio capture and playback configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub frame_samples: usize,
    pub highpass_cutoff_hz: f32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

/// Reconnection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: defaults::DEFAULT_ENDPOINT.to_string(),
            model: defaults::DEFAULT_MODEL.to_string(),
            voice: defaults::DEFAULT_VOICE.to_string(),
            language: Language::default(),
            instructions: None,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            input_sample_rate: defaults::INPUT_SAMPLE_RATE,
            output_sample_rate: defaults::OUTPUT_SAMPLE_RATE,
            frame_samples: defaults::FRAME_SAMPLES,
            highpass_cutoff_hz: defaults::HIGHPASS_CUTOFF_HZ,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_RETRY_ATTEMPTS,
            base_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            connect_timeout_ms: defaults::CONNECT_TIMEOUT_MS,
        }
    }
}

fn invalid(key: &str, message: impl Into<String>) -> LivevoxError {
    LivevoxError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    ///
    /// # Errors
    /// `ConfigFileNotFound` if the file does not exist, `Config` for invalid TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LivevoxError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                LivevoxError::Io(e)
            }
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load configuration from a file or return defaults if it doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(LivevoxError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - LIVEVOX_API_KEY → session.api_key
    /// - LIVEVOX_ENDPOINT → session.endpoint
    /// - LIVEVOX_MODEL → session.model
    /// - LIVEVOX_LANGUAGE → session.language
    /// - LIVEVOX_AUDIO_DEVICE → audio.input_device
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var(defaults::API_KEY_ENV)
            && !key.is_empty()
        {
            self.session.api_key = Some(key);
        }

        if let Ok(endpoint) = std::env::var("LIVEVOX_ENDPOINT")
            && !endpoint.is_empty()
        {
            self.session.endpoint = endpoint;
        }

        if let Ok(model) = std::env::var("LIVEVOX_MODEL")
            && !model.is_empty()
        {
            self.session.model = model;
        }

        if let Ok(language) = std::env::var("LIVEVOX_LANGUAGE")
            && !language.is_empty()
        {
            match language.parse() {
                Ok(language) => self.session.language = language,
                Err(e) => warn!("ignoring LIVEVOX_LANGUAGE: {e}"),
            }
        }

        if let Ok(device) = std::env::var("LIVEVOX_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.input_device = Some(device);
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/livevox/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("livevox")
            .join("config.toml")
    }

    /// Check everything a session needs before it is started.
    ///
    /// # Errors
    /// `ConfigInvalidValue` for the first unusable value; otherwise
    /// `MissingCredential` without an API key. The credential is checked
    /// last, so callers that tolerate its absence still see every other
    /// problem.
    pub fn validate(&self) -> Result<()> {
        if !self.session.endpoint.starts_with("ws://") && !self.session.endpoint.starts_with("wss://")
        {
            return Err(invalid("session.endpoint", "must be a ws:// or wss:// URL"));
        }
        if self.audio.input_sample_rate == 0 {
            return Err(invalid("audio.input_sample_rate", "must be greater than zero"));
        }
        if self.audio.output_sample_rate == 0 {
            return Err(invalid("audio.output_sample_rate", "must be greater than zero"));
        }
        if self.audio.frame_samples == 0 {
            return Err(invalid("audio.frame_samples", "must be greater than zero"));
        }
        HighPassFilter::new(self.audio.input_sample_rate, self.audio.highpass_cutoff_hz)?;
        if self.retry.connect_timeout_ms == 0 {
            return Err(invalid("retry.connect_timeout_ms", "must be greater than zero"));
        }
        if !self.session_config().has_credential() {
            return Err(LivevoxError::MissingCredential);
        }
        Ok(())
    }

    /// The same configuration with the API key masked, for display.
    pub fn redacted(&self) -> Self {
        let mut shown = self.clone();
        if shown.session.api_key.is_some() {
            shown.session.api_key = Some("********".to_string());
        }
        shown
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| LivevoxError::ConfigParse {
            message: e.to_string(),
        })
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            sample_rate: self.audio.input_sample_rate,
            frame_samples: self.audio.frame_samples,
            highpass_cutoff_hz: self.audio.highpass_cutoff_hz,
        }
    }

    pub fn mic_constraints(&self) -> MicConstraints {
        MicConstraints {
            device: self.audio.input_device.clone(),
            sample_rate: self.audio.input_sample_rate,
            channels: 1,
            echo_cancellation: self.audio.echo_cancellation,
            noise_suppression: self.audio.noise_suppression,
            auto_gain_control: self.audio.auto_gain_control,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            connect_timeout: Duration::from_millis(self.retry.connect_timeout_ms),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.session.endpoint.clone(),
            api_key: self.session.api_key.clone(),
            model: self.session.model.clone(),
            voice: self.session.voice.clone(),
            language: self.session.language,
            instructions: self.session.instructions.clone(),
            capture: self.capture_config(),
            microphone: self.mic_constraints(),
            output_sample_rate: self.audio.output_sample_rate,
            retry: self.retry_policy(),
        }
    }
}
