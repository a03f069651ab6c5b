//! Error types for livevox.

use thiserror::Error;

/// Classification of failures as seen by the session state machine.
///
/// Every [`LivevoxError`] maps onto exactly one kind; the kind decides whether
/// the session retries or stops, and which message the widget shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    PermissionDenied,
    DeviceUnavailable,
    DeviceBusy,
    MissingCredential,
    AuthRejected,
    TransientConnection,
    MalformedPayload,
    /// Anything that is not part of the session taxonomy (config, I/O, ...).
    Internal,
}

impl ErrorKind {
    /// Only transient connection failures are retried automatically.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::TransientConnection)
    }

    /// Message shown to the user when a session ends with this kind.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::PermissionDenied => {
                "Microphone access was denied. Allow microphone access and try again."
            }
            ErrorKind::DeviceUnavailable => {
                "No microphone was found. Connect a microphone and try again."
            }
            ErrorKind::DeviceBusy => {
                "The microphone is in use by another application. Close it and try again."
            }
            ErrorKind::MissingCredential => {
                "The voice assistant is not configured: no API key was provided."
            }
            ErrorKind::AuthRejected => {
                "The voice service rejected the API key. Check the configuration."
            }
            ErrorKind::TransientConnection => {
                "Could not reach the voice service. Check your connection and try again."
            }
            ErrorKind::MalformedPayload => "Received audio that could not be decoded.",
            ErrorKind::Internal => "Something went wrong with the voice assistant.",
        }
    }
}

#[derive(Error, Debug)]
pub enum LivevoxError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("No API key configured (set session.api_key or LIVEVOX_API_KEY)")]
    MissingCredential,

    // Audio device errors
    #[error("Microphone permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Audio device not found: {device}")]
    DeviceUnavailable { device: String },

    #[error("Audio device busy: {message}")]
    DeviceBusy { message: String },

    #[error("Audio playback failed: {message}")]
    AudioPlayback { message: String },

    // Codec errors
    #[error("Malformed audio payload: {len} bytes is not a multiple of {frame_bytes}")]
    MalformedPayload { len: usize, frame_bytes: usize },

    #[error("Invalid transport encoding: {0}")]
    InvalidTransportEncoding(#[from] base64::DecodeError),

    // Remote endpoint errors
    #[error("Authentication rejected by voice service: {message}")]
    AuthRejected { message: String },

    #[error("Connection to voice service failed: {message}")]
    TransientConnection { message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // Session lifecycle
    #[error("A session is already {state}; stop it before starting another")]
    SessionAlreadyActive { state: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl LivevoxError {
    /// Classify this error for the session state machine.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LivevoxError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            LivevoxError::DeviceUnavailable { .. } => ErrorKind::DeviceUnavailable,
            LivevoxError::DeviceBusy { .. } => ErrorKind::DeviceBusy,
            LivevoxError::MissingCredential => ErrorKind::MissingCredential,
            LivevoxError::AuthRejected { .. } => ErrorKind::AuthRejected,
            LivevoxError::TransientConnection { .. } => ErrorKind::TransientConnection,
            LivevoxError::MalformedPayload { .. } | LivevoxError::InvalidTransportEncoding(_) => {
                ErrorKind::MalformedPayload
            }
            _ => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// User-facing message for this error's kind.
    pub fn user_message(&self) -> &'static str {
        self.kind().user_message()
    }
}

impl From<serde_json::Error> for LivevoxError {
    fn from(err: serde_json::Error) -> Self {
        LivevoxError::Protocol {
            message: err.to_string(),
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, LivevoxError>;
