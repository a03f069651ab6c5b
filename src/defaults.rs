//! Default configuration constants for livevox.
//!
//! Shared by the config layer, the session runtime and the audio backends so
//! every component agrees on rates, frame sizes and retry timing.

/// Microphone capture sample rate in Hz.
///
/// The remote service expects 16 kHz mono PCM16 input.
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of the assistant's streamed speech in Hz.
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Samples per captured frame (≈128 ms at 16 kHz).
pub const FRAME_SAMPLES: usize = 2048;

/// High-pass cutoff applied to microphone input, removes sub-audible rumble.
pub const HIGHPASS_CUTOFF_HZ: f32 = 85.0;

/// Maximum automatic retries after a transient connection failure.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base retry delay; attempt `n` waits `n * RETRY_BASE_DELAY_MS`.
pub const RETRY_BASE_DELAY_MS: u64 = 2000;

/// How long a session may stay in Connecting before it counts as a
/// transient connection failure.
pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default remote endpoint (bidirectional streaming over WebSocket).
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default model negotiated with the remote endpoint.
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

/// Default prebuilt voice of the assistant.
pub const DEFAULT_VOICE: &str = "Zephyr";

/// Environment variable carrying the API credential.
pub const API_KEY_ENV: &str = "LIVEVOX_API_KEY";

/// PCM16 sample scale for negative values (full negative range).
pub const PCM_NEGATIVE_SCALE: f32 = 32768.0;

/// PCM16 sample scale for non-negative values.
pub const PCM_POSITIVE_SCALE: f32 = 32767.0;
