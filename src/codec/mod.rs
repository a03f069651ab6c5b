//! Frame codec: float samples ⇄ PCM16 bytes ⇄ text-safe wire form.

pub mod pcm;
pub mod transport;

pub use pcm::{AudioBuffer, AudioFrame, EncodedPayload, decode, encode};
pub use transport::{WirePayload, from_base64, to_base64};
