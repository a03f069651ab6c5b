//! Text-safe transport encoding applied at the payload boundary.

use crate::codec::pcm::EncodedPayload;
use crate::error::Result;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

/// Encode arbitrary bytes as standard base64.
pub fn to_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode standard base64 back into bytes.
///
/// # Errors
/// Returns `LivevoxError::InvalidTransportEncoding` for malformed input.
pub fn from_base64(text: &str) -> Result<Vec<u8>> {
    Ok(BASE64.decode(text)?)
}

/// Payload as it travels inside JSON messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePayload {
    pub mime_type: String,
    pub data: String,
}

impl WirePayload {
    /// Strip the transport encoding.
    pub fn into_payload(self) -> Result<EncodedPayload> {
        Ok(EncodedPayload::new(from_base64(&self.data)?, self.mime_type))
    }
}

impl EncodedPayload {
    /// Apply the transport encoding.
    pub fn to_wire(&self) -> WirePayload {
        WirePayload {
            mime_type: self.mime_type.clone(),
            data: to_base64(&self.data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LivevoxError;

    #[test]
    fn base64_round_trip_is_identity_for_all_byte_values() {
        let bytes: Vec<u8> = (0..=255u8).cycle().take(1031).collect();
        assert_eq!(from_base64(&to_base64(&bytes)).unwrap(), bytes);
    }

    #[test]
    fn base64_round_trip_handles_empty_and_padding_lengths() {
        for len in 0..8 {
            let bytes: Vec<u8> = (0..len).map(|i| (i * 37) as u8).collect();
            assert_eq!(from_base64(&to_base64(&bytes)).unwrap(), bytes);
        }
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let err = from_base64("not*base64").unwrap_err();
        assert!(matches!(err, LivevoxError::InvalidTransportEncoding(_)));
    }

    #[test]
    fn wire_payload_serializes_camel_case() {
        let payload = EncodedPayload::new(vec![1, 2, 3], "audio/pcm;rate=16000");
        let json = serde_json::to_string(&payload.to_wire()).unwrap();
        assert_eq!(json, r#"{"mimeType":"audio/pcm;rate=16000","data":"AQID"}"#);
    }

    #[test]
    fn wire_payload_restores_bytes() {
        let payload = EncodedPayload::new(vec![9, 8, 7, 6], "audio/pcm;rate=24000");
        assert_eq!(payload.to_wire().into_payload().unwrap(), payload);
    }
}
