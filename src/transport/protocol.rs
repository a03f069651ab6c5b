//! JSON messages exchanged with the live voice endpoint.

use crate::codec::{EncodedPayload, WirePayload};
use crate::error::{LivevoxError, Result};
use crate::transport::{ConnectRequest, ServerEvent};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// WebSocket close code for a policy violation; the endpoint uses it for bad keys.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<WirePayload>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<WirePayload>,
}

/// Any message the server sends. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

/// What one server message means to the session.
#[derive(Debug, Default)]
pub struct Parsed {
    pub setup_complete: bool,
    pub go_away: bool,
    pub events: Vec<ServerEvent>,
}

/// First message on a new connection.
pub fn setup_message(request: &ConnectRequest) -> Result<String> {
    let message = SetupMessage {
        setup: Setup {
            model: request.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: request.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![Part {
                    text: Some(request.instructions.clone()),
                    inline_data: None,
                }],
            },
        },
    };
    Ok(serde_json::to_string(&message)?)
}

/// Wrap one encoded frame for sending.
pub fn media_message(payload: &EncodedPayload) -> Result<String> {
    let message = RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: vec![payload.to_wire()],
        },
    };
    Ok(serde_json::to_string(&message)?)
}

/// Interpret one server text message.
///
/// Audio parts with an invalid transport encoding are logged and skipped;
/// the rest of the message is still used.
///
/// # Errors
/// Returns `LivevoxError::Protocol` if the text is not a server message.
pub fn parse_server_message(text: &str) -> Result<Parsed> {
    let message: ServerMessage = serde_json::from_str(text)?;
    let mut parsed = Parsed {
        setup_complete: message.setup_complete.is_some(),
        go_away: message.go_away.is_some(),
        events: Vec::new(),
    };

    if let Some(content) = message.server_content {
        if content.interrupted {
            parsed.events.push(ServerEvent::Interrupted);
        }
        let parts = content.model_turn.map(|turn| turn.parts).unwrap_or_default();
        for part in parts {
            let Some(inline) = part.inline_data else {
                continue;
            };
            match inline.into_payload() {
                Ok(payload) => parsed.events.push(ServerEvent::Audio(payload)),
                Err(e) => warn!("dropping audio part: {e}"),
            }
        }
        if content.turn_complete {
            parsed.events.push(ServerEvent::TurnComplete);
        }
    }
    Ok(parsed)
}

/// Classify a close frame sent by the server.
///
/// `None` for an ordinary close, the session error otherwise.
pub fn classify_close(code: u16, reason: &str) -> Option<LivevoxError> {
    if code == CLOSE_POLICY_VIOLATION || mentions_credential(reason) {
        return Some(LivevoxError::AuthRejected {
            message: format!("closed by server ({code}): {reason}"),
        });
    }
    match code {
        1000 | 1001 | 1005 => None,
        _ => Some(LivevoxError::TransientConnection {
            message: format!("closed by server ({code}): {reason}"),
        }),
    }
}

/// Classify a failed handshake by HTTP status.
pub fn classify_handshake_status(status: u16, detail: &str) -> LivevoxError {
    if status == 401 || status == 403 {
        LivevoxError::AuthRejected {
            message: format!("HTTP {status}: {detail}"),
        }
    } else {
        LivevoxError::TransientConnection {
            message: format!("HTTP {status}: {detail}"),
        }
    }
}

fn mentions_credential(reason: &str) -> bool {
    let lower = reason.to_lowercase();
    lower.contains("api key") || lower.contains("api_key") || lower.contains("unauthenticated")
}
