//! Connection to the remote streaming endpoint.
//!
//! The session core only sees a [`TransportConnector`] that resolves to a
//! [`TransportLink`]: a pair of channels. Resolving successfully is the
//! open acknowledgment; everything after that is messages.

pub mod mock;
pub mod protocol;
#[cfg(feature = "websocket")]
pub mod websocket;

use crate::codec::EncodedPayload;
use crate::error::{LivevoxError, Result};
use crate::language::Language;
use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

pub use mock::{ConnectOutcome, MockConnector, RemoteEnd};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;

/// Everything needed to open and negotiate one session.
#[derive(Clone, PartialEq)]
pub struct ConnectRequest {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub language: Language,
    pub instructions: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
}

// The credential stays out of logs.
impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("language", &self.language)
            .field("input_sample_rate", &self.input_sample_rate)
            .field("output_sample_rate", &self.output_sample_rate)
            .finish_non_exhaustive()
    }
}

/// Client → server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// One encoded capture frame.
    Media(EncodedPayload),
}

/// Server → client.
#[derive(Debug)]
pub enum ServerEvent {
    /// A chunk of response audio.
    Audio(EncodedPayload),
    /// The user started talking over the response (barge-in).
    Interrupted,
    TurnComplete,
    /// The remote side closed the connection normally.
    Closed { reason: Option<String> },
    /// The connection failed after it was established.
    Failed(LivevoxError),
}

/// An open connection, as seen by the session.
///
/// Dropping `outbound` asks the transport to close.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<ClientMessage>,
    pub inbound: mpsc::UnboundedReceiver<ServerEvent>,
}

/// The transport's side of a [`TransportLink`].
#[derive(Debug)]
pub struct LinkPeer {
    pub outbound: mpsc::UnboundedReceiver<ClientMessage>,
    pub inbound: mpsc::UnboundedSender<ServerEvent>,
}

impl TransportLink {
    /// Create a connected link/peer pair.
    pub fn channel() -> (TransportLink, LinkPeer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            TransportLink {
                outbound: out_tx,
                inbound: in_rx,
            },
            LinkPeer {
                outbound: out_rx,
                inbound: in_tx,
            },
        )
    }
}

/// Opens connections to the streaming endpoint.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Open and negotiate a connection.
    ///
    /// # Errors
    /// `AuthRejected` when the credential is refused, `TransientConnection`
    /// for anything that may succeed on a later attempt.
    async fn connect(&self, request: ConnectRequest) -> Result<TransportLink>;
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn request() -> ConnectRequest {
        ConnectRequest {
            endpoint: "wss://example.invalid/ws".to_string(),
            api_key: "secret-key".to_string(),
            model: "models/test".to_string(),
            voice: "Zephyr".to_string(),
            language: Language::De,
            instructions: "Be brief.".to_string(),
            input_sample_rate: 16000,
            output_sample_rate: 24000,
        }
    }

    #[test]
    fn debug_redacts_credential() {
        let shown = format!("{:?}", request());
        assert!(!shown.contains("secret-key"));
        assert!(shown.contains("<redacted>"));
    }

    #[tokio::test]
    async fn link_channel_is_connected_both_ways() {
        let (mut link, mut peer) = TransportLink::channel();
        let payload = EncodedPayload::new(vec![0, 0], "audio/pcm;rate=16000");

        link.outbound
            .send(ClientMessage::Media(payload.clone()))
            .unwrap();
        assert_eq!(
            peer.outbound.recv().await,
            Some(ClientMessage::Media(payload))
        );

        peer.inbound.send(ServerEvent::TurnComplete).unwrap();
        assert!(matches!(
            link.inbound.recv().await,
            Some(ServerEvent::TurnComplete)
        ));
    }
}
