//! WebSocket transport to the live voice endpoint.

use crate::error::{LivevoxError, Result};
use crate::transport::protocol::{
    classify_close, classify_handshake_status, media_message, parse_server_message, setup_message,
};
use crate::transport::{
    ClientMessage, ConnectRequest, LinkPeer, ServerEvent, TransportConnector, TransportLink,
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{debug, info, warn};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsStream, tungstenite::Message>;
type WsSource = futures_util::stream::SplitStream<WsStream>;

/// Connects over `wss://`, sends the setup message and waits for
/// `setupComplete` before handing out the link.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

/// Endpoint URL with the credential as the `key` query parameter.
fn endpoint_url(request: &ConnectRequest) -> String {
    let separator = if request.endpoint.contains('?') { '&' } else { '?' };
    format!("{}{}key={}", request.endpoint, separator, request.api_key)
}

fn classify_connect_error(err: &tungstenite::Error) -> LivevoxError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            classify_handshake_status(status.as_u16(), status.canonical_reason().unwrap_or(""))
        }
        _ => {
            let text = err.to_string();
            if text.contains("401") || text.contains("403") {
                LivevoxError::AuthRejected { message: text }
            } else {
                LivevoxError::TransientConnection { message: text }
            }
        }
    }
}

fn close_event(frame: Option<tungstenite::protocol::CloseFrame>) -> ServerEvent {
    match frame {
        Some(frame) => match classify_close(u16::from(frame.code), &frame.reason) {
            Some(err) => ServerEvent::Failed(err),
            None => ServerEvent::Closed {
                reason: Some(frame.reason.to_string()).filter(|r| !r.is_empty()),
            },
        },
        None => ServerEvent::Closed { reason: None },
    }
}

/// Read until the server acknowledges the setup message.
async fn await_setup_complete(source: &mut WsSource) -> Result<()> {
    loop {
        let message = match source.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(classify_connect_error(&e)),
            None => {
                return Err(LivevoxError::TransientConnection {
                    message: "connection closed during setup".to_string(),
                });
            }
        };
        let parsed = match message {
            tungstenite::Message::Text(text) => parse_server_message(&text)?,
            tungstenite::Message::Binary(bytes) => {
                let text = std::str::from_utf8(&bytes).map_err(|e| LivevoxError::Protocol {
                    message: format!("non-UTF-8 setup reply: {e}"),
                })?;
                parse_server_message(text)?
            }
            tungstenite::Message::Close(frame) => {
                return Err(match close_event(frame) {
                    ServerEvent::Failed(err) => err,
                    _ => LivevoxError::TransientConnection {
                        message: "server closed during setup".to_string(),
                    },
                });
            }
            _ => continue,
        };
        if parsed.setup_complete {
            return Ok(());
        }
    }
}

fn deliver(peer: &LinkPeer, event: ServerEvent) -> bool {
    peer.inbound.send(event).is_ok()
}

fn forward_text(peer: &LinkPeer, text: &str) -> bool {
    match parse_server_message(text) {
        Ok(parsed) => {
            if parsed.go_away {
                info!("server announced it will close the connection soon");
            }
            parsed.events.into_iter().all(|event| deliver(peer, event))
        }
        Err(e) => {
            warn!("skipping server message: {e}");
            true
        }
    }
}

/// Move messages between the socket and the link until either side ends.
async fn pump(mut sink: WsSink, mut source: WsSource, mut peer: LinkPeer) {
    loop {
        tokio::select! {
            outgoing = peer.outbound.recv() => match outgoing {
                Some(ClientMessage::Media(payload)) => {
                    let text = match media_message(&payload) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("dropping outgoing frame: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(tungstenite::Message::Text(text.into())).await {
                        deliver(&peer, ServerEvent::Failed(LivevoxError::TransientConnection {
                            message: format!("send failed: {e}"),
                        }));
                        break;
                    }
                }
                None => {
                    debug!("link dropped by session, closing socket");
                    if let Err(e) = sink.send(tungstenite::Message::Close(None)).await {
                        debug!("close frame not sent: {e}");
                    }
                    break;
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    if !forward_text(&peer, &text) {
                        break;
                    }
                }
                Some(Ok(tungstenite::Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => {
                        if !forward_text(&peer, text) {
                            break;
                        }
                    }
                    Err(e) => warn!("skipping non-UTF-8 server message: {e}"),
                },
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    deliver(&peer, close_event(frame));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    deliver(&peer, ServerEvent::Failed(LivevoxError::TransientConnection {
                        message: e.to_string(),
                    }));
                    break;
                }
                None => {
                    deliver(&peer, ServerEvent::Closed { reason: None });
                    break;
                }
            },
        }
    }
    debug!("websocket pump finished");
}

#[async_trait]
impl TransportConnector for WebSocketConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<TransportLink> {
        debug!(?request, "connecting");
        let (socket, _response) = connect_async(endpoint_url(&request).as_str())
            .await
            .map_err(|e| classify_connect_error(&e))?;
        let (mut sink, mut source) = socket.split();

        sink.send(tungstenite::Message::Text(setup_message(&request)?.into()))
            .await
            .map_err(|e| classify_connect_error(&e))?;
        await_setup_complete(&mut source).await?;
        info!(model = %request.model, language = %request.language, "session negotiated");

        let (link, peer) = TransportLink::channel();
        tokio::spawn(pump(sink, source, peer));
        Ok(link)
    }
}
