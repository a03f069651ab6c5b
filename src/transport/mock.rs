//! Scripted transport connector for testing.

use crate::error::{ErrorKind, LivevoxError, Result};
use crate::transport::{
    ClientMessage, ConnectRequest, LinkPeer, ServerEvent, TransportConnector, TransportLink,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;

/// What a scripted connection attempt does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Accept,
    Fail(ErrorKind),
    /// Never resolve, as a server that never answers the handshake.
    Hang,
}

/// Server side of an accepted mock connection.
#[derive(Debug)]
pub struct RemoteEnd {
    peer: LinkPeer,
    client_closed: bool,
}

impl RemoteEnd {
    /// Messages the client has sent so far.
    pub fn drain(&mut self) -> Vec<ClientMessage> {
        let mut messages = Vec::new();
        loop {
            match self.peer.outbound.try_recv() {
                Ok(message) => messages.push(message),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.client_closed = true;
                    break;
                }
            }
        }
        messages
    }

    /// True once the client dropped its sending side.
    pub fn is_closed_by_client(&mut self) -> bool {
        self.drain();
        self.client_closed
    }

    /// Deliver an event to the client. False if the client is gone.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.peer.inbound.send(event).is_ok()
    }
}

#[derive(Default)]
struct ConnectorState {
    script: VecDeque<ConnectOutcome>,
    requests: Vec<ConnectRequest>,
    remotes: Vec<RemoteEnd>,
}

/// Mock connector. Clones share state.
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
    fallback: ConnectOutcome,
    delay: Option<Duration>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn error_for(kind: ErrorKind) -> LivevoxError {
    match kind {
        ErrorKind::AuthRejected => LivevoxError::AuthRejected {
            message: "mock: API key not valid".to_string(),
        },
        ErrorKind::TransientConnection => LivevoxError::TransientConnection {
            message: "mock: connection refused".to_string(),
        },
        ErrorKind::MissingCredential => LivevoxError::MissingCredential,
        ErrorKind::PermissionDenied => LivevoxError::PermissionDenied {
            message: "mock".to_string(),
        },
        ErrorKind::DeviceBusy => LivevoxError::DeviceBusy {
            message: "mock".to_string(),
        },
        ErrorKind::DeviceUnavailable => LivevoxError::DeviceUnavailable {
            device: "mock".to_string(),
        },
        ErrorKind::MalformedPayload | ErrorKind::Internal => {
            LivevoxError::Other("mock connector failure".to_string())
        }
    }
}

impl MockConnector {
    /// Accepts every connection.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ConnectorState::default())),
            fallback: ConnectOutcome::Accept,
            delay: None,
        }
    }

    /// Play `outcomes` in order; afterwards use the fallback.
    pub fn with_script(self, outcomes: impl IntoIterator<Item = ConnectOutcome>) -> Self {
        lock(&self.state).script.extend(outcomes);
        self
    }

    /// Outcome once the script is exhausted.
    pub fn with_fallback(mut self, outcome: ConnectOutcome) -> Self {
        self.fallback = outcome;
        self
    }

    /// Handshake latency (on the tokio clock).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn connection_attempts(&self) -> usize {
        lock(&self.state).requests.len()
    }

    pub fn requests(&self) -> Vec<ConnectRequest> {
        lock(&self.state).requests.clone()
    }

    /// Number of connections accepted.
    pub fn accepted(&self) -> usize {
        lock(&self.state).remotes.len()
    }

    /// Run `f` against the server side of the `index`-th accepted connection.
    pub fn with_remote<R>(&self, index: usize, f: impl FnOnce(&mut RemoteEnd) -> R) -> Option<R> {
        lock(&self.state).remotes.get_mut(index).map(f)
    }

    /// Deliver `event` on the most recent accepted connection.
    pub fn send_latest(&self, event: ServerEvent) -> bool {
        lock(&self.state)
            .remotes
            .last()
            .is_some_and(|remote| remote.send(event))
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportConnector for MockConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<TransportLink> {
        let outcome = {
            let mut state = lock(&self.state);
            state.requests.push(request);
            state.script.pop_front().unwrap_or(self.fallback)
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match outcome {
            ConnectOutcome::Accept => {
                let (link, peer) = TransportLink::channel();
                lock(&self.state).remotes.push(RemoteEnd {
                    peer,
                    client_closed: false,
                });
                Ok(link)
            }
            ConnectOutcome::Fail(kind) => Err(error_for(kind)),
            ConnectOutcome::Hang => std::future::pending().await,
        }
    }
}
