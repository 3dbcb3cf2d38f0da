//! Chat client — the peer side of the handshake
//!
//! [`ChatClient::connect`] authenticates immediately and starts a receive
//! task; everything the server sends arrives as a [`ClientEvent`].

pub mod config;

pub use config::ClientConfig;

use crate::envelope::{ChatLine, Envelope, Notification, Presence, MAX_BODY_SIZE};
use crate::transport::{outward_ip, Connection, TransportError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A line was written to the server
    Sent(ChatLine),
    /// A line could not be written; the client is now inactive
    SendFailed(ChatLine),
    /// A line from another peer (or history replay)
    Received(ChatLine),
    /// The server dropped us on purpose
    ForceClosed,
    /// The connection broke
    Disconnected,
}

/// Receiving end of the client's event stream
pub type ClientEvents = mpsc::UnboundedReceiver<ClientEvent>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Connect failed: {0}")]
    Connect(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Message body too large: {0} bytes")]
    BodyTooLarge(usize),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

struct Shared {
    active: AtomicBool,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl Shared {
    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    /// Returns whether this call flipped the client to inactive
    fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }
}

pub struct ChatClient {
    name: String,
    server_addr: SocketAddr,
    origin_address: String,
    connection: Arc<Connection>,
    shared: Arc<Shared>,
    send_gate: tokio::sync::Mutex<()>,
    receiver: JoinHandle<()>,
}

impl ChatClient {
    /// Connect and authenticate. `Auth` is always the first envelope sent.
    pub async fn connect(config: ClientConfig) -> Result<(Self, ClientEvents), ClientError> {
        config.validate().map_err(ClientError::InvalidConfig)?;

        let addr = config.server_addr();
        let connection = Connection::connect(&addr, config.send_timeout)
            .await
            .map_err(|e| ClientError::Connect(format!("{}: {}", addr, e)))?;

        if let Err(e) = connection
            .send(&Envelope::auth(config.name.clone(), config.credential.as_str()))
            .await
        {
            connection.close().await;
            return Err(ClientError::Connect(format!("{}: {}", addr, e)));
        }

        let probed = outward_ip(&config.probe_target).await;
        let origin_address = if probed.is_unspecified() {
            connection.local_addr().ip().to_string()
        } else {
            probed.to_string()
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            active: AtomicBool::new(true),
            events: events_tx,
        });
        let connection = Arc::new(connection);
        let receiver = tokio::spawn(receive_loop(Arc::clone(&connection), Arc::clone(&shared)));

        info!("Connected to {} as {}", connection.peer_addr(), config.name);
        Ok((
            Self {
                name: config.name,
                server_addr: connection.peer_addr(),
                origin_address,
                connection,
                shared,
                send_gate: tokio::sync::Mutex::new(()),
                receiver,
            },
            events_rx,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.connection.local_addr()
    }

    /// Address stamped on outgoing lines
    pub fn origin_address(&self) -> &str {
        &self.origin_address
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Send one chat line. A failed write ends the session; there is no
    /// reconnect.
    pub async fn send_message(
        &self,
        body: &str,
        presence: Option<Presence>,
    ) -> Result<ChatLine, ClientError> {
        if body.len() > MAX_BODY_SIZE {
            return Err(ClientError::BodyTooLarge(body.len()));
        }
        let line = ChatLine::new(self.name.clone(), body, self.origin_address.clone(), presence);

        let _gate = self.send_gate.lock().await;
        if !self.is_active() {
            self.shared.emit(ClientEvent::SendFailed(line));
            return Err(ClientError::NotConnected);
        }

        match self.connection.send(&Envelope::Payload(line.clone())).await {
            Ok(()) => {
                self.shared.emit(ClientEvent::Sent(line.clone()));
                Ok(line)
            }
            Err(e) => {
                warn!("Send to {} failed: {}", self.server_addr, e);
                self.shared.deactivate();
                self.connection.close().await;
                self.shared.emit(ClientEvent::SendFailed(line));
                Err(ClientError::Transport(e))
            }
        }
    }

    /// Say goodbye and close
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let _gate = self.send_gate.lock().await;
        if !self.shared.deactivate() {
            return Err(ClientError::NotConnected);
        }

        if let Err(e) = self.connection.send(&Envelope::closing()).await {
            debug!("Closing notification to {} failed: {}", self.server_addr, e);
        }
        self.connection.close().await;
        info!("Disconnected from {}", self.server_addr);
        Ok(())
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

async fn receive_loop(connection: Arc<Connection>, shared: Arc<Shared>) {
    loop {
        match connection.receive().await {
            Ok(Some(Envelope::Payload(line))) => shared.emit(ClientEvent::Received(line)),
            Ok(Some(Envelope::Notification(Notification::ForceClose))) => {
                info!("Server at {} closed the session", connection.peer_addr());
                if shared.deactivate() {
                    shared.emit(ClientEvent::ForceClosed);
                }
                break;
            }
            Ok(Some(Envelope::Notification(other))) => {
                debug!("Ignoring {:?} from server", other);
            }
            Ok(None) => continue,
            Err(e) => {
                if shared.deactivate() {
                    debug!("Connection to {} lost: {}", connection.peer_addr(), e);
                    shared.emit(ClientEvent::Disconnected);
                }
                break;
            }
        }
    }
    connection.close().await;
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::DEFAULT_SEND_TIMEOUT;
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// A bare listener standing in for the server
    async fn fake_server() -> (TcpListener, ClientConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = ClientConfig {
            probe_target: "127.0.0.1:9".to_string(),
            ..ClientConfig::new("127.0.0.1", port, "alice", "pw")
        };
        (listener, config)
    }

    async fn connect() -> (ChatClient, ClientEvents, Connection) {
        let (listener, config) = fake_server().await;
        let (client, accepted) = tokio::join!(ChatClient::connect(config), listener.accept());
        let server_side = Connection::new(accepted.unwrap().0, DEFAULT_SEND_TIMEOUT).unwrap();
        let (client, events) = client.unwrap();
        (client, events, server_side)
    }

    async fn next_event(events: &mut ClientEvents) -> ClientEvent {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_auth_is_first_envelope() {
        let (client, _events, server) = connect().await;
        assert_eq!(server.receive().await.unwrap(), Some(Envelope::auth("alice", "pw")));
        assert!(client.is_active());
        assert_eq!(client.name(), "alice");
        assert_eq!(client.origin_address(), "127.0.0.1");
    }

    #[tokio::test]
    async fn test_send_emits_sent() {
        let (client, mut events, server) = connect().await;
        server.receive().await.unwrap();

        let line = client.send_message("hi", Some(Presence::Eating)).await.unwrap();
        assert_eq!(next_event(&mut events).await, ClientEvent::Sent(line.clone()));

        let env = server.receive().await.unwrap().unwrap();
        assert_eq!(env.as_chat_line(), Some(&line));
    }

    #[tokio::test]
    async fn test_payload_received_and_keep_alive_ignored() {
        let (_client, mut events, server) = connect().await;
        server.send(&Envelope::keep_alive()).await.unwrap();
        let line = ChatLine::new("bob", "yo", "10.0.0.9", None);
        server.send(&Envelope::from(line.clone())).await.unwrap();

        assert_eq!(next_event(&mut events).await, ClientEvent::Received(line));
    }

    #[tokio::test]
    async fn test_force_close_surfaces_once() {
        let (client, mut events, server) = connect().await;
        server.send(&Envelope::force_close()).await.unwrap();

        assert_eq!(next_event(&mut events).await, ClientEvent::ForceClosed);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!client.is_active());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_server_hangup_is_disconnected() {
        let (client, mut events, server) = connect().await;
        server.close().await;

        assert_eq!(next_event(&mut events).await, ClientEvent::Disconnected);
        assert!(!client.is_active());
    }

    #[tokio::test]
    async fn test_send_after_disconnect_fails() {
        let (client, mut events, server) = connect().await;
        client.disconnect().await.unwrap();

        server.receive().await.unwrap(); // Auth
        assert_eq!(server.receive().await.unwrap(), Some(Envelope::closing()));

        assert!(matches!(
            client.send_message("late", None).await,
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(
            next_event(&mut events).await,
            ClientEvent::SendFailed(_)
        ));
        assert!(matches!(
            client.disconnect().await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_oversized_body_refused_locally() {
        let (client, _events, _server) = connect().await;
        let body = "x".repeat(MAX_BODY_SIZE + 1);
        assert!(matches!(
            client.send_message(&body, None).await,
            Err(ClientError::BodyTooLarge(_))
        ));
        assert!(client.is_active());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = ChatClient::connect(ClientConfig::new("127.0.0.1", port, "alice", "pw")).await;
        assert!(matches!(result, Err(ClientError::Connect(_))));
    }
}
