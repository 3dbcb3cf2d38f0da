//! Chat server — accepts peers, authenticates them and relays chat lines
//!
//! `ChatServer::startup` binds a listener and spawns two tasks: the accept
//! loop (one [`agent`] task per connection) and the keep-alive loop. All
//! shared state lives in the [`hub`]; the presentation layer only sees the
//! [`ServerEvent`] stream and the methods below.

pub mod agent;
pub mod config;
pub(crate) mod hub;
pub mod roster;

pub use agent::{AgentState, AuthRejection};
pub use config::{ServerConfig, MAX_HISTORY_CAPACITY};
pub use hub::BroadcastReport;
pub use roster::{AgentId, PeerInfo};

use crate::envelope::{ChatLine, Envelope, Presence, MAX_BODY_SIZE};
use crate::store::{CredentialStore, CredentialVerifier};
use crate::transport::{outward_ip, Connection};
use agent::PeerAgent;
use hub::Hub;
use parking_lot::Mutex;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Everything the presentation layer hears about a running server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// An authenticated peer sent a chat line
    MessageReceived(ChatLine),
    /// The roster grew or shrank; carries the new size
    RosterCountChanged(usize),
    PeerAdmitted {
        name: String,
        address: SocketAddr,
    },
    PeerRejected {
        name: String,
        address: SocketAddr,
        reason: AuthRejection,
    },
    PeerLeft {
        name: String,
    },
}

/// Receiving end of the server's event stream
pub type ServerEvents = mpsc::UnboundedReceiver<ServerEvent>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Startup failed: {0}")]
    Startup(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Server already running")]
    AlreadyRunning,
    #[error("Server not running")]
    NotRunning,
    #[error("Message body too large: {0} bytes")]
    BodyTooLarge(usize),
}

struct Running {
    hub: Arc<Hub>,
    local_addr: SocketAddr,
    outward_ip: IpAddr,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct ChatServer {
    config: ServerConfig,
    store: Arc<dyn CredentialStore>,
    verifier: Arc<dyn CredentialVerifier>,
    running: Mutex<Option<Running>>,
}

impl ChatServer {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn CredentialStore>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Self {
        Self {
            config,
            store,
            verifier,
            running: Mutex::new(None),
        }
    }

    /// Bind `bind_host:port` and start serving. Port 0 picks a free port.
    pub async fn startup(&self, port: u16) -> Result<ServerEvents, ServerError> {
        if self.is_active() {
            return Err(ServerError::AlreadyRunning);
        }
        self.config.validate().map_err(ServerError::InvalidConfig)?;

        let bind_addr = format!("{}:{}", self.config.bind_host, port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| ServerError::Startup(format!("{}: {}", bind_addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Startup(e.to_string()))?;
        let outward_ip = outward_ip(&self.config.probe_target).await;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let hub = Arc::new(Hub::new(
            self.config.max_connections,
            self.config.history_capacity,
            events_tx,
        ));
        let (shutdown, _) = watch::channel(false);

        let mut running = self.running.lock();
        if running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let accept = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&hub),
            Arc::clone(&self.store),
            Arc::clone(&self.verifier),
            self.config.clone(),
            shutdown.subscribe(),
        ));
        let keep_alive = tokio::spawn(keep_alive_loop(
            Arc::clone(&hub),
            self.config.keep_alive_interval,
            shutdown.subscribe(),
        ));

        info!("Chat server listening on {}", local_addr);
        *running = Some(Running {
            hub,
            local_addr,
            outward_ip,
            shutdown,
            tasks: vec![accept, keep_alive],
        });
        Ok(events_rx)
    }

    /// Tell every peer to leave, stop accepting and release every socket
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        let running = self.running.lock().take().ok_or(ServerError::NotRunning)?;

        let closed = running.hub.close_all().await;
        running.shutdown.send_replace(true);
        for task in running.tasks {
            if let Err(e) = task.await {
                warn!("Server task ended abnormally: {}", e);
            }
        }

        info!("Chat server on {} stopped ({} peers closed)", running.local_addr, closed);
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.local_addr)
    }

    /// `"<outward ip>:<port>, <n> peers"` while running
    pub fn server_info(&self) -> Option<String> {
        let running = self.running.lock();
        let running = running.as_ref()?;
        Some(format!(
            "{}:{}, {} peers",
            running.outward_ip,
            running.local_addr.port(),
            running.hub.roster_count()
        ))
    }

    pub fn roster_count(&self) -> usize {
        self.hub().map(|hub| hub.roster_count()).unwrap_or(0)
    }

    pub fn roster_names(&self) -> Vec<String> {
        self.hub().map(|hub| hub.roster_names()).unwrap_or_default()
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        self.hub().map(|hub| hub.peers()).unwrap_or_default()
    }

    /// Recent chat lines, oldest first
    pub fn history(&self) -> Vec<ChatLine> {
        self.hub().map(|hub| hub.history()).unwrap_or_default()
    }

    pub async fn broadcast(&self, envelope: &Envelope) -> Result<BroadcastReport, ServerError> {
        let hub = self.hub().ok_or(ServerError::NotRunning)?;
        Ok(hub.broadcast(envelope).await)
    }

    pub async fn broadcast_excluding(
        &self,
        sender: AgentId,
        envelope: &Envelope,
    ) -> Result<BroadcastReport, ServerError> {
        let hub = self.hub().ok_or(ServerError::NotRunning)?;
        Ok(hub.broadcast_excluding(sender, envelope).await)
    }

    pub async fn send_history_to(&self, agent: AgentId) -> Result<bool, ServerError> {
        let hub = self.hub().ok_or(ServerError::NotRunning)?;
        Ok(hub.send_history_to(agent).await)
    }

    /// Evict the earliest admitted peer called `name`
    pub async fn evict_by_name(&self, name: &str) -> bool {
        match self.hub() {
            Some(hub) => hub.evict_by_name(name).await,
            None => false,
        }
    }

    /// Broadcast a line typed by the server operator
    pub async fn send_message(
        &self,
        body: &str,
        presence: Option<Presence>,
    ) -> Result<BroadcastReport, ServerError> {
        if body.len() > MAX_BODY_SIZE {
            return Err(ServerError::BodyTooLarge(body.len()));
        }
        let (hub, origin) = {
            let running = self.running.lock();
            let running = running.as_ref().ok_or(ServerError::NotRunning)?;
            (Arc::clone(&running.hub), running.outward_ip.to_string())
        };

        let line = ChatLine::new(self.config.operator_name.clone(), body, origin, presence);
        Ok(hub.broadcast(&Envelope::Payload(line)).await)
    }

    fn hub(&self) -> Option<Arc<Hub>> {
        self.running.lock().as_ref().map(|r| Arc::clone(&r.hub))
    }
}

/// Resolves once the shutdown flag is raised (or its sender is gone)
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn accept_loop(
    listener: TcpListener,
    hub: Arc<Hub>,
    store: Arc<dyn CredentialStore>,
    verifier: Arc<dyn CredentialVerifier>,
    config: ServerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = stopped(&mut shutdown) => break,
        };

        match accepted {
            Ok((stream, address)) => match Connection::new(stream, config.send_timeout) {
                Ok(connection) => {
                    let agent = PeerAgent::new(
                        hub.next_agent_id(),
                        Arc::new(connection),
                        Arc::clone(&hub),
                        Arc::clone(&store),
                        Arc::clone(&verifier),
                        shutdown.clone(),
                    );
                    tokio::spawn(agent.run());
                }
                Err(e) => debug!("Dropping connection from {}: {}", address, e),
            },
            Err(e) => {
                warn!("Accept failed: {}", e);
                tokio::select! {
                    _ = tokio::time::sleep(config.accept_backoff) => {}
                    _ = stopped(&mut shutdown) => break,
                }
            }
        }
    }
    debug!("Accept loop stopped");
}

async fn keep_alive_loop(
    hub: Arc<Hub>,
    period: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = hub.broadcast(&Envelope::keep_alive()).await;
                if report.pruned > 0 {
                    info!("Keep-alive pruned {} dead peers", report.pruned);
                }
            }
            _ = stopped(&mut shutdown) => break,
        }
    }
    debug!("Keep-alive loop stopped");
}

// ============================================================================
// TESTS
// ============================================================================
