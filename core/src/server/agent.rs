// Peer agent — one task per accepted connection
//
// Connecting → Authenticating → Active → Closing → Closed

use super::hub::Hub;
use super::roster::AgentId;
use super::{stopped, ServerEvent};
use crate::envelope::{Envelope, Notification};
use crate::store::{CredentialStore, CredentialVerifier};
use crate::transport::Connection;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Connecting,
    Authenticating,
    Active,
    Closing,
    Closed,
}

/// Why a peer was turned away during the handshake
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthRejection {
    #[error("Unknown user")]
    UnknownUser,
    #[error("Bad credential")]
    BadCredential,
    #[error("Credential store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Connection limit reached")]
    CapacityExceeded,
}

pub(crate) struct PeerAgent {
    id: AgentId,
    connection: Arc<Connection>,
    hub: Arc<Hub>,
    store: Arc<dyn CredentialStore>,
    verifier: Arc<dyn CredentialVerifier>,
    shutdown: watch::Receiver<bool>,
    state: AgentState,
    name: Option<String>,
}

impl PeerAgent {
    pub fn new(
        id: AgentId,
        connection: Arc<Connection>,
        hub: Arc<Hub>,
        store: Arc<dyn CredentialStore>,
        verifier: Arc<dyn CredentialVerifier>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            connection,
            hub,
            store,
            verifier,
            shutdown,
            state: AgentState::Connecting,
            name: None,
        }
    }

    /// Drive the connection until it closes. Consumes the agent.
    pub async fn run(mut self) -> AgentState {
        self.state = AgentState::Authenticating;
        debug!("{} connected from {}", self.id, self.connection.peer_addr());

        loop {
            let received = tokio::select! {
                result = self.connection.receive() => result,
                _ = stopped(&mut self.shutdown) => {
                    debug!("{} stopping for shutdown", self.id);
                    break;
                }
            };

            match received {
                Ok(Some(envelope)) => self.handle(envelope).await,
                Ok(None) => continue,
                Err(e) => {
                    debug!("{} receive ended: {}", self.id, e);
                    break;
                }
            }

            if matches!(self.state, AgentState::Closing | AgentState::Closed) {
                break;
            }
        }

        self.finish().await;
        self.state
    }

    async fn handle(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Notification(Notification::Auth { name, credential }) => {
                let credential = Zeroizing::new(credential);
                if self.state == AgentState::Authenticating {
                    self.authenticate(name, credential).await;
                } else {
                    debug!("{} sent Auth again, ignoring", self.id);
                }
            }
            Envelope::Payload(line) => {
                if self.state != AgentState::Active {
                    warn!("{} sent a payload before authenticating, dropped", self.id);
                    return;
                }
                let envelope = Envelope::Payload(line.clone());
                if self.hub.relay(self.id, &envelope).await.is_some() {
                    self.hub.emit(ServerEvent::MessageReceived(line));
                } else {
                    debug!("{} is no longer on the roster, dropping its line", self.id);
                }
            }
            Envelope::Notification(Notification::Closing) => {
                debug!("{} is closing", self.id);
                self.state = AgentState::Closing;
            }
            Envelope::Notification(Notification::KeepAlive)
            | Envelope::Notification(Notification::ForceClose) => {
                debug!("{} sent a server-only notification, ignoring", self.id);
            }
        }
    }

    async fn authenticate(&mut self, name: String, credential: Zeroizing<String>) {
        let address = self.connection.peer_addr();

        let outcome = match self.check_credential(&name, credential).await {
            Ok(()) => {
                self.hub
                    .admit(self.id, &name, Arc::clone(&self.connection))
                    .await
            }
            Err(rejection) => Err(rejection),
        };

        match outcome {
            Ok(()) => {
                self.state = AgentState::Active;
                self.name = Some(name);
            }
            Err(reason) => {
                warn!("Rejected {} from {}: {}", name, address, reason);
                self.hub.emit(ServerEvent::PeerRejected {
                    name,
                    address,
                    reason,
                });
                if let Err(e) = self.connection.send(&Envelope::force_close()).await {
                    debug!("ForceClose to {} failed: {}", self.id, e);
                }
                self.connection.close().await;
                self.state = AgentState::Closed;
            }
        }
    }

    async fn check_credential(
        &self,
        name: &str,
        credential: Zeroizing<String>,
    ) -> Result<(), AuthRejection> {
        let record = self
            .store
            .find_by_name(name)
            .await
            .map_err(|e| AuthRejection::StoreUnavailable(e.to_string()))?
            .ok_or(AuthRejection::UnknownUser)?;

        // PBKDF2 is CPU-bound; run it on the blocking pool.
        let verifier = Arc::clone(&self.verifier);
        let stored_hash = record.password_hash;
        let verified =
            tokio::task::spawn_blocking(move || verifier.verify(&credential, &stored_hash))
                .await
                .unwrap_or(false);

        if verified {
            Ok(())
        } else {
            Err(AuthRejection::BadCredential)
        }
    }

    async fn finish(&mut self) {
        if self.state != AgentState::Closed {
            self.state = AgentState::Closing;
        }
        if self.hub.remove(self.id) {
            if let Some(name) = &self.name {
                info!("{} ({}) left", name, self.id);
            }
        }
        self.connection.close().await;
        self.state = AgentState::Closed;
    }
}

// ============================================================================
// TESTS
// ============================================================================
