// Hub — shared roster, history and fan-out for one running server
//
// Roster and history sit behind short synchronous locks that are never held
// across an await. Every admitted peer has a bounded outbound queue drained
// by its own writer task, so the hub never waits on a socket. Enqueueing
// (broadcasts, history replay, eviction) happens under the delivery gate:
// a peer admitted while a broadcast is in flight sees its full history
// before any later line, and one slow reader delays nobody else.

use super::agent::AuthRejection;
use super::roster::{AgentId, PeerInfo, Roster, RosterEntry};
use super::ServerEvent;
use crate::envelope::{ChatLine, Envelope};
use crate::store::HistoryBuffer;
use crate::transport::Connection;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// Queue room per peer on top of a full history replay
pub const OUTBOX_SLACK: usize = 64;

/// How long shutdown lets queued ForceClose notices flush
const FLUSH_GRACE: Duration = Duration::from_secs(2);

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Peers the envelope was queued for
    pub delivered: usize,
    /// Peers removed because they were gone or not keeping up
    pub pruned: usize,
}

pub(crate) struct Hub {
    roster: Mutex<Roster>,
    history: Mutex<HistoryBuffer>,
    gate: tokio::sync::Mutex<()>,
    events: mpsc::UnboundedSender<ServerEvent>,
    next_id: AtomicU64,
    max_connections: usize,
    outbox_capacity: usize,
}

impl Hub {
    pub fn new(
        max_connections: usize,
        history_capacity: usize,
        events: mpsc::UnboundedSender<ServerEvent>,
    ) -> Self {
        let history = HistoryBuffer::new(history_capacity);
        Self {
            outbox_capacity: history.capacity().saturating_add(OUTBOX_SLACK),
            roster: Mutex::new(Roster::new()),
            history: Mutex::new(history),
            gate: tokio::sync::Mutex::new(()),
            events,
            next_id: AtomicU64::new(1),
            max_connections,
        }
    }

    pub fn next_agent_id(&self) -> AgentId {
        AgentId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Forward an event to the presentation layer; a dropped receiver is fine
    pub fn emit(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }

    pub fn roster_count(&self) -> usize {
        self.roster.lock().len()
    }

    pub fn roster_names(&self) -> Vec<String> {
        self.roster.lock().names()
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        self.roster.lock().entries().iter().map(PeerInfo::from).collect()
    }

    pub fn history(&self) -> Vec<ChatLine> {
        self.history.lock().snapshot()
    }

    pub fn contains(&self, id: AgentId) -> bool {
        self.roster.lock().get(id).is_some()
    }

    /// Register an authenticated agent, start its writer and queue the
    /// history replay.
    ///
    /// Capacity is checked here, against the roster as it is at admission.
    pub async fn admit(
        &self,
        id: AgentId,
        name: &str,
        connection: Arc<Connection>,
    ) -> Result<(), AuthRejection> {
        let _gate = self.gate.lock().await;

        let address = connection.peer_addr();
        let count = {
            let mut roster = self.roster.lock();
            if roster.len() >= self.max_connections {
                return Err(AuthRejection::CapacityExceeded);
            }
            let (outbox, queued) = mpsc::channel(self.outbox_capacity);
            tokio::spawn(write_loop(id, Arc::clone(&connection), queued));
            roster.insert(RosterEntry {
                id,
                name: name.to_string(),
                address,
                connection,
                outbox,
                admitted_at: unix_seconds(),
            });
            roster.len()
        };

        info!("Admitted {} ({}) from {}", name, id, address);
        self.emit(ServerEvent::PeerAdmitted {
            name: name.to_string(),
            address,
        });
        self.emit(ServerEvent::RosterCountChanged(count));

        self.replay_history(id).await;
        Ok(())
    }

    /// Queue the history buffer, oldest first, for one agent.
    ///
    /// Returns `false` if the agent is unknown or its queue is full; a full
    /// agent is removed.
    pub async fn send_history_to(&self, id: AgentId) -> bool {
        let _gate = self.gate.lock().await;
        self.replay_history(id).await
    }

    // Caller holds the gate.
    async fn replay_history(&self, id: AgentId) -> bool {
        let lines = self.history.lock().snapshot();
        let queued = {
            let roster = self.roster.lock();
            let Some(entry) = roster.get(id) else {
                return false;
            };
            debug!("Replaying {} history lines to {}", lines.len(), id);
            lines
                .into_iter()
                .all(|line| entry.outbox.try_send(Arc::new(Envelope::Payload(line))).is_ok())
        };

        if !queued {
            warn!("History replay to {} did not fit its queue", id);
            self.drop_peers(&[id]).await;
        }
        queued
    }

    /// Deliver to every admitted agent
    pub async fn broadcast(&self, envelope: &Envelope) -> BroadcastReport {
        let _gate = self.gate.lock().await;
        self.fan_out(None, envelope).await
    }

    /// Deliver to every admitted agent except `sender`
    pub async fn broadcast_excluding(&self, sender: AgentId, envelope: &Envelope) -> BroadcastReport {
        let _gate = self.gate.lock().await;
        self.fan_out(Some(sender), envelope).await
    }

    /// Relay a line from an agent, unless the agent has already been
    /// removed (evicted or pruned) by the time the gate is free
    pub async fn relay(&self, sender: AgentId, envelope: &Envelope) -> Option<BroadcastReport> {
        let _gate = self.gate.lock().await;
        if !self.contains(sender) {
            return None;
        }
        Some(self.fan_out(Some(sender), envelope).await)
    }

    // Caller holds the gate.
    async fn fan_out(&self, exclude: Option<AgentId>, envelope: &Envelope) -> BroadcastReport {
        if let Some(line) = envelope.as_chat_line() {
            self.history.lock().push(line.clone());
        }

        let shared = Arc::new(envelope.clone());
        let (delivered, failed) = {
            let roster = self.roster.lock();
            let mut delivered = 0;
            let mut failed = Vec::new();
            for entry in roster.entries().iter().filter(|e| Some(e.id) != exclude) {
                if entry.connection.is_closed() {
                    failed.push(entry.id);
                    continue;
                }
                match entry.outbox.try_send(Arc::clone(&shared)) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!("Dropping {}: not keeping up with {}", entry.id, envelope.kind());
                        failed.push(entry.id);
                    }
                    Err(TrySendError::Closed(_)) => {
                        warn!("Dropping {}: writer gone", entry.id);
                        failed.push(entry.id);
                    }
                }
            }
            (delivered, failed)
        };

        let pruned = self.drop_peers(&failed).await;
        debug!(
            "{} queued for {} peers ({} pruned)",
            envelope.kind(),
            delivered,
            pruned
        );
        BroadcastReport { delivered, pruned }
    }

    /// Force one peer out: first roster match by name, in admission order.
    ///
    /// Anything already queued is flushed, then ForceClose, then the writer
    /// closes the connection.
    pub async fn evict_by_name(&self, name: &str) -> bool {
        let _gate = self.gate.lock().await;

        let found = self.roster.lock().first_by_name(name).map(|e| e.id);
        let Some(id) = found else {
            return false;
        };

        for entry in self.remove_many(&[id]) {
            if entry.outbox.try_send(Arc::new(Envelope::force_close())).is_err() {
                debug!("ForceClose to {} could not be queued", id);
                entry.connection.close().await;
            }
        }
        info!("Evicted {} ({})", name, id);
        true
    }

    /// Remove one agent; a no-op if it already left
    pub fn remove(&self, id: AgentId) -> bool {
        !self.remove_many(&[id]).is_empty()
    }

    // Removed and closed at once; returns how many were still present.
    async fn drop_peers(&self, ids: &[AgentId]) -> usize {
        let removed = self.remove_many(ids);
        for entry in &removed {
            entry.connection.close().await;
        }
        removed.len()
    }

    // One count event per call, however many entries went.
    fn remove_many(&self, ids: &[AgentId]) -> Vec<RosterEntry> {
        if ids.is_empty() {
            return Vec::new();
        }
        let (removed, count) = {
            let mut roster = self.roster.lock();
            let removed: Vec<RosterEntry> = ids.iter().filter_map(|id| roster.remove(*id)).collect();
            (removed, roster.len())
        };

        for entry in &removed {
            self.emit(ServerEvent::PeerLeft {
                name: entry.name.clone(),
            });
        }
        if !removed.is_empty() {
            self.emit(ServerEvent::RosterCountChanged(count));
        }
        removed
    }

    /// Tell everyone to go away, then drop every connection
    pub async fn close_all(&self) -> usize {
        let _gate = self.gate.lock().await;

        let drained = self.roster.lock().drain();
        for entry in &drained {
            self.emit(ServerEvent::PeerLeft {
                name: entry.name.clone(),
            });
        }
        if !drained.is_empty() {
            self.emit(ServerEvent::RosterCountChanged(0));
        }

        // Dropping each entry closes its queue behind the ForceClose
        let connections: Vec<Arc<Connection>> = drained
            .into_iter()
            .map(|entry| {
                let _ = entry.outbox.try_send(Arc::new(Envelope::force_close()));
                entry.connection
            })
            .collect();

        join_all(connections.iter().map(|connection| async move {
            if tokio::time::timeout(FLUSH_GRACE, connection.closed())
                .await
                .is_err()
            {
                connection.close().await;
            }
        }))
        .await;
        connections.len()
    }

    #[cfg(test)]
    pub fn connection_of(&self, id: AgentId) -> Option<Arc<Connection>> {
        self.roster
            .lock()
            .get(id)
            .map(|e| Arc::clone(&e.connection))
    }
}

/// Drain one peer's queue onto its socket. Closes the connection when the
/// queue is dropped or a write fails.
async fn write_loop(
    id: AgentId,
    connection: Arc<Connection>,
    mut queued: mpsc::Receiver<Arc<Envelope>>,
) {
    loop {
        let envelope = tokio::select! {
            next = queued.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
            _ = connection.closed() => break,
        };
        if let Err(e) = connection.send(&envelope).await {
            debug!("Write to {} failed: {}", id, e);
            break;
        }
    }
    connection.close().await;
}

fn unix_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ============================================================================
// TESTS
// ============================================================================
