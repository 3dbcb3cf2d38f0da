// Roster — authenticated peers in admission order

use crate::envelope::Envelope;
use crate::transport::Connection;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Server-assigned agent identifier, unique for the life of a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId(pub u64);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent-{}", self.0)
    }
}

/// An admitted peer
#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub id: AgentId,
    pub name: String,
    pub address: SocketAddr,
    pub connection: Arc<Connection>,
    /// Queue drained by this peer's writer task
    pub outbox: mpsc::Sender<Arc<Envelope>>,
    /// Unix timestamp (seconds)
    pub admitted_at: u64,
}

/// Public view of a roster entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: AgentId,
    pub name: String,
    pub address: SocketAddr,
    pub admitted_at: u64,
}

impl From<&RosterEntry> for PeerInfo {
    fn from(entry: &RosterEntry) -> Self {
        Self {
            id: entry.id,
            name: entry.name.clone(),
            address: entry.address,
            admitted_at: entry.admitted_at,
        }
    }
}

#[derive(Debug, Default)]
pub struct Roster {
    entries: Vec<RosterEntry>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, entry: RosterEntry) {
        self.entries.push(entry);
    }

    pub fn get(&self, id: AgentId) -> Option<&RosterEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn remove(&mut self, id: AgentId) -> Option<RosterEntry> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(index))
    }

    /// Earliest admitted entry with this name
    pub fn first_by_name(&self, name: &str) -> Option<&RosterEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn drain(&mut self) -> Vec<RosterEntry> {
        std::mem::take(&mut self.entries)
    }
}
