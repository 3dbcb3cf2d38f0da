//! Shared fixtures for the loopback integration tests

#![allow(dead_code)]

use murmur_core::{
    ChatClient, ChatLine, ChatServer, ClientConfig, ClientEvent, ClientEvents, CredentialStore,
    MemoryStorage, Pbkdf2Verifier, ServerConfig, ServerEvent, ServerEvents, UserRecord,
    UserStore,
};
use std::sync::Arc;
use std::time::Duration;

pub const PASSWORD: &str = "correct horse";
pub const USERS: [&str; 5] = ["alice", "bob", "carol", "dave", "erin"];

const WAIT: Duration = Duration::from_secs(5);

pub async fn start_server(max_connections: usize, history_capacity: usize) -> (ChatServer, ServerEvents) {
    let verifier = Pbkdf2Verifier::with_rounds(10);
    let store = UserStore::new(Arc::new(MemoryStorage::new()));
    for name in USERS {
        store
            .create(UserRecord::new(name, verifier.hash(PASSWORD)))
            .await
            .expect("seed user");
    }

    let config = ServerConfig {
        bind_host: "127.0.0.1".to_string(),
        max_connections,
        history_capacity,
        keep_alive_interval: Duration::from_secs(60),
        probe_target: "127.0.0.1:9".to_string(),
        ..Default::default()
    };
    let server = ChatServer::new(config, Arc::new(store), Arc::new(verifier));
    let events = server.startup(0).await.expect("server startup");
    (server, events)
}

pub fn client_config(server: &ChatServer, name: &str, credential: &str) -> ClientConfig {
    let port = server.local_addr().expect("server running").port();
    ClientConfig {
        probe_target: "127.0.0.1:9".to_string(),
        ..ClientConfig::new("127.0.0.1", port, name, credential)
    }
}

pub async fn connect(server: &ChatServer, name: &str) -> (ChatClient, ClientEvents) {
    ChatClient::connect(client_config(server, name, PASSWORD))
        .await
        .expect("client connect")
}

/// Connect and wait until the server has admitted the peer
pub async fn join(server: &ChatServer, name: &str) -> (ChatClient, ClientEvents) {
    let before = server.roster_count();
    let joined = connect(server, name).await;
    wait_for_roster(server, before + 1).await;
    joined
}

pub async fn wait_for_roster(server: &ChatServer, count: usize) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while server.roster_count() != count {
        assert!(
            tokio::time::Instant::now() < deadline,
            "roster stuck at {} (want {})",
            server.roster_count(),
            count
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn next_client_event(events: &mut ClientEvents) -> ClientEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for client event")
        .expect("client event stream closed")
}

/// Next line received from the server, skipping our own `Sent` echoes
pub async fn next_received(events: &mut ClientEvents) -> ChatLine {
    loop {
        match next_client_event(events).await {
            ClientEvent::Received(line) => return line,
            ClientEvent::Sent(_) => continue,
            other => panic!("expected a received line, got {:?}", other),
        }
    }
}

pub async fn next_server_event(events: &mut ServerEvents) -> ServerEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for server event")
        .expect("server event stream closed")
}

/// Everything queued right now, without waiting
pub fn drain_server_events(events: &mut ServerEvents) -> Vec<ServerEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

pub fn roster_counts(events: &[ServerEvent]) -> Vec<usize> {
    events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::RosterCountChanged(n) => Some(*n),
            _ => None,
        })
        .collect()
}
