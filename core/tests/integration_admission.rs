//! Admission integration tests: handshake, capacity and shutdown
//!
//! Run with: cargo test --test integration_admission

mod common;

use common::*;
use murmur_core::{AuthRejection, ChatClient, ClientEvent, ServerEvent};
use std::time::Duration;

#[tokio::test]
async fn test_cap_two_history_three() {
    let (server, mut server_events) = start_server(2, 3).await;

    let (_a, _a_events) = join(&server, "alice").await;
    let events = drain_server_events(&mut server_events);
    assert_eq!(roster_counts(&events), vec![1]);

    let (_b, _b_events) = join(&server, "bob").await;
    assert_eq!(server.roster_count(), 2);

    let (c, mut c_events) = connect(&server, "carol").await;
    assert_eq!(next_client_event(&mut c_events).await, ClientEvent::ForceClosed);
    assert!(!c.is_active());

    loop {
        if let ServerEvent::PeerRejected { name, reason, .. } =
            next_server_event(&mut server_events).await
        {
            assert_eq!(name, "carol");
            assert_eq!(reason, AuthRejection::CapacityExceeded);
            break;
        }
    }
    assert_eq!(server.roster_names(), vec!["alice", "bob"]);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_n_minus_c_peers_turned_away() {
    let capacity = 2;
    let expected_rejections = USERS.len() - capacity;
    let (server, mut server_events) = start_server(capacity, 3).await;

    let mut sessions = Vec::new();
    for name in USERS {
        sessions.push(connect(&server, name).await);
    }

    let mut rejected = 0;
    while rejected < expected_rejections {
        if let ServerEvent::PeerRejected { reason, .. } = next_server_event(&mut server_events).await
        {
            assert_eq!(reason, AuthRejection::CapacityExceeded);
            rejected += 1;
        }
    }
    wait_for_roster(&server, capacity).await;

    // Every rejected client hears ForceClose; nobody else does
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let inactive = sessions.iter().filter(|(c, _)| !c.is_active()).count();
        if inactive == expected_rejections {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "{} inactive", inactive);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    for (client, events) in sessions.iter_mut() {
        if !client.is_active() {
            assert_eq!(next_client_event(events).await, ClientEvent::ForceClosed);
        }
    }
    assert_eq!(server.roster_count(), capacity);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_bad_credential_rejected() {
    let (server, mut server_events) = start_server(5, 3).await;

    let (client, mut events) = ChatClient::connect(client_config(&server, "alice", "wrong"))
        .await
        .unwrap();
    assert_eq!(next_client_event(&mut events).await, ClientEvent::ForceClosed);
    assert!(!client.is_active());

    match next_server_event(&mut server_events).await {
        ServerEvent::PeerRejected { reason, .. } => {
            assert_eq!(reason, AuthRejection::BadCredential)
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(server.roster_count(), 0);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_user_rejected() {
    let (server, mut server_events) = start_server(5, 3).await;

    let (_client, mut events) = ChatClient::connect(client_config(&server, "mallory", PASSWORD))
        .await
        .unwrap();
    assert_eq!(next_client_event(&mut events).await, ClientEvent::ForceClosed);

    match next_server_event(&mut server_events).await {
        ServerEvent::PeerRejected { name, reason, .. } => {
            assert_eq!(name, "mallory");
            assert_eq!(reason, AuthRejection::UnknownUser);
        }
        other => panic!("unexpected event {:?}", other),
    }

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_leaves_roster() {
    let (server, mut server_events) = start_server(5, 3).await;
    let (alice, _alice_events) = join(&server, "alice").await;
    drain_server_events(&mut server_events);

    alice.disconnect().await.unwrap();
    wait_for_roster(&server, 0).await;

    let events = drain_server_events(&mut server_events);
    assert_eq!(roster_counts(&events), vec![0]);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_force_closes_every_peer() {
    let (server, mut server_events) = start_server(5, 3).await;
    let (_alice, mut alice_events) = join(&server, "alice").await;
    let (_bob, mut bob_events) = join(&server, "bob").await;
    drain_server_events(&mut server_events);

    server.shutdown().await.unwrap();

    let events = drain_server_events(&mut server_events);
    let left: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::PeerLeft { name } => Some(name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(left, vec!["alice", "bob"]);
    assert_eq!(roster_counts(&events), vec![0]);

    assert_eq!(next_client_event(&mut alice_events).await, ClientEvent::ForceClosed);
    assert_eq!(next_client_event(&mut bob_events).await, ClientEvent::ForceClosed);
    assert!(!server.is_active());
    assert_eq!(server.roster_count(), 0);
}

#[tokio::test]
async fn test_duplicate_names_both_admitted() {
    let (server, _events) = start_server(5, 3).await;
    let (_first, _e1) = join(&server, "alice").await;
    let (_second, _e2) = join(&server, "alice").await;

    assert_eq!(server.roster_names(), vec!["alice", "alice"]);

    server.shutdown().await.unwrap();
}
