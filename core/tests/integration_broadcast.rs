//! Broadcast integration tests over loopback TCP
//!
//! Run with: cargo test --test integration_broadcast

mod common;

use common::*;
use murmur_core::{ClientEvent, Connection, Envelope, Presence, ServerEvent};
use std::time::Duration;

#[tokio::test]
async fn test_hi_reaches_other_peer_once() {
    let (server, mut server_events) = start_server(2, 3).await;
    let (alice, mut alice_events) = join(&server, "alice").await;
    let (_bob, mut bob_events) = join(&server, "bob").await;

    alice.send_message("hi", Some(Presence::Working)).await.unwrap();

    let line = next_received(&mut bob_events).await;
    assert_eq!(line.sender, "alice");
    assert_eq!(line.body, "hi");
    assert_eq!(line.presence, Some(Presence::Working));

    // The sender only sees its own Sent event
    assert!(matches!(
        next_client_event(&mut alice_events).await,
        ClientEvent::Sent(_)
    ));

    loop {
        if let ServerEvent::MessageReceived(received) = next_server_event(&mut server_events).await {
            assert_eq!(received.body, "hi");
            break;
        }
    }
    let history: Vec<_> = server.history().into_iter().map(|l| l.body).collect();
    assert_eq!(history, vec!["hi"]);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(alice_events.try_recv().is_err());
    assert!(bob_events.try_recv().is_err());

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_each_recipient_sees_sender_order() {
    let (server, _events) = start_server(5, 50).await;
    let (alice, _alice_events) = join(&server, "alice").await;
    let (_bob, mut bob_events) = join(&server, "bob").await;
    let (_carol, mut carol_events) = join(&server, "carol").await;

    for i in 0..20 {
        alice.send_message(&format!("m{}", i), None).await.unwrap();
    }

    for events in [&mut bob_events, &mut carol_events] {
        for i in 0..20 {
            assert_eq!(next_received(events).await.body, format!("m{}", i));
        }
    }

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_history_replayed_before_later_lines() {
    let (server, _events) = start_server(5, 3).await;
    let (alice, _alice_events) = join(&server, "alice").await;

    for body in ["m1", "m2", "m3", "m4", "m5"] {
        alice.send_message(body, None).await.unwrap();
    }
    while server.history().last().map(|l| l.body.as_str()) != Some("m5") {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let (_bob, mut bob_events) = join(&server, "bob").await;
    alice.send_message("live", None).await.unwrap();

    let bodies = [
        next_received(&mut bob_events).await.body,
        next_received(&mut bob_events).await.body,
        next_received(&mut bob_events).await.body,
        next_received(&mut bob_events).await.body,
    ];
    assert_eq!(bodies, ["m3", "m4", "m5", "live"]);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_killed_socket_pruned_with_single_count_event() {
    let (server, mut server_events) = start_server(3, 10).await;
    let port = server.local_addr().unwrap().port();

    // Raw peer so the test controls exactly when the socket dies
    let doomed = Connection::connect(&format!("127.0.0.1:{}", port), Duration::from_secs(1))
        .await
        .unwrap();
    doomed.send(&Envelope::auth("alice", PASSWORD)).await.unwrap();
    wait_for_roster(&server, 1).await;

    let (bob, _bob_events) = join(&server, "bob").await;
    let (_carol, mut carol_events) = join(&server, "carol").await;
    drain_server_events(&mut server_events);

    drop(doomed);
    wait_for_roster(&server, 2).await;
    bob.send_message("still here", None).await.unwrap();
    assert_eq!(next_received(&mut carol_events).await.body, "still here");

    let events = drain_server_events(&mut server_events);
    assert_eq!(roster_counts(&events), vec![2]);
    assert!(events
        .iter()
        .any(|e| matches!(e, ServerEvent::PeerLeft { name } if name == "alice")));
    assert_eq!(server.roster_names(), vec!["bob", "carol"]);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_operator_line_reaches_everyone() {
    let (server, _events) = start_server(5, 10).await;
    let (_alice, mut alice_events) = join(&server, "alice").await;
    let (_bob, mut bob_events) = join(&server, "bob").await;

    let report = server
        .send_message("maintenance at noon", Some(Presence::Eating))
        .await
        .unwrap();
    assert_eq!(report.delivered, 2);

    for events in [&mut alice_events, &mut bob_events] {
        let line = next_received(events).await;
        assert_eq!(line.sender, "Server");
        assert_eq!(line.body, "maintenance at noon");
    }

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_keep_alive_is_not_surfaced() {
    let (server, _events) = start_server(5, 10).await;
    let (_alice, mut alice_events) = join(&server, "alice").await;

    let report = server.broadcast(&Envelope::keep_alive()).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert!(server.history().is_empty());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(alice_events.try_recv().is_err());

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stalled_reader_does_not_hold_up_others() {
    let (server, _events) = start_server(5, 10).await;
    let port = server.local_addr().unwrap().port();

    // Authenticates, then never reads another byte
    let stalled = Connection::connect(&format!("127.0.0.1:{}", port), Duration::from_secs(1))
        .await
        .unwrap();
    stalled.send(&Envelope::auth("carol", PASSWORD)).await.unwrap();
    wait_for_roster(&server, 1).await;

    let (alice, _alice_events) = join(&server, "alice").await;
    let (_bob, mut bob_events) = join(&server, "bob").await;

    let body = "x".repeat(60 * 1024);
    for i in 0..60 {
        alice.send_message(&body, None).await.unwrap();
        let line = tokio::time::timeout(Duration::from_secs(2), next_received(&mut bob_events))
            .await
            .unwrap_or_else(|_| panic!("line {} held up behind the stalled reader", i));
        assert_eq!(line.sender, "alice");
        assert_eq!(line.body.len(), body.len());
    }

    server.shutdown().await.unwrap();
}
