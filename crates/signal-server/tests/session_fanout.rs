//! End-to-end tests for session fan-out.
//!
//! Every test boots a `TestServer` on a memory bus with scripted media nodes
//! and drives it through real WebSocket clients.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use serde_json::json;
use signal_server::protocol::{PeerEvent, PeerJoin};
use signal_test_utils::{MockMediaNode, SessionSpy, TestServer};

const QUIET: Duration = Duration::from_millis(200);

async fn server_with_node(node_id: &str) -> (TestServer, MockMediaNode) {
    let server = TestServer::start().await;
    let node = MockMediaNode::builder().id(node_id).start(server.bus()).await;
    node.heartbeat().await;
    server.wait_for_alive_nodes(1).await;
    (server, node)
}

// ============================================================================
// Join announcements
// ============================================================================

#[tokio::test]
async fn test_join_reaches_others_and_not_self() {
    let (server, _node) = server_with_node("n1").await;

    let mut alice = server
        .connect_with_metadata("s1", "alice", &[("name", "Alice")])
        .await;
    let joined = alice.request("join", json!({"pub": true, "sub": true})).await;
    assert!(joined.get("error").is_none(), "join failed: {joined}");

    let mut bob = server
        .connect_with_metadata("s1", "bob", &[("name", "Bob")])
        .await;
    bob.request("join", json!({"sub": true})).await;

    let about_bob = alice.next_notification().await;
    assert_eq!(about_bob.event, "join");
    assert_eq!(about_bob.data["tokenId"], "bob");
    assert_eq!(about_bob.data["metadata"], json!({"name": "Bob"}));

    // Bob learns about Alice through her point-to-point reply
    let about_alice = bob.next_notification().await;
    assert_eq!(about_alice.event, "join");
    assert_eq!(about_alice.data["tokenId"], "alice");
    assert_eq!(about_alice.data["metadata"], json!({"name": "Alice"}));

    alice.assert_no_notification(QUIET).await;
    bob.assert_no_notification(QUIET).await;
}

#[tokio::test]
async fn test_other_sessions_are_isolated() {
    let (server, _node) = server_with_node("n1").await;

    let mut alice = server.connect("s1", "alice").await;
    alice.request("join", json!({"pub": true})).await;

    let mut carol = server.connect("s2", "carol").await;
    carol.request("join", json!({"sub": true})).await;

    alice.assert_no_notification(QUIET).await;
    carol.assert_no_notification(QUIET).await;
}

// ============================================================================
// Publish / unpublish
// ============================================================================

#[tokio::test]
async fn test_publish_then_unpublish_broadcasts_in_order() {
    let (server, node) = server_with_node("n1").await;
    let mut spy = SessionSpy::broadcast(server.bus(), "s1").await;

    let mut alice = server.connect("s1", "alice").await;
    let joined = alice.request("join", json!({"pub": true})).await;
    let transport_id = joined["params"]["pub"]["id"].as_str().unwrap().to_string();

    let published = alice
        .request(
            "publish",
            json!({"transportId": transport_id, "codec": {"mimeType": "audio/opus"}, "metadata": {"kind": "audio"}}),
        )
        .await;
    let sender_id = published["params"]["senderId"].as_str().unwrap().to_string();

    let unpublished = alice
        .request(
            "unpublish",
            json!({"transportId": transport_id, "senderId": sender_id}),
        )
        .await;
    assert_eq!(unpublished["params"], json!({}));

    let join = spy.next().await;
    assert_eq!(join.token_id, "alice");
    assert!(matches!(join.event, PeerEvent::Join(PeerJoin { publish: true, subscribe: false, .. })));

    let publish = spy.next().await;
    match publish.event {
        PeerEvent::Publish(publish) => {
            assert_eq!(publish.node.id, "n1");
            assert_eq!(publish.node.host, "127.0.0.1");
            assert_eq!(publish.node.name, "mock-n1");
            assert_eq!(publish.transport_id, transport_id);
            assert_eq!(publish.sender_id, sender_id);
            assert_eq!(publish.metadata, json!({"kind": "audio"}));
        }
        other => assert_eq!(other.method(), "publish"),
    }

    let unpublish = spy.next().await;
    assert_eq!(
        unpublish.event,
        PeerEvent::Unpublish {
            sender_id: sender_id.clone()
        }
    );
    spy.assert_silent(QUIET).await;

    assert_eq!(node.calls_for("publish").len(), 1);
    assert_eq!(
        node.calls_for("unpublish")[0].params,
        json!({"transportId": transport_id, "senderId": sender_id})
    );
}

#[tokio::test]
async fn test_late_subscriber_learns_existing_senders() {
    let (server, node) = server_with_node("n1").await;

    let mut alice = server.connect("s1", "alice").await;
    let joined = alice.request("join", json!({"pub": true})).await;
    let pub_transport = joined["params"]["pub"]["id"].as_str().unwrap().to_string();
    let published = alice
        .request(
            "publish",
            json!({"transportId": pub_transport, "codec": {}, "metadata": {"kind": "video"}}),
        )
        .await;
    let sender_id = published["params"]["senderId"].as_str().unwrap().to_string();

    let mut bob = server.connect("s1", "bob").await;
    let bob_joined = bob.request("join", json!({"sub": true})).await;
    let sub_transport = bob_joined["params"]["sub"]["id"].as_str().unwrap().to_string();

    let join = bob.next_notification().await;
    assert_eq!(join.event, "join");
    assert_eq!(join.data["tokenId"], "alice");

    let publish = bob.next_notification().await;
    assert_eq!(publish.event, "publish");
    assert_eq!(
        publish.data,
        json!({
            "node": {"id": "n1", "area": "test", "host": "127.0.0.1", "name": "mock-n1"},
            "transportId": pub_transport,
            "senderId": sender_id,
            "metadata": {"kind": "video"},
            "tokenId": "alice",
        })
    );

    let subscribed = bob
        .request(
            "subscribe",
            json!({"senderId": sender_id, "transportId": pub_transport, "node": "n1"}),
        )
        .await;
    assert!(subscribed["params"]["receiverId"].is_string());
    assert_eq!(subscribed["params"]["senderId"], sender_id.as_str());

    assert_eq!(
        node.calls_for("subscribe")[0].params,
        json!({
            "transportId": sub_transport,
            "senderId": sender_id,
            "remoteTransportId": pub_transport,
            "remoteNode": "n1",
        })
    );
}

// ============================================================================
// Pause / resume
// ============================================================================

#[tokio::test]
async fn test_pause_broadcast_only_for_publisher_side() {
    let (server, _node) = server_with_node("n1").await;

    let mut alice = server.connect("s1", "alice").await;
    let joined = alice
        .request("join", json!({"pub": true, "sub": true}))
        .await;
    let pub_transport = joined["params"]["pub"]["id"].as_str().unwrap().to_string();
    let sub_transport = joined["params"]["sub"]["id"].as_str().unwrap().to_string();

    let mut bob = server.connect("s1", "bob").await;
    bob.request("join", json!({"sub": true})).await;
    assert_eq!(alice.next_notification().await.event, "join");
    assert_eq!(bob.next_notification().await.event, "join");

    alice
        .request(
            "pause",
            json!({"transportId": sub_transport, "senderId": "remote-1", "role": "sub"}),
        )
        .await;
    bob.assert_no_notification(QUIET).await;

    alice
        .request(
            "pause",
            json!({"transportId": pub_transport, "senderId": "snd-1", "role": "pub"}),
        )
        .await;
    let paused = bob.next_notification().await;
    assert_eq!(paused.event, "pause");
    assert_eq!(paused.data, json!({"senderId": "snd-1", "tokenId": "alice"}));

    alice
        .request(
            "resume",
            json!({"transportId": pub_transport, "senderId": "snd-1", "role": "pub"}),
        )
        .await;
    let resumed = bob.next_notification().await;
    assert_eq!(resumed.event, "resume");
    assert_eq!(resumed.data["senderId"], "snd-1");
}

// ============================================================================
// Leave
// ============================================================================

#[tokio::test]
async fn test_disconnect_notifies_remaining_participants() {
    let (server, _node) = server_with_node("n1").await;

    let mut alice = server.connect("s1", "alice").await;
    alice.request("join", json!({"sub": true})).await;
    let mut bob = server.connect("s1", "bob").await;
    bob.request("join", json!({"sub": true})).await;
    assert_eq!(alice.next_notification().await.event, "join");
    assert_eq!(bob.next_notification().await.event, "join");

    bob.close().await;

    let left = alice.next_notification().await;
    assert_eq!(left.event, "leave");
    assert_eq!(left.data, json!({"tokenId": "bob"}));
}
