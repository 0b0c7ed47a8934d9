//! End-to-end tests for the participant lifecycle and error contract.
//!
//! Covers:
//! - upgrade rejection for bad connect params
//! - media node assignment (empty pool, preference, stickiness)
//! - error codes for protocol, state, role and media failures
//! - disconnect cleanup (subscriptions, leave, transport close, unregister)

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;
use std::time::Duration;

use serde_json::{json, Value};
use signal_server::actors::ConnectionSettings;
use signal_server::protocol::PeerEvent;
use signal_server::server::ServiceSettings;
use signal_test_utils::{MockMediaNode, SessionSpy, TestServer};
use tokio_tungstenite::tungstenite;

fn error_code(response: &Value) -> i64 {
    response["error"]["code"].as_i64().unwrap_or_default()
}

// ============================================================================
// Gateway
// ============================================================================

#[tokio::test]
async fn test_bad_connect_params_rejected_before_upgrade() {
    let server = TestServer::start().await;

    for query in ["", "?params=", "?params=not-base64!!", "?params=e30"] {
        let url = format!("ws://{}/{query}", server.addr());
        let err = tokio_tungstenite::connect_async(url.as_str())
            .await
            .err()
            .expect("upgrade should be refused");
        assert!(
            matches!(&err, tungstenite::Error::Http(response) if response.status() == 400),
            "unexpected error for '{query}': {err}"
        );
    }

    assert_eq!(server.registry().get_status().await.unwrap().participant_count, 0);
}

#[tokio::test]
async fn test_upgrade_registers_participant() {
    let server = TestServer::start().await;

    let _alice = server.connect("s1", "alice").await;
    server.wait_for_participants(1).await;

    let _bob = signal_test_utils::TestClient::connect(&format!(
        "ws://{}/ws?params={}",
        server.addr(),
        signal_test_utils::encode_connect_params("s1", "bob", &[])
    ))
    .await;
    server.wait_for_participants(2).await;
}

// ============================================================================
// Media node assignment
// ============================================================================

#[tokio::test]
async fn test_join_with_empty_pool() {
    let server = TestServer::start().await;
    let mut alice = server.connect("s1", "alice").await;

    let response = alice.request("join", json!({"pub": true})).await;
    assert_eq!(error_code(&response), 7);
    assert_eq!(response["error"]["message"], "No media node available");

    // Nothing was joined, so any follow-up still needs a join
    let response = alice
        .request("dtls", json!({"transportId": "t", "dtlsParameters": {}}))
        .await;
    assert_eq!(error_code(&response), 2);
}

#[tokio::test]
async fn test_assignment_is_sticky() {
    let server = TestServer::start().await;
    let n1 = MockMediaNode::builder().id("n1").start(server.bus()).await;
    n1.heartbeat().await;
    server.wait_for_alive_nodes(1).await;

    let mut alice = server.connect("s1", "alice").await;
    let joined = alice.request("join", json!({"pub": true})).await;
    let transport_id = joined["params"]["pub"]["id"].as_str().unwrap().to_string();

    // A second node appears after the assignment
    let n2 = MockMediaNode::builder().id("n2").start(server.bus()).await;
    n2.heartbeat().await;
    server.wait_for_alive_nodes(2).await;

    for _ in 0..5 {
        let response = alice
            .request(
                "publish",
                json!({"transportId": transport_id, "codec": {}, "metadata": {}}),
            )
            .await;
        assert!(response.get("error").is_none(), "publish failed: {response}");
    }

    assert_eq!(n1.calls_for("publish").len(), 5);
    assert!(n2.calls().is_empty());
}

#[tokio::test]
async fn test_join_honors_alive_preferred_node() {
    let server = TestServer::start().await;
    let n1 = MockMediaNode::builder().id("n1").start(server.bus()).await;
    let n2 = MockMediaNode::builder().id("n2").start(server.bus()).await;
    n1.heartbeat().await;
    n2.heartbeat().await;
    server.wait_for_alive_nodes(2).await;

    let mut alice = server.connect("s1", "alice").await;
    let joined = alice
        .request("join", json!({"sub": true, "nodeId": "n2"}))
        .await;
    assert_eq!(joined["params"]["sub"]["node"], "n2");
    assert_eq!(n2.calls_for("codecs").len(), 1);
    assert!(n1.calls().is_empty());
}

// ============================================================================
// Error contract
// ============================================================================

#[tokio::test]
async fn test_protocol_and_state_errors() {
    let server = TestServer::start().await;
    let node = MockMediaNode::builder().id("n1").start(server.bus()).await;
    node.heartbeat().await;
    server.wait_for_alive_nodes(1).await;

    let mut alice = server.connect("s1", "alice").await;

    alice.send_raw("{not json").await;
    let response = alice.response_for(None).await;
    assert_eq!(error_code(&response), 1);
    assert_eq!(response["id"], Value::Null);

    let response = alice.request("teleport", json!({})).await;
    assert_eq!(error_code(&response), 1);

    let response = alice.request("publish", json!({"codec": {}})).await;
    assert_eq!(error_code(&response), 1);

    let response = alice
        .request(
            "unpublish",
            json!({"transportId": "t", "senderId": "s"}),
        )
        .await;
    assert_eq!(error_code(&response), 2);

    let joined = alice.request("join", json!({"sub": true})).await;
    assert!(joined.get("error").is_none());
    let sub_transport = joined["params"]["sub"]["id"].as_str().unwrap().to_string();

    let response = alice.request("join", json!({"pub": true})).await;
    assert_eq!(error_code(&response), 2);

    let response = alice
        .request(
            "publish",
            json!({"transportId": sub_transport, "codec": {}, "metadata": {}}),
        )
        .await;
    assert_eq!(error_code(&response), 3);

    let response = alice
        .request(
            "dtls",
            json!({"transportId": "someone-else", "dtlsParameters": {}}),
        )
        .await;
    assert_eq!(error_code(&response), 4);

    let response = alice
        .request(
            "dtls",
            json!({"transportId": sub_transport, "dtlsParameters": {"role": "client"}}),
        )
        .await;
    assert_eq!(response["params"], json!({}));
    assert_eq!(
        node.calls_for("dtls")[0].params,
        json!({"transportId": sub_transport, "dtlsParameters": {"role": "client"}})
    );
}

#[tokio::test]
async fn test_media_failure_is_reported() {
    let server = TestServer::start().await;
    let node = MockMediaNode::builder()
        .id("n1")
        .fail_method("transport")
        .start(server.bus())
        .await;
    node.heartbeat().await;
    server.wait_for_alive_nodes(1).await;

    let mut alice = server.connect("s1", "alice").await;
    let response = alice.request("join", json!({"pub": true})).await;
    assert_eq!(error_code(&response), 8);
    assert_eq!(response["error"]["message"], "Media node request failed");
    assert!(response.get("params").is_none());

    // Still unjoined
    let response = alice
        .request("dtls", json!({"transportId": "t", "dtlsParameters": {}}))
        .await;
    assert_eq!(error_code(&response), 2);
}

#[tokio::test]
async fn test_silent_media_node_times_out() {
    let server = TestServer::start_with(ServiceSettings {
        media_rpc_timeout: Duration::from_millis(200),
        node_sweep_interval: Duration::from_secs(3600),
        connection: ConnectionSettings::default(),
    })
    .await;
    let node = MockMediaNode::builder()
        .id("n1")
        .silence_method("codecs")
        .start(server.bus())
        .await;
    node.heartbeat().await;
    server.wait_for_alive_nodes(1).await;

    let mut alice = server.connect("s1", "alice").await;
    let response = alice.request("join", json!({"pub": true})).await;
    assert_eq!(error_code(&response), 8);
    assert_eq!(response["error"]["message"], "Media node did not respond");
    assert!(node.calls_for("transport").is_empty());
}

// ============================================================================
// Disconnect cleanup
// ============================================================================

#[tokio::test]
async fn test_disconnect_cleans_up_joined_participant() {
    let server = TestServer::start().await;
    let node = MockMediaNode::builder().id("n1").start(server.bus()).await;
    node.heartbeat().await;
    server.wait_for_alive_nodes(1).await;
    let mut spy = SessionSpy::broadcast(server.bus(), "s1").await;

    let mut alice = server.connect("s1", "alice").await;
    let joined = alice
        .request("join", json!({"pub": true, "sub": true}))
        .await;
    let held: HashSet<String> = ["pub", "sub"]
        .iter()
        .map(|role| joined["params"][role]["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(server.bus().subscriber_count("signal.s1.alice"), 1);

    alice.close().await;
    server.wait_for_participants(0).await;

    assert_eq!(spy.next().await.event.method(), "join");
    let leave = spy.next().await;
    assert_eq!(leave.token_id, "alice");
    assert_eq!(leave.event, PeerEvent::Leave);
    spy.assert_silent(Duration::from_millis(200)).await;

    let closes = node.calls_for("close");
    assert_eq!(closes.len(), 2);
    let closed: HashSet<String> = closes
        .iter()
        .map(|call| call.params["transportId"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(closed, held);
    let roles: HashSet<&str> = closes
        .iter()
        .map(|call| call.params["role"].as_str().unwrap())
        .collect();
    assert_eq!(roles, HashSet::from(["pub", "sub"]));

    assert_eq!(server.bus().subscriber_count("signal.s1.alice"), 0);
    // Only the spy is left on the broadcast subject
    assert_eq!(server.bus().subscriber_count("signal.s1.@"), 1);
}

#[tokio::test]
async fn test_disconnect_before_join_has_no_side_effects() {
    let server = TestServer::start().await;
    let node = MockMediaNode::builder().id("n1").start(server.bus()).await;
    node.heartbeat().await;
    server.wait_for_alive_nodes(1).await;
    let mut spy = SessionSpy::broadcast(server.bus(), "s1").await;

    let alice = server.connect("s1", "alice").await;
    server.wait_for_participants(1).await;
    alice.close().await;
    server.wait_for_participants(0).await;

    spy.assert_silent(Duration::from_millis(200)).await;
    assert!(node.calls().is_empty());
}

#[tokio::test]
async fn test_registry_shutdown_closes_connections() {
    let server = TestServer::start().await;
    let node = MockMediaNode::builder().id("n1").start(server.bus()).await;
    node.heartbeat().await;
    server.wait_for_alive_nodes(1).await;

    let mut alice = server.connect("s1", "alice").await;
    alice.request("join", json!({"sub": true})).await;

    server.registry().cancel();

    // The participant still releases its media resources
    let closes = node.wait_for_calls("close", 1).await;
    assert_eq!(closes[0].params["role"], "sub");
    assert_eq!(server.bus().subscriber_count("signal.s1.alice"), 0);
}
