//! Bus subject naming.

/// Subject every media node publishes its heartbeat descriptor on.
pub const HEARTBEAT_TOPIC: &str = "media@heartbeat";

/// Subject a media node answers RPCs on.
pub fn media_node_topic(node_id: &str) -> String {
    format!("media.{node_id}")
}

/// Broadcast subject of a session; every participant of the session listens.
pub fn session_broadcast_topic(session_id: &str) -> String {
    format!("signal.{session_id}.@")
}

/// Point-to-point subject of one participant within a session.
pub fn participant_topic(session_id: &str, token_id: &str) -> String {
    format!("signal.{session_id}.{token_id}")
}
