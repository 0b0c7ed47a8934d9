//! Message types for actor communication.
//!
//! The group registry is reachable only through [`RegistryMessage`]s; replies
//! come back over `tokio::sync::oneshot`. A participant consumes
//! [`ParticipantEvent`]s from its single inbound queue, fed by the
//! connection read loop and by its bus subscription forwarders.

use crate::media::MediaNode;
use bytes::Bytes;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Messages sent to the `GroupRegistry`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Add a participant to the live set.
    Register {
        entry: ParticipantEntry,
        respond_to: oneshot::Sender<()>,
    },

    /// Remove a participant. Unknown ids are ignored.
    Unregister { participant_id: String },

    /// A media node announced itself.
    Heartbeat { node: MediaNode },

    /// Select a media node for a joining participant.
    PickNode {
        preferred: Option<String>,
        respond_to: oneshot::Sender<Option<MediaNode>>,
    },

    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },
}

/// A registered participant as seen by the registry.
#[derive(Debug, Clone)]
pub struct ParticipantEntry {
    pub participant_id: String,
    pub session_id: String,
    pub token_id: String,
    /// Cancelling this token tears the participant's connection down.
    pub cancel_token: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStatus {
    pub participant_count: usize,
    pub node_count: usize,
    pub alive_node_count: usize,
}

/// Which subscription a fan-out message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerScope {
    /// The participant's own point-to-point subject.
    Direct,
    /// The session broadcast subject.
    Session,
}

/// Events consumed by a participant's process loop.
#[derive(Debug)]
pub enum ParticipantEvent {
    /// A text frame from the client.
    Client(String),

    /// A fan-out message from another participant.
    Peer { scope: PeerScope, payload: Bytes },

    /// The connection reached a terminal I/O condition.
    Disconnected { reason: &'static str },
}
