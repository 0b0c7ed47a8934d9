//! Wire formats.
//!
//! - [`client`]: JSON envelopes exchanged with browsers over WebSocket.
//! - [`peer`]: session fan-out messages exchanged between participants on the bus.
//! - [`media`]: JSON-RPC requests and responses exchanged with media nodes.
//! - [`connect`]: identity carried in the upgrade request query.

pub mod client;
pub mod connect;
pub mod media;
pub mod peer;

pub use client::{ClientEvent, ClientRequest, Notification, ProtocolError, Response};
pub use connect::{ConnectParams, ConnectParamsError};
pub use peer::{PeerEnvelope, PeerEvent, PeerJoin, PeerPublish};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a media transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportRole {
    Pub,
    Sub,
}

impl TransportRole {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportRole::Pub => "pub",
            TransportRole::Sub => "sub",
        }
    }
}

impl fmt::Display for TransportRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
