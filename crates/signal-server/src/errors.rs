//! Signal server error types.
//!
//! Every error that reaches a client is turned into an error response
//! carrying a numeric `code` and a client-safe message. Internal details
//! (bus addresses, media method names, decode traces) are logged server-side
//! but never exposed.

use crate::bus::BusError;
use crate::protocol::{ProtocolError, TransportRole};
use thiserror::Error;

/// Signal server error type.
///
/// Maps to client error codes:
/// - `Protocol`: `MALFORMED_REQUEST` (1)
/// - `NotJoined`, `AlreadyJoined`: `INVALID_STATE` (2)
/// - `RoleNotHeld`: `FORBIDDEN` (3)
/// - `UnknownTransport`: `NOT_FOUND` (4)
/// - `Bus`, `Config`, `Internal`: `INTERNAL_ERROR` (6)
/// - `NoMediaNode`: `NO_CAPACITY` (7)
/// - `MediaRpc`, `MediaTimeout`: `MEDIA_NODE_FAILURE` (8)
#[derive(Debug, Error)]
pub enum SignalError {
    /// Client message could not be decoded or validated.
    #[error("Malformed request: {0}")]
    Protocol(#[from] ProtocolError),

    /// Request requires a joined participant.
    #[error("Participant has not joined")]
    NotJoined,

    /// Duplicate `join` on an already joined participant.
    #[error("Participant already joined")]
    AlreadyJoined,

    /// Request requires a role the participant did not request at `join`.
    #[error("Participant does not hold the {0} role")]
    RoleNotHeld(TransportRole),

    /// Transport id does not belong to this participant.
    #[error("Unknown transport: {0}")]
    UnknownTransport(String),

    /// The media node pool has no alive node.
    #[error("No media node available")]
    NoMediaNode,

    /// Media node answered with a failure or an undecodable payload.
    #[error("Media RPC {method} failed: {reason}")]
    MediaRpc {
        method: &'static str,
        reason: String,
    },

    /// Media node did not answer within the RPC timeout.
    #[error("Media RPC {method} timed out")]
    MediaTimeout { method: &'static str },

    /// Message bus operation failed.
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (actor channel closed, serialization failure).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SignalError {
    /// Returns the client error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            SignalError::Protocol(_) => 1,                                // MALFORMED_REQUEST
            SignalError::NotJoined | SignalError::AlreadyJoined => 2,     // INVALID_STATE
            SignalError::RoleNotHeld(_) => 3,                             // FORBIDDEN
            SignalError::UnknownTransport(_) => 4,                        // NOT_FOUND
            SignalError::Bus(_) | SignalError::Config(_) | SignalError::Internal(_) => 6, // INTERNAL_ERROR
            SignalError::NoMediaNode => 7,                                // NO_CAPACITY
            SignalError::MediaRpc { .. } | SignalError::MediaTimeout { .. } => 8, // MEDIA_NODE_FAILURE
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SignalError::Protocol(e) => e.to_string(),
            SignalError::NotJoined => "Join the session first".to_string(),
            SignalError::AlreadyJoined => "Already joined".to_string(),
            SignalError::RoleNotHeld(role) => format!("The {role} role was not requested at join"),
            SignalError::UnknownTransport(_) => "Unknown transport".to_string(),
            SignalError::NoMediaNode => "No media node available".to_string(),
            SignalError::MediaRpc { .. } => "Media node request failed".to_string(),
            SignalError::MediaTimeout { .. } => "Media node did not respond".to_string(),
            SignalError::Bus(_) | SignalError::Config(_) | SignalError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }
}
