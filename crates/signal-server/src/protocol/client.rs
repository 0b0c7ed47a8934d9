//! Client WebSocket protocol.
//!
//! Requests: `{"id": 1, "method": "request", "params": {"event": "join", "data": {...}}}`
//!
//! Responses echo the request id and carry either `params` or `error`.
//! Notifications carry no id:
//! `{"method": "notification", "params": {"event": "leave", "data": {...}}}`

use super::TransportRole;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A decoded client request.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientRequest {
    pub id: i64,
    pub event: ClientEvent,
}

/// Client request events with their typed payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Join(JoinRequest),
    Dtls(DtlsRequest),
    Publish(PublishRequest),
    Unpublish(SenderRequest),
    Subscribe(SubscribeRequest),
    Unsubscribe(SenderRequest),
    Pause(PauseRequest),
    Resume(PauseRequest),
}

impl ClientEvent {
    /// Event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join(_) => "join",
            ClientEvent::Dtls(_) => "dtls",
            ClientEvent::Publish(_) => "publish",
            ClientEvent::Unpublish(_) => "unpublish",
            ClientEvent::Subscribe(_) => "subscribe",
            ClientEvent::Unsubscribe(_) => "unsubscribe",
            ClientEvent::Pause(_) => "pause",
            ClientEvent::Resume(_) => "resume",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    #[serde(rename = "pub", default)]
    pub publish: bool,
    #[serde(rename = "sub", default)]
    pub subscribe: bool,
    /// Preferred media node; ignored unless alive.
    #[serde(default)]
    pub node_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtlsRequest {
    pub transport_id: String,
    pub dtls_parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    pub transport_id: String,
    pub codec: Value,
    #[serde(default)]
    pub metadata: Value,
}

/// Payload of `unpublish` and `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderRequest {
    pub transport_id: String,
    pub sender_id: String,
}

/// `transport_id` and `node` identify the remote publisher, as delivered in
/// its `publish` notification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub sender_id: String,
    pub transport_id: String,
    pub node: String,
}

/// Payload of `pause` and `resume`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseRequest {
    pub transport_id: String,
    pub sender_id: String,
    pub role: TransportRole,
}

/// Client message decode failures.
///
/// Every variant that could read the request id carries it so the error
/// response can echo it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Message is not valid JSON: {reason}")]
    MalformedJson { reason: String },

    #[error("Invalid request envelope: {reason}")]
    InvalidEnvelope { id: Option<i64>, reason: String },

    #[error("Unsupported method: {method}")]
    UnsupportedMethod { id: i64, method: String },

    #[error("Unknown event: {event}")]
    UnknownEvent { id: i64, event: String },

    #[error("Invalid {event} payload: {reason}")]
    InvalidPayload {
        id: i64,
        event: &'static str,
        reason: String,
    },
}

impl ProtocolError {
    /// Request id to echo in the error response, if it could be read.
    pub fn request_id(&self) -> Option<i64> {
        match self {
            ProtocolError::MalformedJson { .. } => None,
            ProtocolError::InvalidEnvelope { id, .. } => *id,
            ProtocolError::UnsupportedMethod { id, .. }
            | ProtocolError::UnknownEvent { id, .. }
            | ProtocolError::InvalidPayload { id, .. } => Some(*id),
        }
    }
}

impl ClientRequest {
    /// Decode one client text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::MalformedJson {
                reason: e.to_string(),
            })?;

        let Value::Object(mut envelope) = value else {
            return Err(ProtocolError::InvalidEnvelope {
                id: None,
                reason: "expected a JSON object".to_string(),
            });
        };

        let id = envelope
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| ProtocolError::InvalidEnvelope {
                id: None,
                reason: "missing integer id".to_string(),
            })?;

        match envelope.get("method").and_then(Value::as_str) {
            Some("request") => {}
            Some(other) => {
                return Err(ProtocolError::UnsupportedMethod {
                    id,
                    method: other.to_string(),
                })
            }
            None => {
                return Err(ProtocolError::InvalidEnvelope {
                    id: Some(id),
                    reason: "missing method".to_string(),
                })
            }
        }

        let Some(Value::Object(mut params)) = envelope.remove("params") else {
            return Err(ProtocolError::InvalidEnvelope {
                id: Some(id),
                reason: "missing params object".to_string(),
            });
        };

        let event = match params.remove("event") {
            Some(Value::String(event)) => event,
            _ => {
                return Err(ProtocolError::InvalidEnvelope {
                    id: Some(id),
                    reason: "missing event".to_string(),
                })
            }
        };

        let data = match params.remove("data") {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(data) => data,
        };

        let event = match event.as_str() {
            "join" => ClientEvent::Join(payload(id, "join", data)?),
            "dtls" => ClientEvent::Dtls(payload(id, "dtls", data)?),
            "publish" => ClientEvent::Publish(payload(id, "publish", data)?),
            "unpublish" => ClientEvent::Unpublish(payload(id, "unpublish", data)?),
            "subscribe" => ClientEvent::Subscribe(payload(id, "subscribe", data)?),
            "unsubscribe" => ClientEvent::Unsubscribe(payload(id, "unsubscribe", data)?),
            "pause" => ClientEvent::Pause(payload(id, "pause", data)?),
            "resume" => ClientEvent::Resume(payload(id, "resume", data)?),
            _ => return Err(ProtocolError::UnknownEvent { id, event }),
        };

        Ok(ClientRequest { id, event })
    }
}

fn payload<T: DeserializeOwned>(id: i64, event: &'static str, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|e| ProtocolError::InvalidPayload {
        id,
        event,
        reason: e.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
}

/// Response to one client request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    method: &'static str,
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn ok(id: i64, params: Value) -> Self {
        Self {
            method: "response",
            id: Some(id),
            params: Some(params),
            error: None,
        }
    }

    pub fn error(id: Option<i64>, code: i32, message: impl Into<String>) -> Self {
        Self {
            method: "response",
            id,
            params: None,
            error: Some(ErrorBody {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct NotificationParams {
    event: String,
    data: Value,
}

/// Server-initiated client message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    method: &'static str,
    params: NotificationParams,
}

impl Notification {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            method: "notification",
            params: NotificationParams {
                event: event.into(),
                data,
            },
        }
    }
}
