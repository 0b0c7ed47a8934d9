//! Session fan-out messages.
//!
//! Every message published on a session or participant subject carries the
//! sender's token id: `{"tokenId": "alice", "method": "publish", "data": {...}}`.

use crate::media::MediaNode;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// One fan-out message and the participant that sent it.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerEnvelope {
    pub token_id: String,
    pub event: PeerEvent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    Join(PeerJoin),
    Leave,
    Publish(PeerPublish),
    Unpublish { sender_id: String },
    Pause { sender_id: String },
    Resume { sender_id: String },
}

impl PeerEvent {
    pub fn method(&self) -> &'static str {
        match self {
            PeerEvent::Join(_) => "join",
            PeerEvent::Leave => "leave",
            PeerEvent::Publish(_) => "publish",
            PeerEvent::Unpublish { .. } => "unpublish",
            PeerEvent::Pause { .. } => "pause",
            PeerEvent::Resume { .. } => "resume",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerJoin {
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(rename = "pub", default)]
    pub publish: bool,
    #[serde(rename = "sub", default)]
    pub subscribe: bool,
}

/// A sender announced by a publisher, with everything a subscriber needs to
/// consume it from another media node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerPublish {
    pub node: MediaNode,
    pub transport_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SenderData {
    sender_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeerWire {
    token_id: String,
    method: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Error)]
pub enum PeerDecodeError {
    #[error("Invalid fan-out message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown fan-out method: {0}")]
    UnknownMethod(String),
}

impl PeerEnvelope {
    pub fn new(token_id: impl Into<String>, event: PeerEvent) -> Self {
        Self {
            token_id: token_id.into(),
            event,
        }
    }

    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        let data = match &self.event {
            PeerEvent::Join(join) => serde_json::to_value(join)?,
            PeerEvent::Leave => Value::Object(Map::new()),
            PeerEvent::Publish(publish) => serde_json::to_value(publish)?,
            PeerEvent::Unpublish { sender_id }
            | PeerEvent::Pause { sender_id }
            | PeerEvent::Resume { sender_id } => serde_json::to_value(SenderData {
                sender_id: sender_id.clone(),
            })?,
        };
        let wire = PeerWire {
            token_id: self.token_id.clone(),
            method: self.event.method().to_string(),
            data,
        };
        Ok(Bytes::from(serde_json::to_vec(&wire)?))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PeerDecodeError> {
        let wire: PeerWire = serde_json::from_slice(payload)?;
        let event = match wire.method.as_str() {
            "join" => PeerEvent::Join(serde_json::from_value(wire.data)?),
            "leave" => PeerEvent::Leave,
            "publish" => PeerEvent::Publish(serde_json::from_value(wire.data)?),
            "unpublish" => PeerEvent::Unpublish {
                sender_id: sender_id(wire.data)?,
            },
            "pause" => PeerEvent::Pause {
                sender_id: sender_id(wire.data)?,
            },
            "resume" => PeerEvent::Resume {
                sender_id: sender_id(wire.data)?,
            },
            _ => return Err(PeerDecodeError::UnknownMethod(wire.method)),
        };
        Ok(Self {
            token_id: wire.token_id,
            event,
        })
    }
}

fn sender_id(data: Value) -> Result<String, serde_json::Error> {
    serde_json::from_value::<SenderData>(data).map(|d| d.sender_id)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_publish_wire_format() {
        let envelope = PeerEnvelope::new(
            "alice",
            PeerEvent::Publish(PeerPublish {
                node: MediaNode {
                    id: "n1".to_string(),
                    area: "eu-west".to_string(),
                    host: "10.0.0.4".to_string(),
                    name: "sfu-a".to_string(),
                },
                transport_id: "t-pub".to_string(),
                sender_id: "snd-1".to_string(),
                metadata: json!({"kind": "video"}),
            }),
        );

        let value: Value = serde_json::from_slice(&envelope.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "tokenId": "alice",
                "method": "publish",
                "data": {
                    "node": {"id": "n1", "area": "eu-west", "host": "10.0.0.4", "name": "sfu-a"},
                    "transportId": "t-pub",
                    "senderId": "snd-1",
                    "metadata": {"kind": "video"}
                }
            })
        );
    }

    #[test]
    fn test_join_wire_format() {
        let envelope = PeerEnvelope::new(
            "bob",
            PeerEvent::Join(PeerJoin {
                metadata: BTreeMap::from([("name".to_string(), "Bob".to_string())]),
                publish: false,
                subscribe: true,
            }),
        );

        let value: Value = serde_json::from_slice(&envelope.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "tokenId": "bob",
                "method": "join",
                "data": {"metadata": {"name": "Bob"}, "pub": false, "sub": true}
            })
        );
    }

    #[test]
    fn test_decode_sender_events() {
        let decoded =
            PeerEnvelope::decode(br#"{"tokenId":"carol","method":"pause","data":{"senderId":"s9"}}"#)
                .unwrap();
        assert_eq!(decoded.token_id, "carol");
        assert_eq!(
            decoded.event,
            PeerEvent::Pause {
                sender_id: "s9".to_string()
            }
        );
    }

    #[test]
    fn test_decode_leave_without_data() {
        let decoded = PeerEnvelope::decode(br#"{"tokenId":"dave","method":"leave"}"#).unwrap();
        assert_eq!(decoded.event, PeerEvent::Leave);
    }

    #[test]
    fn test_decode_unknown_method() {
        let err = PeerEnvelope::decode(br#"{"tokenId":"x","method":"senders","data":{}}"#)
            .unwrap_err();
        assert!(matches!(err, PeerDecodeError::UnknownMethod(ref m) if m == "senders"));
    }

    #[test]
    fn test_decode_rejects_missing_sender_id() {
        let err = PeerEnvelope::decode(br#"{"tokenId":"x","method":"unpublish","data":{}}"#);
        assert!(matches!(err, Err(PeerDecodeError::Json(_))));
    }
}
