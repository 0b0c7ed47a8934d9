//! Media node JSON-RPC messages.
//!
//! Request: `{"method": "publish", "params": {...}}` on `media.<nodeId>`.
//! Response: `{"method": "response", "data": {...}}`.

use super::TransportRole;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Methods a media node answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaMethod {
    Codecs,
    Transport,
    Dtls,
    Publish,
    Unpublish,
    Subscribe,
    Unsubscribe,
    Pause,
    Resume,
    Close,
}

impl MediaMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaMethod::Codecs => "codecs",
            MediaMethod::Transport => "transport",
            MediaMethod::Dtls => "dtls",
            MediaMethod::Publish => "publish",
            MediaMethod::Unpublish => "unpublish",
            MediaMethod::Subscribe => "subscribe",
            MediaMethod::Unsubscribe => "unsubscribe",
            MediaMethod::Pause => "pause",
            MediaMethod::Resume => "resume",
            MediaMethod::Close => "close",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MediaRequest<'a, P> {
    pub method: &'static str,
    pub params: &'a P,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaResponse {
    pub method: String,
    #[serde(default)]
    pub data: Value,
}

/// Parameters of methods that take none; serializes as `{}`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct NoParams {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams<'a> {
    pub transport_id: &'a str,
    pub role: TransportRole,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DtlsParams<'a> {
    pub transport_id: &'a str,
    pub dtls_parameters: &'a Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishParams<'a> {
    pub transport_id: &'a str,
    pub codec: &'a Value,
    pub metadata: &'a Value,
}

/// Parameters of `unpublish`, `unsubscribe`, `pause` and `resume`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderParams<'a> {
    pub transport_id: &'a str,
    pub sender_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeParams<'a> {
    /// The subscriber's own sub transport.
    pub transport_id: &'a str,
    pub sender_id: &'a str,
    pub remote_transport_id: &'a str,
    pub remote_node: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseParams<'a> {
    pub transport_id: &'a str,
    pub role: TransportRole,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CodecsResult {
    pub codecs: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportResult {
    pub transport_parameters: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResult {
    pub sender_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeResult {
    pub receiver_id: String,
    pub codec: Value,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let params = SubscribeParams {
            transport_id: "t-sub",
            sender_id: "snd-1",
            remote_transport_id: "t-pub",
            remote_node: "n2",
        };
        let request = MediaRequest {
            method: MediaMethod::Subscribe.as_str(),
            params: &params,
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "method": "subscribe",
                "params": {
                    "transportId": "t-sub",
                    "senderId": "snd-1",
                    "remoteTransportId": "t-pub",
                    "remoteNode": "n2"
                }
            })
        );
    }

    #[test]
    fn test_no_params_is_empty_object() {
        let request = MediaRequest {
            method: MediaMethod::Codecs.as_str(),
            params: &NoParams {},
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"method": "codecs", "params": {}})
        );
    }

    #[test]
    fn test_close_params_carry_role() {
        let params = CloseParams {
            transport_id: "t-1",
            role: TransportRole::Sub,
        };
        assert_eq!(
            serde_json::to_value(&params).unwrap(),
            json!({"transportId": "t-1", "role": "sub"})
        );
    }

    #[test]
    fn test_decode_subscribe_result() {
        let result: SubscribeResult =
            serde_json::from_value(json!({"receiverId": "r-1", "codec": {"kind": "audio"}}))
                .unwrap();
        assert_eq!(result.receiver_id, "r-1");
        assert_eq!(result.codec, json!({"kind": "audio"}));
    }
}
