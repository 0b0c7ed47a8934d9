use serde::{Deserialize, Serialize};

/// Media node descriptor, published as the heartbeat payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaNode {
    pub id: String,
    #[serde(default)]
    pub area: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub name: String,
}

impl MediaNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            area: String::new(),
            host: String::new(),
            name: String::new(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_heartbeat_payload() {
        let node: MediaNode = serde_json::from_str(
            r#"{"id":"n1","area":"eu-west","host":"10.0.0.4","name":"sfu-a"}"#,
        )
        .unwrap();
        assert_eq!(node.id, "n1");
        assert_eq!(node.area, "eu-west");
        assert_eq!(node.host, "10.0.0.4");
        assert_eq!(node.name, "sfu-a");
    }

    #[test]
    fn test_decode_requires_id() {
        assert!(serde_json::from_str::<MediaNode>(r#"{"area":"eu"}"#).is_err());
    }
}
