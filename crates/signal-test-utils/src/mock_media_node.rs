//! Mock SFU media node.
//!
//! Answers media RPCs on `media.<id>` with canned results and records every
//! request it receives. Individual methods can be switched to fail (answer
//! with a non-`response` tag) or to stay silent (no answer, so the caller
//! times out).
//!
//! # Example
//!
//! ```rust,ignore
//! use signal_test_utils::MockMediaNode;
//!
//! let node = MockMediaNode::builder()
//!     .id("n1")
//!     .fail_method("publish")
//!     .start(&bus)
//!     .await;
//!
//! node.heartbeat().await;
//! assert_eq!(node.calls_for("codecs").len(), 1);
//! ```

use bytes::Bytes;
use serde_json::{json, Value};
use signal_server::bus::{topics, MemoryBus, MessageBus};
use signal_server::media::MediaNode;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// One media RPC received by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaCall {
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Default)]
struct Behavior {
    failing: HashSet<String>,
    silent: HashSet<String>,
}

/// Mock media node bound to a [`MemoryBus`].
pub struct MockMediaNode {
    id: String,
    bus: MemoryBus,
    calls: Arc<Mutex<Vec<MediaCall>>>,
    behavior: Arc<Mutex<Behavior>>,
    task: JoinHandle<()>,
}

impl MockMediaNode {
    /// Create a new MockMediaNode builder.
    #[must_use]
    pub fn builder() -> MockMediaNodeBuilder {
        MockMediaNodeBuilder::default()
    }

    /// Get the node ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Publish one heartbeat for this node.
    pub async fn heartbeat(&self) {
        let payload = serde_json::to_vec(&MediaNode {
            id: self.id.clone(),
            area: "test".to_string(),
            host: "127.0.0.1".to_string(),
            name: format!("mock-{}", self.id),
        })
        .expect("heartbeat encode");
        self.bus
            .publish(topics::HEARTBEAT_TOPIC, Bytes::from(payload))
            .await
            .expect("heartbeat publish");
    }

    /// Make `method` answer with a failure from now on.
    pub fn fail_method(&self, method: &str) {
        self.behavior
            .lock()
            .unwrap()
            .failing
            .insert(method.to_string());
    }

    /// Make `method` go unanswered from now on.
    pub fn silence_method(&self, method: &str) {
        self.behavior
            .lock()
            .unwrap()
            .silent
            .insert(method.to_string());
    }

    /// All calls received so far, in arrival order.
    #[must_use]
    pub fn calls(&self) -> Vec<MediaCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls of one method, in arrival order.
    #[must_use]
    pub fn calls_for(&self, method: &str) -> Vec<MediaCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.method == method)
            .collect()
    }

    /// Wait until `count` calls of `method` have arrived (5 second limit).
    pub async fn wait_for_calls(&self, method: &str, count: usize) -> Vec<MediaCall> {
        for _ in 0..500 {
            let calls = self.calls_for(method);
            if calls.len() >= count {
                return calls;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "node {} received {} '{method}' calls, expected {count}",
            self.id,
            self.calls_for(method).len()
        );
    }
}

impl Drop for MockMediaNode {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Builder for MockMediaNode configuration.
#[derive(Debug, Default)]
pub struct MockMediaNodeBuilder {
    id: Option<String>,
    behavior: Behavior,
}

impl MockMediaNodeBuilder {
    /// Set the node ID (default: "node-test-default").
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Answer `method` with a failure.
    #[must_use]
    pub fn fail_method(mut self, method: &str) -> Self {
        self.behavior.failing.insert(method.to_string());
        self
    }

    /// Leave `method` unanswered.
    #[must_use]
    pub fn silence_method(mut self, method: &str) -> Self {
        self.behavior.silent.insert(method.to_string());
        self
    }

    /// Subscribe on the bus and start answering.
    pub async fn start(self, bus: &MemoryBus) -> MockMediaNode {
        let id = self
            .id
            .unwrap_or_else(|| "node-test-default".to_string());
        let mut subscription = bus
            .subscribe(&topics::media_node_topic(&id))
            .await
            .expect("mock media node subscribe");

        let calls = Arc::new(Mutex::new(Vec::new()));
        let behavior = Arc::new(Mutex::new(self.behavior));

        let task = {
            let bus = bus.clone();
            let calls = Arc::clone(&calls);
            let behavior = Arc::clone(&behavior);
            let id = id.clone();
            let mut answered = 0usize;
            tokio::spawn(async move {
                while let Some(message) = subscription.next().await {
                    let request: Value =
                        serde_json::from_slice(&message.payload).unwrap_or(Value::Null);
                    let method = request["method"].as_str().unwrap_or_default().to_string();
                    let params = request.get("params").cloned().unwrap_or(Value::Null);
                    calls.lock().unwrap().push(MediaCall {
                        method: method.clone(),
                        params: params.clone(),
                    });

                    let (fail, silent) = {
                        let behavior = behavior.lock().unwrap();
                        (
                            behavior.failing.contains(&method),
                            behavior.silent.contains(&method),
                        )
                    };
                    let Some(reply_to) = message.reply else {
                        continue;
                    };
                    if silent {
                        continue;
                    }

                    let reply = if fail {
                        json!({"method": "error", "data": {"message": "injected failure"}})
                    } else {
                        answered += 1;
                        json!({"method": "response", "data": canned_result(&id, &method, &params, answered)})
                    };
                    let _ = bus.publish(&reply_to, Bytes::from(reply.to_string())).await;
                }
            })
        };

        MockMediaNode {
            id,
            bus: bus.clone(),
            calls,
            behavior,
            task,
        }
    }
}

fn canned_result(node_id: &str, method: &str, params: &Value, n: usize) -> Value {
    match method {
        "codecs" => json!({"codecs": [{"kind": "audio", "mimeType": "audio/opus"}]}),
        "transport" => json!({
            "transportParameters": {
                "id": params["transportId"],
                "iceParameters": {"usernameFragment": "ufrag"},
                "node": node_id,
            }
        }),
        "publish" => json!({"senderId": format!("{node_id}-sender-{n}")}),
        "subscribe" => json!({
            "receiverId": format!("{node_id}-receiver-{n}"),
            "codec": {"kind": "audio", "mimeType": "audio/opus"},
        }),
        _ => json!({}),
    }
}
