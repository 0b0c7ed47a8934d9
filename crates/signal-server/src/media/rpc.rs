//! Media node RPC client.
//!
//! One JSON request/response per call on `media.<nodeId>`, bounded by a fixed
//! timeout. Failures are explicit; a missing or mistyped answer never turns
//! into an empty result.

use crate::bus::{topics, BusError, MessageBus};
use crate::errors::SignalError;
use crate::observability::metrics;
use crate::protocol::media::{MediaMethod, MediaRequest, MediaResponse};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct MediaRpcClient {
    bus: Arc<dyn MessageBus>,
    timeout: Duration,
}

impl MediaRpcClient {
    pub fn new(bus: Arc<dyn MessageBus>, timeout: Duration) -> Self {
        Self { bus, timeout }
    }

    /// Call `method` on `node_id` and decode the response `data` as `R`.
    ///
    /// Use `serde::de::IgnoredAny` for `R` when only success matters.
    ///
    /// # Errors
    ///
    /// - `SignalError::MediaTimeout` - no answer within the timeout
    /// - `SignalError::MediaRpc` - no responders, bus failure, unexpected
    ///   response tag or undecodable payload
    /// - `SignalError::Internal` - the request could not be serialized
    pub async fn call<P, R>(
        &self,
        node_id: &str,
        method: MediaMethod,
        params: &P,
    ) -> Result<R, SignalError>
    where
        P: Serialize + Sync,
        R: DeserializeOwned,
    {
        let name = method.as_str();
        let request = MediaRequest {
            method: name,
            params,
        };
        let payload = serde_json::to_vec(&request)
            .map_err(|e| SignalError::Internal(format!("media request encode failed: {e}")))?;

        let started = Instant::now();
        let result = self
            .bus
            .request(
                &topics::media_node_topic(node_id),
                Bytes::from(payload),
                self.timeout,
            )
            .await;
        metrics::record_media_rpc_duration(name, started.elapsed());

        let reply = result.map_err(|e| {
            let (reason, err) = match e {
                BusError::Timeout(_) => ("timeout", SignalError::MediaTimeout { method: name }),
                BusError::NoResponders(_) => (
                    "no_responders",
                    SignalError::MediaRpc {
                        method: name,
                        reason: "no responders".to_string(),
                    },
                ),
                other => (
                    "bus",
                    SignalError::MediaRpc {
                        method: name,
                        reason: other.to_string(),
                    },
                ),
            };
            fail(node_id, name, reason, err)
        })?;

        let response: MediaResponse = serde_json::from_slice(&reply).map_err(|e| {
            fail(
                node_id,
                name,
                "decode",
                SignalError::MediaRpc {
                    method: name,
                    reason: format!("undecodable response: {e}"),
                },
            )
        })?;

        if response.method != "response" {
            return Err(fail(
                node_id,
                name,
                "remote",
                SignalError::MediaRpc {
                    method: name,
                    reason: format!("unexpected response tag '{}'", response.method),
                },
            ));
        }

        let data = serde_json::from_value(response.data).map_err(|e| {
            fail(
                node_id,
                name,
                "decode",
                SignalError::MediaRpc {
                    method: name,
                    reason: format!("unexpected response data: {e}"),
                },
            )
        })?;

        debug!(
            target: "signal.media.rpc",
            node_id = %node_id,
            method = name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Media RPC completed"
        );
        Ok(data)
    }
}

fn fail(node_id: &str, method: &'static str, reason: &'static str, err: SignalError) -> SignalError {
    metrics::record_media_rpc_failure(method, reason);
    warn!(
        target: "signal.media.rpc",
        node_id = %node_id,
        method,
        reason,
        error = %err,
        "Media RPC failed"
    );
    err
}
