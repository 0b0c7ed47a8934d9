//! Media node heartbeat listener.
//!
//! Media nodes periodically publish their descriptor on `media@heartbeat`.
//! Every decodable heartbeat is forwarded to the group registry, which marks
//! the node alive for the current sweep period.
//!
//! # Graceful Shutdown
//!
//! The listener exits when the cancellation token is triggered or the
//! subscription ends.

use crate::actors::GroupRegistryHandle;
use crate::bus::{topics, MessageBus, Subscription};
use crate::errors::SignalError;
use crate::media::MediaNode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Subscribe to the heartbeat subject.
///
/// Kept separate from [`run_heartbeat_listener`] so startup can fail before
/// the server reports ready.
pub async fn subscribe_heartbeats(bus: &dyn MessageBus) -> Result<Subscription, SignalError> {
    Ok(bus.subscribe(topics::HEARTBEAT_TOPIC).await?)
}

/// Forward media node heartbeats to the registry until cancelled.
#[instrument(skip_all, name = "signal.task.heartbeat")]
pub async fn run_heartbeat_listener(
    mut subscription: Subscription,
    registry: GroupRegistryHandle,
    cancel_token: CancellationToken,
) {
    info!(
        target: "signal.task.heartbeat",
        subject = %subscription.subject(),
        "Starting heartbeat listener"
    );

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!(
                    target: "signal.task.heartbeat",
                    "Heartbeat listener received shutdown signal, exiting"
                );
                break;
            }
            message = subscription.next() => {
                let Some(message) = message else {
                    warn!(target: "signal.task.heartbeat", "Heartbeat subscription ended");
                    break;
                };

                let node: MediaNode = match serde_json::from_slice(&message.payload) {
                    Ok(node) => node,
                    Err(e) => {
                        warn!(
                            target: "signal.task.heartbeat",
                            error = %e,
                            "Ignoring undecodable heartbeat"
                        );
                        continue;
                    }
                };

                debug!(target: "signal.task.heartbeat", node_id = %node.id, "Heartbeat received");
                if let Err(e) = registry.record_heartbeat(node).await {
                    warn!(
                        target: "signal.task.heartbeat",
                        error = %e,
                        "Registry unavailable, stopping heartbeat listener"
                    );
                    break;
                }
            }
        }
    }

    info!(target: "signal.task.heartbeat", "Heartbeat listener stopped");
}
