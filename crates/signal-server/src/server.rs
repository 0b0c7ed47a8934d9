//! Service wiring.
//!
//! Builds the registry, the heartbeat listener and the signaling router on
//! top of a connected bus. Used by the binary and by test harnesses so both
//! run the same startup path.

use crate::actors::{ConnectionSettings, GroupRegistryHandle, ParticipantContext};
use crate::bus::MessageBus;
use crate::config::Config;
use crate::errors::SignalError;
use crate::gateway::{signal_router, GatewayState};
use crate::media::MediaRpcClient;
use crate::observability::HealthState;
use crate::tasks::{run_heartbeat_listener, subscribe_heartbeats};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Runtime knobs of the signaling core.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub media_rpc_timeout: Duration,
    pub node_sweep_interval: Duration,
    pub connection: ConnectionSettings,
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            media_rpc_timeout: config.media_rpc_timeout,
            node_sweep_interval: config.node_sweep_interval,
            connection: ConnectionSettings {
                max_message_size: config.max_message_size,
                ..ConnectionSettings::default()
            },
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            media_rpc_timeout: Duration::from_secs(crate::config::DEFAULT_MEDIA_RPC_TIMEOUT_SECONDS),
            node_sweep_interval: Duration::from_secs(
                crate::config::DEFAULT_NODE_SWEEP_INTERVAL_SECONDS,
            ),
            connection: ConnectionSettings::default(),
        }
    }
}

/// Running signaling services.
pub struct SignalServices {
    pub registry: GroupRegistryHandle,
    /// Router serving WebSocket upgrades.
    pub router: Router,
    /// Probe state for the health router.
    pub health: Arc<HealthState>,
    registry_task: JoinHandle<()>,
    heartbeat_task: JoinHandle<()>,
}

impl SignalServices {
    /// Wait for the background tasks to finish after cancellation.
    pub async fn join(self) {
        let _ = self.heartbeat_task.await;
        let _ = self.registry_task.await;
    }
}

/// Start the registry and heartbeat listener and build the gateway router.
///
/// Cancelling `cancel_token` stops the registry, which in turn cancels every
/// registered participant and the heartbeat listener.
///
/// # Errors
///
/// Returns `SignalError::Bus` if the heartbeat subscription fails.
pub async fn start_services(
    bus: Arc<dyn MessageBus>,
    settings: ServiceSettings,
    cancel_token: CancellationToken,
) -> Result<SignalServices, SignalError> {
    let heartbeats = subscribe_heartbeats(bus.as_ref()).await?;

    let (registry, registry_task) =
        GroupRegistryHandle::spawn(settings.node_sweep_interval, cancel_token);
    let heartbeats_stopped = CancellationToken::new();
    let listener = run_heartbeat_listener(heartbeats, registry.clone(), registry.child_token());
    let stopped_guard = heartbeats_stopped.clone().drop_guard();
    let heartbeat_task = tokio::spawn(async move {
        let _stopped = stopped_guard;
        listener.await;
    });
    let health = Arc::new(HealthState::new(registry.clone(), heartbeats_stopped));

    let ctx = ParticipantContext {
        media: MediaRpcClient::new(Arc::clone(&bus), settings.media_rpc_timeout),
        bus,
        registry: registry.clone(),
    };
    let router = signal_router(Arc::new(GatewayState {
        ctx,
        settings: settings.connection,
    }));

    info!(
        target: "signal.server",
        media_rpc_timeout_ms = settings.media_rpc_timeout.as_millis() as u64,
        node_sweep_interval_ms = settings.node_sweep_interval.as_millis() as u64,
        "Signal services started"
    );

    Ok(SignalServices {
        registry,
        router,
        health,
        registry_task,
        heartbeat_task,
    })
}
