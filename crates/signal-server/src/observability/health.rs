//! Health endpoints for the signal server.
//!
//! - `GET /health` - 200 while the group registry loop is running
//! - `GET /ready` - 200 while upgrades are accepted, the registry is running
//!   and media heartbeats are being consumed
//!
//! The `/metrics` endpoint is merged in by the binary and rendered by
//! `metrics-exporter-prometheus`.

use crate::actors::GroupRegistryHandle;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Probe state derived from the running services.
///
/// Only `accepting` is a flag; it is raised once the listeners are bound and
/// lowered first thing at shutdown. Everything else is read from the services
/// themselves on every probe.
#[derive(Debug)]
pub struct HealthState {
    accepting: AtomicBool,
    registry: GroupRegistryHandle,
    /// Cancelled when the heartbeat listener task exits for any reason.
    heartbeats_stopped: CancellationToken,
}

impl HealthState {
    pub fn new(registry: GroupRegistryHandle, heartbeats_stopped: CancellationToken) -> Self {
        Self {
            accepting: AtomicBool::new(false),
            registry,
            heartbeats_stopped,
        }
    }

    pub fn start_accepting(&self) {
        self.accepting.store(true, Ordering::Release);
    }

    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.registry.is_cancelled()
    }

    /// Without heartbeats the node pool drains, so joins would fail with
    /// "No media node available".
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
            && self.is_live()
            && !self.heartbeats_stopped.is_cancelled()
    }
}

pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

fn probe_status(healthy: bool) -> StatusCode {
    if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    probe_status(state.is_live())
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    probe_status(state.is_ready())
}
