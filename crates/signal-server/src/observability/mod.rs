//! Observability for the signal server.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit field
//! allow-listing; participant metadata and client payloads are never logged.
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `signal_participants_active` | Gauge | none | Registered participants |
//! | `signal_media_nodes_alive` | Gauge | none | Media nodes eligible for selection |
//! | `signal_media_nodes_known` | Gauge | none | Media nodes known, alive or not |
//! | `signal_media_rpc_duration_seconds` | Histogram | `method` | Media RPC latency |
//! | `signal_media_rpc_failures_total` | Counter | `method`, `reason` | Failed media RPCs |
//! | `signal_client_requests_total` | Counter | `event`, `status` | Client requests handled |
//! | `signal_connections_total` | Counter | none | Accepted WebSocket upgrades |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
