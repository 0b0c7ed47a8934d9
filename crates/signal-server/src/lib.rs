//! Signal Server Library
//!
//! Signaling core of a WebRTC conferencing service. Browser clients connect
//! over WebSocket; the server negotiates publish/subscribe transports on a
//! pool of SFU media nodes and fans session events out to every other
//! participant through a shared message bus (NATS).
//!
//! # Architecture
//!
//! ```text
//! Connection Gateway (axum WebSocket upgrade)
//! └── creates one Participant per connection
//!     ├── read loop    (socket -> inbound queue)
//!     ├── process loop (protocol state machine, sole owner of participant state)
//!     └── write loop   (outbound queue + keep-alive pings -> socket)
//!
//! GroupRegistry (singleton event loop)
//! ├── owns the live participant set
//! └── owns the media node pool (heartbeats, two-strike sweep, node picking)
//! ```
//!
//! Bus subscriptions of a participant never touch its state directly: each
//! subscription is drained by a forwarder task into the participant's inbound
//! queue, so client requests and peer events are applied in one serialized
//! stream.
//!
//! # Modules
//!
//! - [`actors`] - Group registry and participant actors
//! - [`bus`] - Message bus capability (NATS and in-process implementations)
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with client-facing error codes
//! - [`gateway`] - WebSocket upgrade handling
//! - [`media`] - Media node descriptors, node pool and media RPC client
//! - [`observability`] - Health endpoints and Prometheus metrics
//! - [`protocol`] - Client, fan-out and media wire formats
//! - [`server`] - Service wiring shared by the binary and test harnesses
//! - [`tasks`] - Background tasks (media node heartbeat listener)

pub mod actors;
pub mod bus;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod media;
pub mod observability;
pub mod protocol;
pub mod server;
pub mod tasks;
