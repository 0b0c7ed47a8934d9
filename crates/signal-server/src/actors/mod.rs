//! Actor model implementation for the signal server.
//!
//! ```text
//! GroupRegistry (singleton)
//! ├── live participant set (cancel tokens for shutdown)
//! └── media node pool (heartbeats, liveness sweep, node picking)
//!
//! Participant (one per WebSocket connection)
//! ├── read loop  -> inbound queue
//! ├── forwarders -> inbound queue (direct and session bus subscriptions)
//! └── process loop -> outbound queue -> write loop
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single owner**: participant state is only touched by its process loop
//! - **CancellationToken propagation**: connection tokens are children of the
//!   registry token, so cancelling the registry drains every connection
//! - **Message passing**: registry access goes through `tokio::sync::mpsc`
//!   with `oneshot` replies
//!
//! # Modules
//!
//! - [`registry`] - `GroupRegistry` singleton owning participants and media nodes
//! - [`participant`] - `Participant` protocol state machine
//! - [`connection`] - WebSocket read and write loops
//! - [`messages`] - Message types for actor communication

pub mod connection;
pub mod messages;
pub mod participant;
pub mod registry;

pub use connection::{serve_participant, ConnectionSettings};
pub use messages::*;
pub use participant::{Participant, ParticipantContext, Role};
pub use registry::{GroupRegistry, GroupRegistryHandle};
