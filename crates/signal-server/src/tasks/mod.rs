//! Background tasks for the signal server.
//!
//! # Tasks
//!
//! - `heartbeat` - Feeds media node heartbeats into the group registry

pub mod heartbeat;

pub use heartbeat::{run_heartbeat_listener, subscribe_heartbeats};
