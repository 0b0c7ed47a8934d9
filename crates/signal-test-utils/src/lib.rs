//! # Signal Test Utilities
//!
//! Shared test utilities for the signal server.
//!
//! Everything runs in-process on a [`MemoryBus`](signal_server::bus::MemoryBus):
//! no NATS server and no real media nodes are needed.
//!
//! ## Modules
//!
//! - `mock_media_node` - Scripted SFU media node answering media RPCs
//! - `session_spy` - Records fan-out traffic on session topics
//! - `client` - WebSocket signaling client
//! - `fixtures` - Connect params, heartbeats and a `TestServer`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use signal_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let server = TestServer::start().await;
//!     let node = MockMediaNode::builder().id("n1").start(server.bus()).await;
//!     node.heartbeat().await;
//!     server.wait_for_alive_nodes(1).await;
//!
//!     let mut alice = server.connect("s1", "alice").await;
//!     let joined = alice.request("join", json!({"pub": true})).await;
//!     assert!(joined["params"]["pub"].is_object());
//! }
//! ```

pub mod client;
pub mod fixtures;
pub mod mock_media_node;
pub mod session_spy;

// Re-export commonly used items
pub use client::*;
pub use fixtures::*;
pub use mock_media_node::*;
pub use session_spy::*;
