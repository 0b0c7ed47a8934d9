//! Media node bookkeeping and RPC.
//!
//! - [`node`]: descriptor announced by media node heartbeats.
//! - [`pool`]: known nodes with two-strike liveness eviction and selection.
//! - [`rpc`]: typed request/response client for one node.

pub mod node;
pub mod pool;
pub mod rpc;

pub use node::MediaNode;
pub use pool::{NodePool, SweepReport};
pub use rpc::MediaRpcClient;
