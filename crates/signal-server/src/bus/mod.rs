//! Message bus capability.
//!
//! Everything the signal server exchanges with other processes goes through a
//! subject-addressed bus: media node RPCs, media node heartbeats and session
//! fan-out between participants held by different signal servers.
//!
//! Two implementations exist:
//! - [`NatsBus`] wraps an `async-nats` client (production).
//! - [`MemoryBus`] routes messages inside one process (single-node runs, tests).

mod memory;
mod nats;
pub mod topics;

pub use memory::MemoryBus;
pub use nats::NatsBus;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A message delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Bytes,
    /// Reply subject set by `request`; responders publish their answer here.
    pub reply: Option<String>,
}

/// Live subscription on one subject.
///
/// Dropping the subscription releases it on the bus.
pub struct Subscription {
    subject: String,
    stream: BoxStream<'static, BusMessage>,
}

impl Subscription {
    pub fn new(subject: impl Into<String>, stream: BoxStream<'static, BusMessage>) -> Self {
        Self {
            subject: subject.into(),
            stream,
        }
    }

    /// Subject this subscription listens on.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Next message, or `None` once the bus side is closed.
    pub async fn next(&mut self) -> Option<BusMessage> {
        self.stream.next().await
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Bus connect failed: {0}")]
    Connect(String),

    #[error("Publish to {subject} failed: {reason}")]
    Publish { subject: String, reason: String },

    #[error("Subscribe to {subject} failed: {reason}")]
    Subscribe { subject: String, reason: String },

    #[error("Request to {subject} failed: {reason}")]
    Request { subject: String, reason: String },

    #[error("No responders on {0}")]
    NoResponders(String),

    #[error("Request to {0} timed out")]
    Timeout(String),

    #[error("Bus closed")]
    Closed,
}

/// Subject-addressed publish/subscribe/request capability.
///
/// Implementations must be safe for concurrent use from many participant
/// tasks; callers share one instance as `Arc<dyn MessageBus>`.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Fire-and-forget publish.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError>;

    /// Subscribe to one exact subject.
    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError>;

    /// Publish with a reply subject and wait for the first answer.
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, BusError>;
}
