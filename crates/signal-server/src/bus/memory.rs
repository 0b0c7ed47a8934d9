//! In-process message bus.
//!
//! Exact-subject routing only (no wildcards); the signal server never
//! subscribes with wildcards.

use super::{BusError, BusMessage, MessageBus, Subscription};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

type Subscribers = HashMap<String, Vec<mpsc::UnboundedSender<BusMessage>>>;

/// Bus routing messages between subscribers of the same process.
///
/// Clones share the same routing table.
#[derive(Clone, Default)]
pub struct MemoryBus {
    subscribers: Arc<Mutex<Subscribers>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on `subject`.
    pub fn subscriber_count(&self, subject: &str) -> usize {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match subscribers.get_mut(subject) {
            Some(senders) => {
                senders.retain(|tx| !tx.is_closed());
                senders.len()
            }
            None => 0,
        }
    }

    #[cfg(test)]
    fn subject_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn deliver(&self, message: BusMessage) -> usize {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(senders) = subscribers.get_mut(&message.subject) else {
            return 0;
        };
        senders.retain(|tx| tx.send(message.clone()).is_ok());
        let delivered = senders.len();
        if delivered == 0 {
            subscribers.remove(&message.subject);
        }
        delivered
    }

    fn register(&self, subject: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut subscribers = self
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            // Subjects whose subscriptions were all dropped, e.g. departed participants
            subscribers.retain(|_, senders| {
                senders.retain(|tx| !tx.is_closed());
                !senders.is_empty()
            });
            subscribers.entry(subject.to_string()).or_default().push(tx);
        }

        let stream = stream::unfold(rx, |mut rx| async move {
            let message = rx.recv().await?;
            Some((message, rx))
        });
        Subscription::new(subject, stream.boxed())
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        self.deliver(BusMessage {
            subject: subject.to_string(),
            payload,
            reply: None,
        });
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError> {
        Ok(self.register(subject))
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, BusError> {
        let inbox = format!("_INBOX.{}", Uuid::new_v4());
        let mut replies = self.register(&inbox);

        let delivered = self.deliver(BusMessage {
            subject: subject.to_string(),
            payload,
            reply: Some(inbox.clone()),
        });
        let result = if delivered == 0 {
            Err(BusError::NoResponders(subject.to_string()))
        } else {
            match tokio::time::timeout(timeout, replies.next()).await {
                Ok(Some(reply)) => Ok(reply.payload),
                Ok(None) => Err(BusError::Closed),
                Err(_) => Err(BusError::Timeout(subject.to_string())),
            }
        };

        // Inboxes are single-use
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&inbox);
        result
    }
}
