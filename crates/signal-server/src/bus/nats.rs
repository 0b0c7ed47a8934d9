//! NATS-backed message bus.

use super::{BusError, BusMessage, MessageBus, Subscription};
use async_nats::RequestErrorKind;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info};

/// Message bus on top of one `async-nats` client connection.
///
/// The client multiplexes every subscription and request over a single
/// connection and is cheap to clone.
#[derive(Clone)]
pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    /// Connect to the given NATS servers as one client.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Connect` if no server can be reached. Callers treat
    /// this as fatal at startup.
    pub async fn connect(servers: &[String]) -> Result<Self, BusError> {
        if servers.is_empty() {
            return Err(BusError::Connect("no NATS servers configured".to_string()));
        }

        let addrs = servers.join(",");
        let client = async_nats::ConnectOptions::new()
            .name("signal-server")
            .request_timeout(None)
            .connect(addrs.as_str())
            .await
            .map_err(|e| BusError::Connect(e.to_string()))?;

        info!(
            target: "signal.bus",
            server_count = servers.len(),
            "Connected to NATS"
        );

        Ok(Self { client })
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| BusError::Publish {
                subject: subject.to_string(),
                reason: e.to_string(),
            })
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| BusError::Subscribe {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?;

        debug!(target: "signal.bus", subject = %subject, "Subscribed");

        let stream = subscriber.map(|message| BusMessage {
            subject: message.subject.to_string(),
            payload: message.payload,
            reply: message.reply.map(|reply| reply.to_string()),
        });
        Ok(Subscription::new(subject, stream.boxed()))
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, BusError> {
        // The per-request timeout replaces the client-wide default
        let request = async_nats::Request::new()
            .payload(payload)
            .timeout(Some(timeout));
        self.client
            .send_request(subject.to_string(), request)
            .await
            .map(|message| message.payload)
            .map_err(|e| match e.kind() {
                RequestErrorKind::NoResponders => BusError::NoResponders(subject.to_string()),
                RequestErrorKind::TimedOut => BusError::Timeout(subject.to_string()),
                _ => BusError::Request {
                    subject: subject.to_string(),
                    reason: e.to_string(),
                },
            })
    }
}
