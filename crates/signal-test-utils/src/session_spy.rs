//! Fan-out traffic recorder.
//!
//! Subscribes to a session's broadcast subject (or a participant's direct
//! subject) and decodes everything published there.

use signal_server::bus::{topics, MemoryBus, MessageBus};
use signal_server::protocol::PeerEnvelope;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Records decoded fan-out messages in arrival order.
pub struct SessionSpy {
    subject: String,
    received: mpsc::UnboundedReceiver<PeerEnvelope>,
    task: JoinHandle<()>,
}

impl SessionSpy {
    /// Spy on `signal.<session_id>.@`.
    pub async fn broadcast(bus: &MemoryBus, session_id: &str) -> Self {
        Self::on_subject(bus, topics::session_broadcast_topic(session_id)).await
    }

    /// Spy on `signal.<session_id>.<token_id>`.
    pub async fn direct(bus: &MemoryBus, session_id: &str, token_id: &str) -> Self {
        Self::on_subject(bus, topics::participant_topic(session_id, token_id)).await
    }

    async fn on_subject(bus: &MemoryBus, subject: String) -> Self {
        let mut subscription = bus.subscribe(&subject).await.expect("spy subscribe");
        let (tx, received) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Some(message) = subscription.next().await {
                let envelope =
                    PeerEnvelope::decode(&message.payload).expect("undecodable fan-out message");
                if tx.send(envelope).is_err() {
                    break;
                }
            }
        });
        Self {
            subject,
            received,
            task,
        }
    }

    /// Next recorded message; panics after 5 seconds.
    pub async fn next(&mut self) -> PeerEnvelope {
        tokio::time::timeout(RECEIVE_TIMEOUT, self.received.recv())
            .await
            .unwrap_or_else(|_| panic!("no fan-out message on {} within 5s", self.subject))
            .expect("spy task ended")
    }

    /// Assert nothing arrives within `wait`.
    pub async fn assert_silent(&mut self, wait: Duration) {
        if let Ok(Some(envelope)) = tokio::time::timeout(wait, self.received.recv()).await {
            panic!("unexpected fan-out message on {}: {envelope:?}", self.subject);
        }
    }
}

impl Drop for SessionSpy {
    fn drop(&mut self) {
        self.task.abort();
    }
}
