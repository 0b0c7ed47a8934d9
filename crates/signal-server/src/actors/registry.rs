//! `GroupRegistry` - process-wide owner of participants and media nodes.
//!
//! A single event loop serializes everything that touches the live
//! participant set or the media node pool:
//!
//! - participant register / unregister (idempotent)
//! - media node heartbeats
//! - node selection for joining participants
//! - periodic liveness sweeps of the node pool
//!
//! # Shutdown
//!
//! Cancelling the registry token cancels every registered participant's
//! connection token before the loop exits.

use crate::errors::SignalError;
use crate::media::{MediaNode, NodePool};
use crate::observability::metrics;

use super::messages::{ParticipantEntry, RegistryMessage, RegistryStatus};

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// Handle to the `GroupRegistry`.
#[derive(Clone, Debug)]
pub struct GroupRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl GroupRegistryHandle {
    /// Spawn the registry loop.
    ///
    /// `sweep_interval` is the period of the node pool liveness sweep; the
    /// first sweep runs one full period after start.
    pub fn spawn(
        sweep_interval: Duration,
        cancel_token: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let registry = GroupRegistry::new(receiver, cancel_token.clone(), sweep_interval);
        let task_handle = tokio::spawn(registry.run());

        (
            Self {
                sender,
                cancel_token,
            },
            task_handle,
        )
    }

    /// Register a participant. Returns once the registry has recorded it.
    pub async fn register(&self, entry: ParticipantEntry) -> Result<(), SignalError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::Register {
                entry,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("response receive failed: {e}")))
    }

    /// Unregister a participant (fire-and-forget, idempotent).
    pub async fn unregister(&self, participant_id: String) -> Result<(), SignalError> {
        self.sender
            .send(RegistryMessage::Unregister { participant_id })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))
    }

    /// Forward a media node heartbeat (fire-and-forget).
    pub async fn record_heartbeat(&self, node: MediaNode) -> Result<(), SignalError> {
        self.sender
            .send(RegistryMessage::Heartbeat { node })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))
    }

    /// Pick a media node: `preferred` if alive, else a random alive node.
    pub async fn pick_node(
        &self,
        preferred: Option<String>,
    ) -> Result<Option<MediaNode>, SignalError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::PickNode {
                preferred,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("response receive failed: {e}")))
    }

    pub async fn get_status(&self) -> Result<RegistryStatus, SignalError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the registry and every registered participant.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Child token for a participant connection.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// The `GroupRegistry` implementation.
pub struct GroupRegistry {
    receiver: mpsc::Receiver<RegistryMessage>,
    cancel_token: CancellationToken,
    participants: HashMap<String, ParticipantEntry>,
    nodes: NodePool,
    sweep_interval: Duration,
}

impl GroupRegistry {
    fn new(
        receiver: mpsc::Receiver<RegistryMessage>,
        cancel_token: CancellationToken,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            receiver,
            cancel_token,
            participants: HashMap::new(),
            nodes: NodePool::new(),
            sweep_interval,
        }
    }

    #[instrument(skip_all, name = "signal.actor.registry")]
    async fn run(mut self) {
        info!(
            target: "signal.actor.registry",
            sweep_interval_ms = self.sweep_interval.as_millis() as u64,
            "GroupRegistry started"
        );

        let mut sweep = tokio::time::interval_at(
            Instant::now() + self.sweep_interval,
            self.sweep_interval,
        );
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // Due sweeps run before queued messages
                biased;

                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "signal.actor.registry",
                        "GroupRegistry received cancellation signal"
                    );
                    self.shutdown();
                    break;
                }

                _ = sweep.tick() => self.sweep_nodes(),

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message),
                        None => {
                            info!(
                                target: "signal.actor.registry",
                                "GroupRegistry channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "signal.actor.registry",
            participants_remaining = self.participants.len(),
            "GroupRegistry stopped"
        );
    }

    fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::Register { entry, respond_to } => {
                self.register(entry);
                let _ = respond_to.send(());
            }

            RegistryMessage::Unregister { participant_id } => {
                self.unregister(&participant_id);
            }

            RegistryMessage::Heartbeat { node } => {
                let node_id = node.id.clone();
                if self.nodes.record_heartbeat(node) {
                    info!(
                        target: "signal.actor.registry",
                        node_id = %node_id,
                        known_nodes = self.nodes.len(),
                        "Discovered media node"
                    );
                }
                self.update_node_gauges();
            }

            RegistryMessage::PickNode {
                preferred,
                respond_to,
            } => {
                let node = self.nodes.pick_node(preferred.as_deref());
                if node.is_none() {
                    warn!(
                        target: "signal.actor.registry",
                        known_nodes = self.nodes.len(),
                        "No alive media node to assign"
                    );
                }
                let _ = respond_to.send(node);
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(RegistryStatus {
                    participant_count: self.participants.len(),
                    node_count: self.nodes.len(),
                    alive_node_count: self.nodes.alive_count(),
                });
            }
        }
    }

    fn register(&mut self, entry: ParticipantEntry) {
        debug!(
            target: "signal.actor.registry",
            participant_id = %entry.participant_id,
            session_id = %entry.session_id,
            token_id = %entry.token_id,
            "Participant registered"
        );
        self.participants
            .insert(entry.participant_id.clone(), entry);
        metrics::set_participants_active(self.participants.len());
    }

    fn unregister(&mut self, participant_id: &str) {
        match self.participants.remove(participant_id) {
            Some(entry) => {
                debug!(
                    target: "signal.actor.registry",
                    participant_id = %participant_id,
                    session_id = %entry.session_id,
                    token_id = %entry.token_id,
                    "Participant unregistered"
                );
                metrics::set_participants_active(self.participants.len());
            }
            None => {
                debug!(
                    target: "signal.actor.registry",
                    participant_id = %participant_id,
                    "Unregister for unknown participant ignored"
                );
            }
        }
    }

    fn sweep_nodes(&mut self) {
        let report = self.nodes.sweep();
        for node_id in &report.evicted {
            info!(
                target: "signal.actor.registry",
                node_id = %node_id,
                "Evicted media node after missed heartbeats"
            );
        }
        debug!(
            target: "signal.actor.registry",
            stale = report.marked_stale.len(),
            evicted = report.evicted.len(),
            "Node pool swept"
        );
        self.update_node_gauges();
    }

    fn update_node_gauges(&self) {
        metrics::set_media_nodes(self.nodes.alive_count(), self.nodes.len());
    }

    fn shutdown(&mut self) {
        for (participant_id, entry) in self.participants.drain() {
            debug!(
                target: "signal.actor.registry",
                participant_id = %participant_id,
                "Cancelling participant connection"
            );
            entry.cancel_token.cancel();
        }
        metrics::set_participants_active(0);
    }
}
