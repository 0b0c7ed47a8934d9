//! `Participant` - per-connection protocol state machine.
//!
//! The process loop is the only task that reads or writes participant state.
//! It consumes one inbound queue fed by:
//!
//! - the connection read loop (client text frames, terminal disconnect)
//! - one forwarder task per bus subscription (session fan-out)
//!
//! so client-driven mutations and bus-driven reads are serialized.
//!
//! # Lifecycle
//!
//! Unjoined -> Joined (successful `join`) -> Closed (disconnect).
//!
//! On disconnect the participant releases both bus subscriptions, broadcasts
//! `leave` if it had joined, closes every held transport on its media node,
//! cancels the connection and unregisters from the group registry.

use crate::bus::{topics, MessageBus, Subscription};
use crate::errors::SignalError;
use crate::media::{MediaNode, MediaRpcClient};
use crate::observability::metrics;
use crate::protocol::client::{
    DtlsRequest, JoinRequest, PauseRequest, PublishRequest, SenderRequest, SubscribeRequest,
};
use crate::protocol::media::{
    CloseParams, CodecsResult, DtlsParams, MediaMethod, NoParams, PublishParams, PublishResult,
    SenderParams, SubscribeParams, SubscribeResult, TransportParams, TransportResult,
};
use crate::protocol::{
    ClientEvent, ClientRequest, ConnectParams, Notification, PeerEnvelope, PeerEvent, PeerJoin,
    PeerPublish, Response, TransportRole,
};

use super::messages::{ParticipantEvent, PeerScope};
use super::registry::GroupRegistryHandle;

use futures::future::join_all;
use serde::de::IgnoredAny;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Shared services a participant talks to.
#[derive(Clone)]
pub struct ParticipantContext {
    pub bus: Arc<dyn MessageBus>,
    pub media: MediaRpcClient,
    pub registry: GroupRegistryHandle,
}

/// Transports a participant holds on its media node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    NoRole,
    Publisher { transport_id: String },
    Subscriber { transport_id: String },
    Both { pub_id: String, sub_id: String },
}

impl Role {
    fn from_transports(pub_id: Option<String>, sub_id: Option<String>) -> Self {
        match (pub_id, sub_id) {
            (None, None) => Role::NoRole,
            (Some(transport_id), None) => Role::Publisher { transport_id },
            (None, Some(transport_id)) => Role::Subscriber { transport_id },
            (Some(pub_id), Some(sub_id)) => Role::Both { pub_id, sub_id },
        }
    }

    pub fn pub_transport(&self) -> Option<&str> {
        match self {
            Role::Publisher { transport_id } => Some(transport_id),
            Role::Both { pub_id, .. } => Some(pub_id),
            Role::NoRole | Role::Subscriber { .. } => None,
        }
    }

    pub fn sub_transport(&self) -> Option<&str> {
        match self {
            Role::Subscriber { transport_id } => Some(transport_id),
            Role::Both { sub_id, .. } => Some(sub_id),
            Role::NoRole | Role::Publisher { .. } => None,
        }
    }

    pub fn is_publisher(&self) -> bool {
        self.pub_transport().is_some()
    }

    pub fn is_subscriber(&self) -> bool {
        self.sub_transport().is_some()
    }

    pub fn owns(&self, transport_id: &str) -> bool {
        self.pub_transport() == Some(transport_id) || self.sub_transport() == Some(transport_id)
    }

    /// Every held transport with its direction.
    pub fn transports(&self) -> Vec<(TransportRole, String)> {
        let mut held = Vec::with_capacity(2);
        if let Some(id) = self.pub_transport() {
            held.push((TransportRole::Pub, id.to_string()));
        }
        if let Some(id) = self.sub_transport() {
            held.push((TransportRole::Sub, id.to_string()));
        }
        held
    }
}

/// A sender created by this participant's `publish`.
#[derive(Debug, Clone)]
struct SenderRecord {
    transport_id: String,
    sender_id: String,
    metadata: Value,
}

#[derive(Debug)]
struct JoinedState {
    role: Role,
    senders: Vec<SenderRecord>,
    /// Peers whose `join` was already passed to the client.
    announced: HashSet<String>,
}

#[derive(Debug)]
enum Phase {
    Unjoined,
    Joined(JoinedState),
    Closed,
}

/// Result of a successfully handled client request.
struct Handled {
    params: Value,
    broadcast: Option<PeerEvent>,
}

impl Handled {
    fn ack() -> Self {
        Self::with(Value::Object(Map::new()))
    }

    fn with(params: Value) -> Self {
        Self {
            params,
            broadcast: None,
        }
    }

    fn broadcast(mut self, event: PeerEvent) -> Self {
        self.broadcast = Some(event);
        self
    }
}

/// The `Participant` implementation.
pub struct Participant {
    participant_id: String,
    identity: ConnectParams,
    ctx: ParticipantContext,
    inbound_tx: mpsc::Sender<ParticipantEvent>,
    inbound_rx: mpsc::Receiver<ParticipantEvent>,
    outbound: mpsc::Sender<String>,
    cancel_token: CancellationToken,
    /// First assigned media node; reused for the connection lifetime.
    assigned_node: Option<MediaNode>,
    phase: Phase,
    forwarder_token: CancellationToken,
    forwarders: Vec<JoinHandle<()>>,
}

impl Participant {
    /// Create a participant (not started).
    ///
    /// Returns the participant and the sender side of its inbound queue, to
    /// be handed to the connection read loop.
    pub fn new(
        identity: ConnectParams,
        ctx: ParticipantContext,
        outbound: mpsc::Sender<String>,
        cancel_token: CancellationToken,
        inbound_capacity: usize,
    ) -> (Self, mpsc::Sender<ParticipantEvent>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_capacity);
        let forwarder_token = cancel_token.child_token();

        let participant = Self {
            participant_id: Uuid::new_v4().to_string(),
            identity,
            ctx,
            inbound_tx: inbound_tx.clone(),
            inbound_rx,
            outbound,
            cancel_token,
            assigned_node: None,
            phase: Phase::Unjoined,
            forwarder_token,
            forwarders: Vec::new(),
        };
        (participant, inbound_tx)
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Run the process loop until disconnect or cancellation, then clean up.
    #[instrument(
        skip_all,
        name = "signal.actor.participant",
        fields(
            participant_id = %self.participant_id,
            session_id = %self.identity.session_id,
            token_id = %self.identity.token_id
        )
    )]
    pub async fn run(mut self) {
        debug!(target: "signal.actor.participant", "Participant started");

        let reason = loop {
            tokio::select! {
                biased;

                event = self.inbound_rx.recv() => match event {
                    Some(ParticipantEvent::Client(text)) => self.handle_client_message(&text).await,
                    Some(ParticipantEvent::Peer { scope, payload }) => {
                        self.handle_peer_message(scope, &payload).await;
                    }
                    Some(ParticipantEvent::Disconnected { reason }) => break reason,
                    None => break "inbound closed",
                },

                () = self.cancel_token.cancelled() => break "cancelled",
            }
        };

        self.disconnect(reason).await;
    }

    // ------------------------------------------------------------------
    // Client requests
    // ------------------------------------------------------------------

    async fn handle_client_message(&mut self, text: &str) {
        let request = match ClientRequest::decode(text) {
            Ok(request) => request,
            Err(e) => {
                debug!(
                    target: "signal.actor.participant",
                    error = %e,
                    "Rejected malformed client message"
                );
                metrics::record_client_request("invalid", "error");
                let id = e.request_id();
                let err = SignalError::from(e);
                self.send_client(&Response::error(id, err.error_code(), err.client_message()))
                    .await;
                return;
            }
        };

        let id = request.id;
        let event = request.event.name();
        match self.handle_request(request.event).await {
            Ok(handled) => {
                metrics::record_client_request(event, "success");
                self.send_client(&Response::ok(id, handled.params)).await;
                if let Some(fanout) = handled.broadcast {
                    self.broadcast(fanout).await;
                }
            }
            Err(e) => {
                metrics::record_client_request(event, "error");
                debug!(
                    target: "signal.actor.participant",
                    event,
                    error = %e,
                    "Client request failed"
                );
                self.send_client(&Response::error(Some(id), e.error_code(), e.client_message()))
                    .await;
            }
        }
    }

    async fn handle_request(&mut self, event: ClientEvent) -> Result<Handled, SignalError> {
        match event {
            ClientEvent::Join(req) => self.join(req).await,
            ClientEvent::Dtls(req) => self.dtls(req).await,
            ClientEvent::Publish(req) => self.publish(req).await,
            ClientEvent::Unpublish(req) => self.unpublish(req).await,
            ClientEvent::Subscribe(req) => self.subscribe(req).await,
            ClientEvent::Unsubscribe(req) => self.unsubscribe(req).await,
            ClientEvent::Pause(req) => self.pause_or_resume(req, MediaMethod::Pause).await,
            ClientEvent::Resume(req) => self.pause_or_resume(req, MediaMethod::Resume).await,
        }
    }

    async fn join(&mut self, req: JoinRequest) -> Result<Handled, SignalError> {
        if !matches!(self.phase, Phase::Unjoined) {
            return Err(SignalError::AlreadyJoined);
        }

        let node = self.ensure_node(req.node_id).await?;
        let codecs: CodecsResult = self
            .ctx
            .media
            .call(&node.id, MediaMethod::Codecs, &NoParams {})
            .await?;

        let mut params = Map::new();
        params.insert("codecs".to_string(), codecs.codecs);

        let mut requested = Vec::with_capacity(2);
        if req.publish {
            requested.push(TransportRole::Pub);
        }
        if req.subscribe {
            requested.push(TransportRole::Sub);
        }

        let mut created: Vec<(TransportRole, String)> = Vec::with_capacity(2);
        for role in requested {
            let transport_id = Uuid::new_v4().to_string();
            let result: Result<TransportResult, SignalError> = self
                .ctx
                .media
                .call(
                    &node.id,
                    MediaMethod::Transport,
                    &TransportParams {
                        transport_id: &transport_id,
                        role,
                    },
                )
                .await;
            match result {
                Ok(transport) => {
                    params.insert(role.as_str().to_string(), transport.transport_parameters);
                    created.push((role, transport_id));
                }
                Err(e) => {
                    self.close_transports(&node.id, &created).await;
                    return Err(e);
                }
            }
        }

        if let Err(e) = self.open_subscriptions().await {
            self.close_transports(&node.id, &created).await;
            return Err(e);
        }

        let mut pub_id = None;
        let mut sub_id = None;
        for (role, transport_id) in created {
            match role {
                TransportRole::Pub => pub_id = Some(transport_id),
                TransportRole::Sub => sub_id = Some(transport_id),
            }
        }
        let role = Role::from_transports(pub_id, sub_id);
        let announce = self.own_join(&role);

        info!(
            target: "signal.actor.participant",
            node_id = %node.id,
            publish = role.is_publisher(),
            subscribe = role.is_subscriber(),
            "Participant joined"
        );

        self.phase = Phase::Joined(JoinedState {
            role,
            senders: Vec::new(),
            announced: HashSet::new(),
        });

        Ok(Handled::with(Value::Object(params)).broadcast(PeerEvent::Join(announce)))
    }

    async fn dtls(&mut self, req: DtlsRequest) -> Result<Handled, SignalError> {
        let (node, joined) = self.joined()?;
        require_owned(&joined.role, &req.transport_id)?;

        let _: IgnoredAny = self
            .ctx
            .media
            .call(
                &node.id,
                MediaMethod::Dtls,
                &DtlsParams {
                    transport_id: &req.transport_id,
                    dtls_parameters: &req.dtls_parameters,
                },
            )
            .await?;
        Ok(Handled::ack())
    }

    async fn publish(&mut self, req: PublishRequest) -> Result<Handled, SignalError> {
        let (node, joined) = self.joined()?;
        let pub_transport = joined
            .role
            .pub_transport()
            .ok_or(SignalError::RoleNotHeld(TransportRole::Pub))?;
        if pub_transport != req.transport_id {
            return Err(SignalError::UnknownTransport(req.transport_id));
        }

        let result: PublishResult = self
            .ctx
            .media
            .call(
                &node.id,
                MediaMethod::Publish,
                &PublishParams {
                    transport_id: &req.transport_id,
                    codec: &req.codec,
                    metadata: &req.metadata,
                },
            )
            .await?;

        if let Phase::Joined(joined) = &mut self.phase {
            joined.senders.push(SenderRecord {
                transport_id: req.transport_id.clone(),
                sender_id: result.sender_id.clone(),
                metadata: req.metadata.clone(),
            });
        }

        Ok(
            Handled::with(json!({ "senderId": result.sender_id })).broadcast(PeerEvent::Publish(
                PeerPublish {
                    node,
                    transport_id: req.transport_id,
                    sender_id: result.sender_id,
                    metadata: req.metadata,
                },
            )),
        )
    }

    async fn unpublish(&mut self, req: SenderRequest) -> Result<Handled, SignalError> {
        let (node, joined) = self.joined()?;
        require_owned(&joined.role, &req.transport_id)?;

        self.sender_call(&node.id, MediaMethod::Unpublish, &req.transport_id, &req.sender_id)
            .await?;

        if let Phase::Joined(joined) = &mut self.phase {
            joined.senders.retain(|s| s.sender_id != req.sender_id);
        }

        Ok(Handled::ack().broadcast(PeerEvent::Unpublish {
            sender_id: req.sender_id,
        }))
    }

    async fn subscribe(&mut self, req: SubscribeRequest) -> Result<Handled, SignalError> {
        let (node, joined) = self.joined()?;
        let sub_transport = joined
            .role
            .sub_transport()
            .ok_or(SignalError::RoleNotHeld(TransportRole::Sub))?
            .to_string();

        let result: SubscribeResult = self
            .ctx
            .media
            .call(
                &node.id,
                MediaMethod::Subscribe,
                &SubscribeParams {
                    transport_id: &sub_transport,
                    sender_id: &req.sender_id,
                    remote_transport_id: &req.transport_id,
                    remote_node: &req.node,
                },
            )
            .await?;

        Ok(Handled::with(json!({
            "codec": result.codec,
            "receiverId": result.receiver_id,
            "senderId": req.sender_id,
        })))
    }

    async fn unsubscribe(&mut self, req: SenderRequest) -> Result<Handled, SignalError> {
        let (node, joined) = self.joined()?;
        require_owned(&joined.role, &req.transport_id)?;

        self.sender_call(&node.id, MediaMethod::Unsubscribe, &req.transport_id, &req.sender_id)
            .await?;
        Ok(Handled::ack())
    }

    async fn pause_or_resume(
        &mut self,
        req: PauseRequest,
        method: MediaMethod,
    ) -> Result<Handled, SignalError> {
        let (node, joined) = self.joined()?;
        require_owned(&joined.role, &req.transport_id)?;

        self.sender_call(&node.id, method, &req.transport_id, &req.sender_id)
            .await?;

        let handled = Handled::ack();
        if req.role != TransportRole::Pub {
            return Ok(handled);
        }
        let sender_id = req.sender_id;
        let event = if method == MediaMethod::Pause {
            PeerEvent::Pause { sender_id }
        } else {
            PeerEvent::Resume { sender_id }
        };
        Ok(handled.broadcast(event))
    }

    async fn sender_call(
        &self,
        node_id: &str,
        method: MediaMethod,
        transport_id: &str,
        sender_id: &str,
    ) -> Result<(), SignalError> {
        let _: IgnoredAny = self
            .ctx
            .media
            .call(
                node_id,
                method,
                &SenderParams {
                    transport_id,
                    sender_id,
                },
            )
            .await?;
        Ok(())
    }

    /// Assigned node and joined state, or `NotJoined`.
    fn joined(&self) -> Result<(MediaNode, &JoinedState), SignalError> {
        match (&self.phase, &self.assigned_node) {
            (Phase::Joined(joined), Some(node)) => Ok((node.clone(), joined)),
            _ => Err(SignalError::NotJoined),
        }
    }

    async fn ensure_node(&mut self, preferred: Option<String>) -> Result<MediaNode, SignalError> {
        if let Some(node) = &self.assigned_node {
            return Ok(node.clone());
        }

        let node = self
            .ctx
            .registry
            .pick_node(preferred)
            .await?
            .ok_or(SignalError::NoMediaNode)?;

        debug!(
            target: "signal.actor.participant",
            node_id = %node.id,
            "Assigned media node"
        );
        self.assigned_node = Some(node.clone());
        Ok(node)
    }

    async fn close_transports(&self, node_id: &str, transports: &[(TransportRole, String)]) {
        let calls = transports.iter().map(|(role, transport_id)| async move {
            let result: Result<IgnoredAny, SignalError> = self
                .ctx
                .media
                .call(
                    node_id,
                    MediaMethod::Close,
                    &CloseParams {
                        transport_id,
                        role: *role,
                    },
                )
                .await;
            (role, result)
        });

        for (role, result) in join_all(calls).await {
            if let Err(e) = result {
                warn!(
                    target: "signal.actor.participant",
                    node_id = %node_id,
                    role = %role,
                    error = %e,
                    "Failed to close transport"
                );
            }
        }
    }

    fn own_join(&self, role: &Role) -> PeerJoin {
        PeerJoin {
            metadata: self.identity.metadata.clone(),
            publish: role.is_publisher(),
            subscribe: role.is_subscriber(),
        }
    }

    // ------------------------------------------------------------------
    // Session fan-out
    // ------------------------------------------------------------------

    async fn open_subscriptions(&mut self) -> Result<(), SignalError> {
        let session_id = &self.identity.session_id;
        let direct = self
            .ctx
            .bus
            .subscribe(&topics::participant_topic(session_id, &self.identity.token_id))
            .await?;
        let session = self
            .ctx
            .bus
            .subscribe(&topics::session_broadcast_topic(session_id))
            .await?;

        for (subscription, scope) in [(direct, PeerScope::Direct), (session, PeerScope::Session)] {
            self.forwarders.push(tokio::spawn(forward_subscription(
                subscription,
                scope,
                self.inbound_tx.clone(),
                self.forwarder_token.clone(),
            )));
        }
        Ok(())
    }

    async fn release_subscriptions(&mut self) {
        self.forwarder_token.cancel();
        for forwarder in self.forwarders.drain(..) {
            let _ = forwarder.await;
        }
    }

    async fn handle_peer_message(&mut self, scope: PeerScope, payload: &[u8]) {
        if !matches!(self.phase, Phase::Joined(_)) {
            return;
        }

        let envelope = match PeerEnvelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    target: "signal.actor.participant",
                    error = %e,
                    "Dropped undecodable fan-out message"
                );
                return;
            }
        };

        if scope == PeerScope::Session && envelope.token_id == self.identity.token_id {
            return;
        }

        let from = envelope.token_id;
        match envelope.event {
            PeerEvent::Join(peer) => {
                // Simultaneous joins announce each other twice: broadcast and reply
                let first = match &mut self.phase {
                    Phase::Joined(joined) => joined.announced.insert(from.clone()),
                    _ => false,
                };
                if !first {
                    debug!(
                        target: "signal.actor.participant",
                        peer_token_id = %from,
                        "Dropped repeated join announcement"
                    );
                    return;
                }

                self.notify(
                    "join",
                    json!({ "tokenId": from, "metadata": peer.metadata }),
                )
                .await;

                let Phase::Joined(joined) = &self.phase else {
                    return;
                };
                let mut replies = Vec::new();
                if scope == PeerScope::Session {
                    replies.push(PeerEvent::Join(self.own_join(&joined.role)));
                }
                if joined.role.is_publisher() && peer.subscribe {
                    if let Some(node) = &self.assigned_node {
                        for sender in &joined.senders {
                            replies.push(PeerEvent::Publish(PeerPublish {
                                node: node.clone(),
                                transport_id: sender.transport_id.clone(),
                                sender_id: sender.sender_id.clone(),
                                metadata: sender.metadata.clone(),
                            }));
                        }
                    }
                }
                for reply in replies {
                    self.send_direct(&from, reply).await;
                }
            }
            PeerEvent::Leave => {
                if let Phase::Joined(joined) = &mut self.phase {
                    joined.announced.remove(&from);
                }
                self.notify("leave", json!({ "tokenId": from })).await;
            }
            PeerEvent::Publish(publish) => {
                self.notify(
                    "publish",
                    json!({
                        "node": publish.node,
                        "transportId": publish.transport_id,
                        "senderId": publish.sender_id,
                        "metadata": publish.metadata,
                        "tokenId": from,
                    }),
                )
                .await;
            }
            PeerEvent::Unpublish { sender_id } => {
                self.notify("unpublish", json!({ "senderId": sender_id, "tokenId": from }))
                    .await;
            }
            PeerEvent::Pause { sender_id } => {
                self.notify("pause", json!({ "senderId": sender_id, "tokenId": from }))
                    .await;
            }
            PeerEvent::Resume { sender_id } => {
                self.notify("resume", json!({ "senderId": sender_id, "tokenId": from }))
                    .await;
            }
        }
    }

    async fn broadcast(&self, event: PeerEvent) {
        let subject = topics::session_broadcast_topic(&self.identity.session_id);
        self.publish_peer(&subject, event).await;
    }

    async fn send_direct(&self, token_id: &str, event: PeerEvent) {
        let subject = topics::participant_topic(&self.identity.session_id, token_id);
        self.publish_peer(&subject, event).await;
    }

    async fn publish_peer(&self, subject: &str, event: PeerEvent) {
        let method = event.method();
        let payload = match PeerEnvelope::new(self.identity.token_id.clone(), event).encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    target: "signal.actor.participant",
                    method,
                    error = %e,
                    "Failed to encode fan-out message"
                );
                return;
            }
        };
        if let Err(e) = self.ctx.bus.publish(subject, payload).await {
            warn!(
                target: "signal.actor.participant",
                method,
                error = %e,
                "Failed to publish fan-out message"
            );
        }
    }

    // ------------------------------------------------------------------
    // Client output
    // ------------------------------------------------------------------

    async fn notify(&self, event: &str, data: Value) {
        self.send_client(&Notification::new(event, data)).await;
    }

    async fn send_client<T: Serialize>(&self, message: &T) {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    target: "signal.actor.participant",
                    error = %e,
                    "Failed to encode client message"
                );
                return;
            }
        };
        if self.outbound.send(text).await.is_err() {
            debug!(
                target: "signal.actor.participant",
                "Outbound queue closed, dropping client message"
            );
        }
    }

    // ------------------------------------------------------------------
    // Disconnect
    // ------------------------------------------------------------------

    async fn disconnect(&mut self, reason: &'static str) {
        let previous = std::mem::replace(&mut self.phase, Phase::Closed);
        if matches!(previous, Phase::Closed) {
            return;
        }

        self.release_subscriptions().await;

        if let Phase::Joined(joined) = previous {
            self.broadcast(PeerEvent::Leave).await;
            if let Some(node) = &self.assigned_node {
                self.close_transports(&node.id, &joined.role.transports())
                    .await;
            }
        }

        self.cancel_token.cancel();

        if let Err(e) = self
            .ctx
            .registry
            .unregister(self.participant_id.clone())
            .await
        {
            debug!(
                target: "signal.actor.participant",
                error = %e,
                "Registry unavailable during unregister"
            );
        }

        info!(
            target: "signal.actor.participant",
            reason,
            "Participant disconnected"
        );
    }
}

fn require_owned(role: &Role, transport_id: &str) -> Result<(), SignalError> {
    if role.owns(transport_id) {
        Ok(())
    } else {
        Err(SignalError::UnknownTransport(transport_id.to_string()))
    }
}

/// Drain one bus subscription into the participant's inbound queue.
///
/// Dropping the subscription on exit releases it on the bus.
async fn forward_subscription(
    mut subscription: Subscription,
    scope: PeerScope,
    inbound: mpsc::Sender<ParticipantEvent>,
    cancel_token: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            () = cancel_token.cancelled() => break,
            message = subscription.next() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let event = ParticipantEvent::Peer {
            scope,
            payload: message.payload,
        };
        tokio::select! {
            biased;
            () = cancel_token.cancelled() => break,
            sent = inbound.send(event) => if sent.is_err() { break },
        }
    }

    debug!(
        target: "signal.actor.participant",
        subject = %subscription.subject(),
        "Subscription released"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use bytes::Bytes;
    use std::collections::BTreeMap;
    use std::time::Duration;

    #[test]
    fn test_role_from_transports() {
        assert_eq!(Role::from_transports(None, None), Role::NoRole);

        let both = Role::from_transports(Some("p".to_string()), Some("s".to_string()));
        assert!(both.is_publisher());
        assert!(both.is_subscriber());
        assert!(both.owns("p"));
        assert!(both.owns("s"));
        assert!(!both.owns("x"));
        assert_eq!(
            both.transports(),
            vec![
                (TransportRole::Pub, "p".to_string()),
                (TransportRole::Sub, "s".to_string())
            ]
        );

        let subscriber = Role::from_transports(None, Some("s".to_string()));
        assert!(!subscriber.is_publisher());
        assert_eq!(subscriber.pub_transport(), None);
        assert_eq!(subscriber.sub_transport(), Some("s"));
    }

    /// Media node answering every method with a fixed result set.
    async fn spawn_media_node(bus: &MemoryBus, node_id: &str) {
        let mut sub = bus
            .subscribe(&topics::media_node_topic(node_id))
            .await
            .unwrap();
        let bus = bus.clone();
        tokio::spawn(async move {
            while let Some(msg) = sub.next().await {
                let request: Value = serde_json::from_slice(&msg.payload).unwrap();
                let data = match request["method"].as_str().unwrap() {
                    "codecs" => json!({"codecs": ["opus"]}),
                    "transport" => json!({"transportParameters": {"ice": "x"}}),
                    "publish" => json!({"senderId": "snd-1"}),
                    _ => json!({}),
                };
                let reply = json!({"method": "response", "data": data});
                bus.publish(&msg.reply.unwrap(), Bytes::from(reply.to_string()))
                    .await
                    .unwrap();
            }
        });
    }

    struct Harness {
        bus: MemoryBus,
        registry: GroupRegistryHandle,
        inbound: mpsc::Sender<ParticipantEvent>,
        outbound: mpsc::Receiver<String>,
        task: JoinHandle<()>,
    }

    impl Harness {
        async fn start(bus: MemoryBus, registry: GroupRegistryHandle) -> Self {
            let ctx = ParticipantContext {
                bus: Arc::new(bus.clone()),
                media: MediaRpcClient::new(Arc::new(bus.clone()), Duration::from_secs(5)),
                registry: registry.clone(),
            };
            let identity = ConnectParams {
                session_id: "s1".to_string(),
                token_id: "alice".to_string(),
                metadata: BTreeMap::new(),
            };
            let (outbound_tx, outbound) = mpsc::channel(16);
            let (participant, inbound) =
                Participant::new(identity, ctx, outbound_tx, registry.child_token(), 16);
            let task = tokio::spawn(participant.run());
            Self {
                bus,
                registry,
                inbound,
                outbound,
                task,
            }
        }

        async fn request(&mut self, id: i64, event: &str, data: Value) -> Value {
            let text = json!({"id": id, "method": "request", "params": {"event": event, "data": data}})
                .to_string();
            self.inbound
                .send(ParticipantEvent::Client(text))
                .await
                .unwrap();
            let reply = self.outbound.recv().await.unwrap();
            serde_json::from_str(&reply).unwrap()
        }
    }

    async fn registry_with_node(bus: &MemoryBus) -> GroupRegistryHandle {
        let (registry, _task) =
            GroupRegistryHandle::spawn(Duration::from_secs(3600), CancellationToken::new());
        spawn_media_node(bus, "n1").await;
        registry.record_heartbeat(MediaNode::new("n1")).await.unwrap();
        registry
    }

    #[tokio::test]
    async fn test_request_before_join_is_invalid_state() {
        let bus = MemoryBus::new();
        let registry = registry_with_node(&bus).await;
        let mut harness = Harness::start(bus, registry).await;

        let reply = harness
            .request(1, "dtls", json!({"transportId": "t", "dtlsParameters": {}}))
            .await;
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["error"]["code"], 2);
    }

    #[tokio::test]
    async fn test_join_without_media_node() {
        let bus = MemoryBus::new();
        let (registry, _task) =
            GroupRegistryHandle::spawn(Duration::from_secs(3600), CancellationToken::new());
        let mut harness = Harness::start(bus.clone(), registry).await;

        let reply = harness.request(1, "join", json!({"pub": true})).await;
        assert_eq!(reply["error"]["code"], 7);
        assert_eq!(reply["error"]["message"], "No media node available");
        // Still unjoined: no subscriptions were opened
        assert_eq!(bus.subscriber_count("signal.s1.@"), 0);
    }

    #[tokio::test]
    async fn test_join_then_duplicate_join() {
        let bus = MemoryBus::new();
        let registry = registry_with_node(&bus).await;
        let mut harness = Harness::start(bus, registry).await;

        let reply = harness
            .request(1, "join", json!({"pub": true, "sub": true}))
            .await;
        assert_eq!(reply["params"]["codecs"], json!(["opus"]));
        assert_eq!(reply["params"]["pub"], json!({"ice": "x"}));
        assert_eq!(reply["params"]["sub"], json!({"ice": "x"}));
        assert_eq!(harness.bus.subscriber_count("signal.s1.@"), 1);
        assert_eq!(harness.bus.subscriber_count("signal.s1.alice"), 1);

        let reply = harness.request(2, "join", json!({"pub": true})).await;
        assert_eq!(reply["error"]["code"], 2);
    }

    #[tokio::test]
    async fn test_role_and_transport_checks() {
        let bus = MemoryBus::new();
        let registry = registry_with_node(&bus).await;
        let mut harness = Harness::start(bus, registry).await;

        harness.request(1, "join", json!({"sub": true})).await;

        let reply = harness
            .request(
                2,
                "publish",
                json!({"transportId": "t", "codec": {}, "metadata": {}}),
            )
            .await;
        assert_eq!(reply["error"]["code"], 3);

        let reply = harness
            .request(
                3,
                "unsubscribe",
                json!({"transportId": "not-mine", "senderId": "s"}),
            )
            .await;
        assert_eq!(reply["error"]["code"], 4);
    }

    #[tokio::test]
    async fn test_malformed_message_gets_error_response() {
        let bus = MemoryBus::new();
        let registry = registry_with_node(&bus).await;
        let mut harness = Harness::start(bus, registry).await;

        harness
            .inbound
            .send(ParticipantEvent::Client("{oops".to_string()))
            .await
            .unwrap();
        let reply: Value = serde_json::from_str(&harness.outbound.recv().await.unwrap()).unwrap();
        assert_eq!(reply["id"], Value::Null);
        assert_eq!(reply["error"]["code"], 1);
    }

    #[tokio::test]
    async fn test_repeated_join_from_same_peer_is_announced_once() {
        let bus = MemoryBus::new();
        let registry = registry_with_node(&bus).await;
        let mut harness = Harness::start(bus, registry).await;
        harness.request(1, "join", json!({"sub": true})).await;

        let bob_join = PeerEnvelope::new(
            "bob",
            PeerEvent::Join(PeerJoin {
                metadata: BTreeMap::new(),
                publish: true,
                subscribe: false,
            }),
        )
        .encode()
        .unwrap();
        let bob_leave = PeerEnvelope::new("bob", PeerEvent::Leave).encode().unwrap();

        harness.bus.publish("signal.s1.@", bob_join.clone()).await.unwrap();
        let first: Value = serde_json::from_str(&harness.outbound.recv().await.unwrap()).unwrap();
        assert_eq!(first["params"]["event"], "join");
        assert_eq!(first["params"]["data"]["tokenId"], "bob");

        // Same peer again over the direct subject, then a leave on that subject
        harness.bus.publish("signal.s1.alice", bob_join.clone()).await.unwrap();
        harness.bus.publish("signal.s1.alice", bob_leave).await.unwrap();
        let next: Value = serde_json::from_str(&harness.outbound.recv().await.unwrap()).unwrap();
        assert_eq!(next["params"]["event"], "leave");

        // After leaving, a new join is announced again
        harness.bus.publish("signal.s1.@", bob_join).await.unwrap();
        let again: Value = serde_json::from_str(&harness.outbound.recv().await.unwrap()).unwrap();
        assert_eq!(again["params"]["event"], "join");
        assert_eq!(again["params"]["data"]["tokenId"], "bob");
    }

    #[tokio::test]
    async fn test_disconnect_releases_subscriptions_and_unregisters() {
        let bus = MemoryBus::new();
        let registry = registry_with_node(&bus).await;
        let mut harness = Harness::start(bus, registry).await;
        harness.request(1, "join", json!({"pub": true})).await;

        let mut spy = harness.bus.subscribe("signal.s1.@").await.unwrap();

        harness
            .inbound
            .send(ParticipantEvent::Disconnected {
                reason: "client closed",
            })
            .await
            .unwrap();
        harness.task.await.unwrap();

        let leave = PeerEnvelope::decode(&spy.next().await.unwrap().payload).unwrap();
        assert_eq!(leave.token_id, "alice");
        assert_eq!(leave.event, PeerEvent::Leave);

        assert_eq!(harness.bus.subscriber_count("signal.s1.alice"), 0);
        // Only the spy remains on the session subject
        assert_eq!(harness.bus.subscriber_count("signal.s1.@"), 1);
        assert_eq!(
            harness.registry.get_status().await.unwrap().participant_count,
            0
        );
    }
}
