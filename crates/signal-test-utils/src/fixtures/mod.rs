//! Pre-configured fixtures for signal server tests.
//!
//! Provides:
//! - connect params encoding for upgrade URLs
//! - heartbeat payloads
//! - `TestServer`, the full gateway on an ephemeral port over a `MemoryBus`

use crate::client::TestClient;
use bytes::Bytes;
use signal_server::actors::GroupRegistryHandle;
use signal_server::bus::MemoryBus;
use signal_server::media::MediaNode;
use signal_server::protocol::ConnectParams;
use signal_server::server::{start_services, ServiceSettings};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Encode the `params` query value for a participant.
#[must_use]
pub fn encode_connect_params(session_id: &str, token_id: &str, metadata: &[(&str, &str)]) -> String {
    ConnectParams {
        session_id: session_id.to_string(),
        token_id: token_id.to_string(),
        metadata: metadata
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect::<BTreeMap<_, _>>(),
    }
    .encode()
    .expect("connect params encode")
}

/// Heartbeat payload for a node with only its id set.
#[must_use]
pub fn heartbeat_payload(node_id: &str) -> Bytes {
    Bytes::from(serde_json::to_vec(&MediaNode::new(node_id)).expect("heartbeat encode"))
}

/// Signal server running in-process on `127.0.0.1:0`.
pub struct TestServer {
    addr: SocketAddr,
    bus: MemoryBus,
    registry: GroupRegistryHandle,
    cancel_token: CancellationToken,
}

impl TestServer {
    /// Start with default settings and a sweep interval of one hour, so node
    /// liveness never changes during a test unless the test drives it.
    pub async fn start() -> Self {
        Self::start_with(ServiceSettings {
            node_sweep_interval: Duration::from_secs(3600),
            media_rpc_timeout: Duration::from_secs(2),
            ..ServiceSettings::default()
        })
        .await
    }

    pub async fn start_with(settings: ServiceSettings) -> Self {
        Self::spawn(settings).await.expect("spawn test server")
    }

    /// Boot the services and serve the gateway on an ephemeral port.
    ///
    /// # Errors
    ///
    /// * `Err(anyhow::Error)` - If the services fail to start or the listener
    ///   cannot bind
    pub async fn spawn(settings: ServiceSettings) -> Result<Self, anyhow::Error> {
        let bus = MemoryBus::new();
        let cancel_token = CancellationToken::new();
        let services = start_services(Arc::new(bus.clone()), settings, cancel_token.child_token())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to start signal services: {e}"))?;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {e}"))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {e}"))?;

        let router = services.router.clone();
        let shutdown = cancel_token.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
        });

        Ok(Self {
            addr,
            bus,
            registry: services.registry,
            cancel_token,
        })
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The bus the server runs on; mocks and spies attach here.
    #[must_use]
    pub fn bus(&self) -> &MemoryBus {
        &self.bus
    }

    #[must_use]
    pub fn registry(&self) -> &GroupRegistryHandle {
        &self.registry
    }

    /// Upgrade URL for a participant.
    #[must_use]
    pub fn url(&self, session_id: &str, token_id: &str) -> String {
        format!(
            "ws://{}/?params={}",
            self.addr,
            encode_connect_params(session_id, token_id, &[])
        )
    }

    /// Connect a participant without metadata.
    pub async fn connect(&self, session_id: &str, token_id: &str) -> TestClient {
        TestClient::connect(&self.url(session_id, token_id)).await
    }

    /// Connect a participant with metadata.
    pub async fn connect_with_metadata(
        &self,
        session_id: &str,
        token_id: &str,
        metadata: &[(&str, &str)],
    ) -> TestClient {
        let url = format!(
            "ws://{}/?params={}",
            self.addr,
            encode_connect_params(session_id, token_id, metadata)
        );
        TestClient::connect(&url).await
    }

    /// Wait until the registry reports `count` alive media nodes.
    pub async fn wait_for_alive_nodes(&self, count: usize) {
        self.wait_for_status(|status| status.alive_node_count == count)
            .await;
    }

    /// Wait until the registry reports `count` participants.
    pub async fn wait_for_participants(&self, count: usize) {
        self.wait_for_status(|status| status.participant_count == count)
            .await;
    }

    async fn wait_for_status(
        &self,
        condition: impl Fn(&signal_server::actors::RegistryStatus) -> bool,
    ) {
        let mut last = None;
        for _ in 0..500 {
            let status = self.registry.get_status().await.expect("registry status");
            if condition(&status) {
                return;
            }
            last = Some(status);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("registry never reached the expected status, last: {last:?}");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
