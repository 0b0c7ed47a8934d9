//! Connection gateway.
//!
//! Accepts WebSocket upgrades on `/` and `/ws`. The participant identity is
//! carried by the `params` query parameter (see [`ConnectParams`]); a request
//! whose identity cannot be decoded is rejected with 400 before upgrading.

use crate::actors::{serve_participant, ConnectionSettings, ParticipantContext};
use crate::observability::metrics;
use crate::protocol::ConnectParams;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Gateway state shared across upgrade requests.
#[derive(Clone)]
pub struct GatewayState {
    pub ctx: ParticipantContext,
    pub settings: ConnectionSettings,
}

/// Build the signaling router.
pub fn signal_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/", get(upgrade))
        .route("/ws", get(upgrade))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn upgrade(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<HashMap<String, String>>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let raw = query.get("params").map(String::as_str).unwrap_or_default();
    let identity = match ConnectParams::decode(raw) {
        Ok(identity) => identity,
        Err(e) => {
            debug!(target: "signal.gateway", error = %e, "Rejected upgrade request");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let Some(ws) = ws else {
        return (StatusCode::UPGRADE_REQUIRED, "expected a WebSocket upgrade").into_response();
    };

    info!(
        target: "signal.gateway",
        session_id = %identity.session_id,
        token_id = %identity.token_id,
        "Accepted connection"
    );
    metrics::record_connection();

    let ctx = state.ctx.clone();
    let settings = state.settings.clone();
    ws.max_message_size(settings.max_message_size)
        .on_upgrade(move |socket| serve_participant(socket, identity, ctx, settings))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::GroupRegistryHandle;
    use crate::bus::MemoryBus;
    use crate::media::MediaRpcClient;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::util::ServiceExt;

    fn router() -> Router {
        let bus = Arc::new(MemoryBus::new());
        let (registry, _task) =
            GroupRegistryHandle::spawn(Duration::from_secs(10), CancellationToken::new());
        let ctx = ParticipantContext {
            bus: bus.clone(),
            media: MediaRpcClient::new(bus, Duration::from_secs(10)),
            registry,
        };
        signal_router(Arc::new(GatewayState {
            ctx,
            settings: ConnectionSettings::default(),
        }))
    }

    async fn status_for(uri: &str) -> StatusCode {
        router()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_missing_params_is_bad_request() {
        assert_eq!(status_for("/").await, StatusCode::BAD_REQUEST);
        assert_eq!(status_for("/ws").await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_undecodable_params_is_bad_request() {
        assert_eq!(status_for("/?params=not-base64!!").await, StatusCode::BAD_REQUEST);
        // base64("{}") lacks both ids
        assert_eq!(status_for("/?params=e30").await, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_valid_params_without_upgrade() {
        // {"sessionId":"s1","tokenId":"alice"}
        let params = "eyJzZXNzaW9uSWQiOiJzMSIsInRva2VuSWQiOiJhbGljZSJ9";
        assert_eq!(
            status_for(&format!("/?params={params}")).await,
            StatusCode::UPGRADE_REQUIRED
        );
    }
}
