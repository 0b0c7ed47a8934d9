//! Signal Server
//!
//! WebSocket signaling server for WebRTC sessions backed by SFU media nodes.
//!
//! # Servers
//!
//! - WebSocket server for client signaling (default: 0.0.0.0:8443)
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Connect the message bus (fatal on failure)
//! 4. Start the group registry and heartbeat listener
//! 5. Start health HTTP server (liveness, readiness, metrics)
//! 6. Start the signaling server
//! 7. Wait for shutdown signal

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use signal_server::bus::{MemoryBus, MessageBus, NatsBus};
use signal_server::config::{BusKind, Config, LogFormat};
use signal_server::observability::{health_router, init_metrics_recorder};
use signal_server::server::{start_services, ServiceSettings};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration before tracing: the log level and format come from it
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        e
    })?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "signal_server={level},tower_http={level}",
            level = config.log_level
        )
        .into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    info!("Starting Signal Server");
    info!(
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        bus = ?config.bus,
        media_rpc_timeout_ms = config.media_rpc_timeout.as_millis() as u64,
        node_sweep_interval_ms = config.node_sweep_interval.as_millis() as u64,
        max_message_size = config.max_message_size,
        "Configuration loaded successfully"
    );

    // TLS is terminated by the ingress; the paths are only validated here
    if let Some(tls) = &config.tls {
        for path in [&tls.cert_path, &tls.key_path] {
            if !Path::new(path).exists() {
                error!(path = %path, "TLS file not found");
                return Err(format!("TLS file not found: {path}").into());
            }
        }
        info!(
            cert_path = %tls.cert_path,
            key_path = %tls.key_path,
            "TLS files present, expecting termination at the ingress"
        );
    }

    // Initialize Prometheus metrics recorder
    // This must happen before any metrics are recorded
    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    // Connect the message bus (MUST succeed)
    let bus: Arc<dyn MessageBus> = match config.bus {
        BusKind::Nats => {
            info!(servers = config.nats_urls.len(), "Connecting to NATS...");
            let bus = NatsBus::connect(&config.nats_urls).await.map_err(|e| {
                error!(error = %e, "Failed to connect to NATS");
                e
            })?;
            info!("NATS connection established");
            Arc::new(bus)
        }
        BusKind::Memory => {
            warn!("Using in-process bus; media nodes in other processes are unreachable");
            Arc::new(MemoryBus::new())
        }
    };

    let shutdown_token = CancellationToken::new();

    info!("Starting signal services...");
    let services = start_services(
        bus,
        ServiceSettings::from_config(&config),
        shutdown_token.child_token(),
    )
    .await
    .map_err(|e| {
        error!(error = %e, "Failed to start signal services");
        e
    })?;
    info!("Signal services started");

    // Start health HTTP server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_state = Arc::clone(&services.health);
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind listeners BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;
    info!(addr = %health_addr, "Health server bound successfully");

    let signal_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid signal bind address");
        format!("Invalid signal bind address: {e}")
    })?;
    let signal_listener = tokio::net::TcpListener::bind(signal_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %signal_addr, "Failed to bind signal server");
            format!("Failed to bind signal server to {signal_addr}: {e}")
        })?;
    info!(addr = %signal_addr, "Signal server bound successfully");

    let health_shutdown_token = shutdown_token.child_token();
    let health_server = tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server =
            axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
                health_shutdown_token.cancelled().await;
                info!("Health server shutting down");
            });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    let signal_shutdown_token = shutdown_token.child_token();
    let signal_app = services.router.clone();
    let signal_server = tokio::spawn(async move {
        info!(addr = %signal_addr, "Signal server starting");
        let server =
            axum::serve(signal_listener, signal_app).with_graceful_shutdown(async move {
                signal_shutdown_token.cancelled().await;
                info!("Signal server shutting down");
            });
        if let Err(e) = server.await {
            error!(error = %e, "Signal server failed");
        }
    });

    health_state.start_accepting();
    info!("Signal Server running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so the load balancer stops routing upgrades
    health_state.stop_accepting();

    // Cancels the registry, every participant connection and both servers
    shutdown_token.cancel();

    services.join().await;
    let _ = signal_server.await;
    let _ = health_server.await;

    info!("Signal Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
