//! Signal server configuration.
//!
//! Configuration is loaded from environment variables. Bus URLs may carry
//! credentials and are redacted in Debug output.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default WebSocket signaling bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8443";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default log level name.
pub const DEFAULT_LOG_LEVEL: &str = "debug";

/// Default media RPC timeout in seconds.
pub const DEFAULT_MEDIA_RPC_TIMEOUT_SECONDS: u64 = 10;

/// Default interval between media node liveness sweeps in seconds.
pub const DEFAULT_NODE_SWEEP_INTERVAL_SECONDS: u64 = 10;

/// Default maximum inbound WebSocket message size in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 65536;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Which message bus implementation to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    /// NATS cluster (production).
    Nats,
    /// In-process bus; only useful for single-process runs.
    Memory,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// TLS certificate settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    pub cert_path: String,
    pub key_path: String,
}

/// Signal server configuration.
#[derive(Clone)]
pub struct Config {
    /// WebSocket listener bind address (default: "0.0.0.0:8443").
    pub bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Bus implementation (default: NATS).
    pub bus: BusKind,

    /// NATS server URLs, joined into one client connection.
    pub nats_urls: Vec<String>,

    /// TLS settings, present only when `SIGNAL_TLS_ENABLED=true`.
    pub tls: Option<TlsSettings>,

    /// Log level name, one of trace/debug/info/warn/error.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Timeout applied to every media node RPC.
    pub media_rpc_timeout: Duration,

    /// Interval between node pool sweeps.
    pub node_sweep_interval: Duration,

    /// Maximum accepted client message size in bytes.
    pub max_message_size: usize,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("bus", &self.bus)
            .field("nats_urls", &"[REDACTED]")
            .field("tls", &self.tls)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("media_rpc_timeout", &self.media_rpc_timeout)
            .field("node_sweep_interval", &self.node_sweep_interval)
            .field("max_message_size", &self.max_message_size)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("SIGNAL_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("SIGNAL_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let bus = match vars.get("SIGNAL_BUS").map(|s| s.trim().to_ascii_lowercase()) {
            None => BusKind::Nats,
            Some(kind) if kind == "nats" => BusKind::Nats,
            Some(kind) if kind == "memory" => BusKind::Memory,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "SIGNAL_BUS must be 'nats' or 'memory', got '{other}'"
                )))
            }
        };

        let nats_urls: Vec<String> = vars
            .get("NATS_URLS")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        if bus == BusKind::Nats && nats_urls.is_empty() {
            return Err(ConfigError::MissingEnvVar("NATS_URLS".to_string()));
        }

        let tls_enabled = parse_bool(vars, "SIGNAL_TLS_ENABLED")?;
        let tls = if tls_enabled {
            let cert_path = vars
                .get("SIGNAL_TLS_CERT_PATH")
                .cloned()
                .ok_or_else(|| ConfigError::MissingEnvVar("SIGNAL_TLS_CERT_PATH".to_string()))?;
            let key_path = vars
                .get("SIGNAL_TLS_KEY_PATH")
                .cloned()
                .ok_or_else(|| ConfigError::MissingEnvVar("SIGNAL_TLS_KEY_PATH".to_string()))?;
            Some(TlsSettings {
                cert_path,
                key_path,
            })
        } else {
            None
        };

        // Unknown level names fall back to the default rather than failing startup
        let log_level = vars
            .get("SIGNAL_LOG_LEVEL")
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| LOG_LEVELS.contains(&s.as_str()))
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let log_format = match vars
            .get("SIGNAL_LOG_FORMAT")
            .map(|s| s.trim().to_ascii_lowercase())
        {
            Some(format) if format == "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let media_rpc_timeout_seconds = parse_positive(
            vars,
            "SIGNAL_MEDIA_RPC_TIMEOUT_SECONDS",
            DEFAULT_MEDIA_RPC_TIMEOUT_SECONDS,
        )?;

        let node_sweep_interval_seconds = parse_positive(
            vars,
            "SIGNAL_NODE_SWEEP_INTERVAL_SECONDS",
            DEFAULT_NODE_SWEEP_INTERVAL_SECONDS,
        )?;

        let max_message_size = parse_positive(
            vars,
            "SIGNAL_MAX_MESSAGE_SIZE",
            DEFAULT_MAX_MESSAGE_SIZE as u64,
        )?;
        let max_message_size = usize::try_from(max_message_size).map_err(|_| {
            ConfigError::InvalidValue("SIGNAL_MAX_MESSAGE_SIZE is out of range".to_string())
        })?;

        Ok(Config {
            bind_address,
            health_bind_address,
            bus,
            nats_urls,
            tls,
            log_level,
            log_format,
            media_rpc_timeout: Duration::from_secs(media_rpc_timeout_seconds),
            node_sweep_interval: Duration::from_secs(node_sweep_interval_seconds),
            max_message_size,
        })
    }
}

fn parse_bool(vars: &HashMap<String, String>, key: &str) -> Result<bool, ConfigError> {
    match vars.get(key).map(|s| s.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) if v == "true" || v == "1" => Ok(true),
        Some(v) if v == "false" || v == "0" || v.is_empty() => Ok(false),
        Some(v) => Err(ConfigError::InvalidValue(format!(
            "{key} must be a boolean, got '{v}'"
        ))),
    }
}

fn parse_positive(
    vars: &HashMap<String, String>,
    key: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(raw) = vars.get(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue(format!(
            "{key} must be greater than zero"
        ))),
        Ok(value) => Ok(value),
        Err(e) => Err(ConfigError::InvalidValue(format!(
            "{key} must be a positive integer: {e}"
        ))),
    }
}
