//! Service configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Unset or unparsable numeric values fall
//! back to their defaults; only the listen address and the backend name are
//! hard errors.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Configuration could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `LISTEN_ADDR` is not a socket address.
    #[error("invalid LISTEN_ADDR: {0}")]
    InvalidListenAddr(#[from] std::net::AddrParseError),

    /// `BROKER_BACKEND` names no known transport.
    #[error("unknown BROKER_BACKEND {0:?} (expected nats, redis or memory)")]
    UnknownBackend(String),
}

/// Which pub/sub backend the broker runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerBackend {
    /// NATS core pub/sub at the given URL.
    Nats {
        /// Server URL, e.g. `nats://localhost:4222`.
        url: String,
    },
    /// Redis pub/sub at the given URL.
    Redis {
        /// Server URL, e.g. `redis://localhost:6379`.
        url: String,
    },
    /// In-process transport; only reaches listeners in this process.
    Memory,
}

impl BrokerBackend {
    /// Short backend name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Nats { .. } => "nats",
            Self::Redis { .. } => "redis",
            Self::Memory => "memory",
        }
    }
}

/// Broker and transport settings.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Selected backend.
    pub backend: BrokerBackend,

    /// Upper bound on establishing the initial backend connection.
    pub connect_timeout: Duration,

    /// Upper bound on a single health check.
    pub health_timeout: Duration,

    /// Buffered events per local listener before new events are dropped.
    pub listener_capacity: usize,

    /// Ring size of each memory-transport topic.
    pub memory_topic_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: BrokerBackend::Memory,
            connect_timeout: Duration::from_millis(2_000),
            health_timeout: Duration::from_millis(500),
            listener_capacity: 64,
            memory_topic_capacity: 1_024,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Top-level service configuration.
///
/// Loaded once at startup via [`RealtimeConfig::from_env`].
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:8080`).
    pub listen_addr: SocketAddr,

    /// Broker and transport settings.
    pub broker: BrokerConfig,

    /// Buffered outbound frames per WebSocket connection.
    pub socket_outbound_capacity: usize,

    /// Log output format.
    pub log_format: LogFormat,
}

impl RealtimeConfig {
    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidListenAddr`] if `LISTEN_ADDR` is set but
    /// is not a socket address, and [`ConfigError::UnknownBackend`] if
    /// `BROKER_BACKEND` is not one of `nats`, `redis`, `memory`.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let listen_addr: SocketAddr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()?;

        let backend_name = std::env::var("BROKER_BACKEND").unwrap_or_else(|_| "nats".to_string());
        let backend = match backend_name.to_ascii_lowercase().as_str() {
            "nats" => BrokerBackend::Nats {
                url: std::env::var("NATS_URL")
                    .unwrap_or_else(|_| "nats://localhost:4222".to_string()),
            },
            "redis" => BrokerBackend::Redis {
                url: std::env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            },
            "memory" => BrokerBackend::Memory,
            _ => return Err(ConfigError::UnknownBackend(backend_name)),
        };

        let defaults = BrokerConfig::default();
        let broker = BrokerConfig {
            backend,
            connect_timeout: Duration::from_millis(parse_env(
                "BROKER_CONNECT_TIMEOUT_MS",
                2_000,
            )),
            health_timeout: Duration::from_millis(parse_env("BROKER_HEALTH_TIMEOUT_MS", 500)),
            listener_capacity: parse_env("LISTENER_CAPACITY", defaults.listener_capacity).max(1),
            memory_topic_capacity: parse_env(
                "MEMORY_TOPIC_CAPACITY",
                defaults.memory_topic_capacity,
            )
            .max(1),
        };

        let socket_outbound_capacity = parse_env("SOCKET_OUTBOUND_CAPACITY", 32_usize).max(1);

        let log_format = if parse_env_bool("LOG_JSON", false)
            || std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"))
        {
            LogFormat::Json
        } else {
            LogFormat::Text
        };

        Ok(Self {
            listen_addr,
            broker,
            socket_outbound_capacity,
            log_format,
        })
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().as_deref() {
        Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => true,
        Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => false,
        _ => default,
    }
}
