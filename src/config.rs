//! # Client Configuration
//!
//! All options of a facade in one serde struct. Values come from defaults,
//! an optional TOML file and `CENTRIFUGO_*` environment variables, layered
//! with the `config` crate.
//!
//! ```rust
//! use centrifugo_sdk::config::{CentrifugoConfig, TransportMode};
//!
//! let config = CentrifugoConfig::default();
//! assert_eq!(config.mode, TransportMode::SyncHttp);
//! assert_eq!(config.endpoint, "http://localhost:8000");
//! assert!(!config.enable_queue);
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigurationError;
use crate::idempotency::IdempotencyConfig;
use crate::logging::LogOption;
use crate::queue::config::{QueueConfig, StoreConfig};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "CENTRIFUGO";

/// Which transport the facade talks through
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportMode {
    /// JSON over HTTP
    #[default]
    #[serde(rename = "http", alias = "API", alias = "api", alias = "HTTP")]
    SyncHttp,
    /// Protobuf over gRPC
    #[serde(rename = "grpc", alias = "GRPC", alias = "rpc")]
    SyncRpc,
}

impl TransportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SyncHttp => "SyncHTTP",
            Self::SyncRpc => "SyncRPC",
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Facade configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CentrifugoConfig {
    /// Transport to use
    pub mode: TransportMode,
    /// Server address: base URL for HTTP, `host:port` or URL for gRPC
    pub endpoint: String,
    /// Server API key, sent as `apikey <key>`
    pub api_key: Option<String>,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
    /// Connection establishment timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Route mutating operations through the offload queue
    pub enable_queue: bool,
    pub queue: QueueConfig,
    pub idempotency: IdempotencyConfig,
    pub log: LogOption,
}

impl fmt::Debug for CentrifugoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CentrifugoConfig")
            .field("mode", &self.mode)
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_ms", &self.timeout_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("enable_queue", &self.enable_queue)
            .field("queue", &self.queue)
            .field("idempotency", &self.idempotency)
            .field("log", &self.log)
            .finish()
    }
}

impl Default for CentrifugoConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::SyncHttp,
            endpoint: "http://localhost:8000".to_string(),
            api_key: None,
            timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
            enable_queue: false,
            queue: QueueConfig::default(),
            idempotency: IdempotencyConfig::default(),
            log: LogOption::default(),
        }
    }
}

impl CentrifugoConfig {
    /// HTTP configuration for the given base URL
    pub fn http(endpoint: impl Into<String>) -> Self {
        Self {
            mode: TransportMode::SyncHttp,
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// gRPC configuration for the given address
    pub fn grpc(endpoint: impl Into<String>) -> Self {
        Self {
            mode: TransportMode::SyncRpc,
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[must_use]
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.enable_queue = true;
        self.queue = queue;
        self
    }

    #[must_use]
    pub fn with_idempotency(mut self, idempotency: IdempotencyConfig) -> Self {
        self.idempotency = idempotency;
        self
    }

    #[must_use]
    pub fn with_log(mut self, log: LogOption) -> Self {
        self.log = log;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Load configuration from defaults, an optional TOML file and the
    /// environment, in increasing precedence.
    ///
    /// Nested keys use `__` in variable names, e.g.
    /// `CENTRIFUGO_QUEUE__WORKER__CONCURRENCY=4`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            debug!(path = %path.display(), "Loading Centrifugo configuration file");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: Self = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Check option values before any connection is attempted
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigurationError::invalid("endpoint", "must not be empty"));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigurationError::invalid(
                "timeout_ms",
                "must be greater than zero",
            ));
        }
        if let Some(key) = &self.api_key {
            if key.chars().any(|c| c.is_control()) {
                return Err(ConfigurationError::invalid(
                    "api_key",
                    "must not contain control characters",
                ));
            }
        }
        if self.enable_queue {
            self.queue.validate()?;
            if let StoreConfig::Postgres(pg) = &self.queue.store {
                pg.validate()?;
            }
        }
        Ok(())
    }
}
