//! Offload queue options: store selection, per-job retry policy and worker
//! settings.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue name, also used as the pgmq queue (table) name
    pub name: String,
    pub store: StoreConfig,
    /// Options applied to every submitted job
    pub default_job_options: JobOptions,
    pub worker: WorkerConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "centrifugo".to_string(),
            store: StoreConfig::default(),
            default_job_options: JobOptions::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl QueueConfig {
    /// Queue backed by the in-process store
    pub fn in_memory() -> Self {
        Self {
            store: StoreConfig::InMemory,
            ..Self::default()
        }
    }

    /// Queue backed by pgmq on PostgreSQL
    pub fn postgres(store: PostgresStoreConfig) -> Self {
        Self {
            store: StoreConfig::Postgres(store),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_job_options(mut self, options: JobOptions) -> Self {
        self.default_job_options = options;
        self
    }

    #[must_use]
    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        validate_queue_name(&self.name)?;
        self.default_job_options.validate()?;
        self.worker.validate()?;

        // a lock that expires mid-attempt hands the job to another worker
        if self.default_job_options.timeout_ms >= self.worker.lock_duration_ms {
            return Err(ConfigurationError::invalid(
                "queue.default_job_options.timeout_ms",
                format!(
                    "must be less than queue.worker.lock_duration_ms ({})",
                    self.worker.lock_duration_ms
                ),
            ));
        }
        Ok(())
    }
}

/// Longest queue name; pgmq allows 47 and the dead-letter queue appends `_dead`
pub const MAX_QUEUE_NAME_LEN: usize = 42;

/// Queue names become PostgreSQL identifiers, so only `[a-z0-9_]` is allowed
pub fn validate_queue_name(name: &str) -> Result<(), ConfigurationError> {
    if name.is_empty() || name.len() > MAX_QUEUE_NAME_LEN {
        return Err(ConfigurationError::invalid(
            "queue.name",
            format!("must be between 1 and {MAX_QUEUE_NAME_LEN} characters"),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(ConfigurationError::invalid(
            "queue.name",
            format!("'{name}' may only contain lowercase letters, digits and '_'"),
        ));
    }
    Ok(())
}

/// Where jobs are persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process-local store, lost on restart
    InMemory,
    /// pgmq extension on PostgreSQL
    Postgres(PostgresStoreConfig),
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Postgres(PostgresStoreConfig::default())
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresStoreConfig {
    /// Full connection URL, overrides the individual fields when set
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub database: String,
    /// `disable`, `prefer` or `require`
    pub ssl_mode: String,
    pub max_connections: u32,
    pub connect_timeout_ms: u64,
}

impl Default for PostgresStoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            username: "postgres".to_string(),
            password: None,
            database: "postgres".to_string(),
            ssl_mode: "prefer".to_string(),
            max_connections: 5,
            connect_timeout_ms: 5_000,
        }
    }
}

impl fmt::Debug for PostgresStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresStoreConfig")
            .field("url", &self.url.as_ref().map(|_| "[REDACTED]"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

impl PostgresStoreConfig {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.url.is_none() && self.host.trim().is_empty() {
            return Err(ConfigurationError::invalid(
                "queue.store.host",
                "either url or host is required",
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigurationError::invalid(
                "queue.store.max_connections",
                "must be greater than zero",
            ));
        }
        if !matches!(self.ssl_mode.as_str(), "disable" | "prefer" | "require") {
            return Err(ConfigurationError::invalid(
                "queue.store.ssl_mode",
                format!("unsupported mode '{}'", self.ssl_mode),
            ));
        }
        Ok(())
    }
}

/// Delay between attempts of a failed job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Same delay before every retry
    Fixed { delay_ms: u64 },
    /// `delay_ms * 2^(attempt - 1)`, capped at `max_delay_ms`
    Exponential { delay_ms: u64, max_delay_ms: u64 },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::Exponential {
            delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the retry that follows failed attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Self::Exponential {
                delay_ms,
                max_delay_ms,
            } => {
                let exponent = attempt.saturating_sub(1).min(32);
                let factor = 1u64 << exponent;
                Duration::from_millis(delay_ms.saturating_mul(factor).min(max_delay_ms))
            }
        }
    }
}

/// Per-job delivery options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    /// Total attempts including the first one
    pub attempts: u32,
    pub backoff: BackoffPolicy,
    /// Delete completed jobs instead of archiving them
    pub remove_on_complete: bool,
    /// Delete dead jobs instead of moving them to the dead-letter queue
    pub remove_on_fail: bool,
    /// Execution time limit for one attempt
    pub timeout_ms: u64,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: BackoffPolicy::default(),
            remove_on_complete: true,
            remove_on_fail: false,
            timeout_ms: 30_000,
        }
    }
}

impl JobOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.attempts == 0 {
            return Err(ConfigurationError::invalid(
                "queue.default_job_options.attempts",
                "must be at least 1",
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigurationError::invalid(
                "queue.default_job_options.timeout_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum jobs executing at once
    pub concurrency: usize,
    /// How long a claimed job stays invisible to other workers; must exceed
    /// the job timeout
    pub lock_duration_ms: u64,
    /// Sleep between claims when the queue is empty
    pub poll_interval_ms: u64,
    /// How long `close` waits for in-flight jobs
    pub shutdown_grace_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            lock_duration_ms: 60_000,
            poll_interval_ms: 100,
            shutdown_grace_ms: 10_000,
        }
    }
}

impl WorkerConfig {
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn lock_duration(&self) -> Duration {
        Duration::from_millis(self.lock_duration_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.concurrency == 0 {
            return Err(ConfigurationError::invalid(
                "queue.worker.concurrency",
                "must be at least 1",
            ));
        }
        if self.lock_duration_ms < 1_000 {
            return Err(ConfigurationError::invalid(
                "queue.worker.lock_duration_ms",
                "must be at least 1000",
            ));
        }
        Ok(())
    }
}
