//! # Logging
//!
//! Two layers live here:
//!
//! - [`init_structured_logging`] installs the process-wide `tracing`
//!   subscriber (console, optional JSON), environment driven.
//! - [`Logger`] is the leveled logger owned by each facade. It decides which
//!   records reach the caller-visible sink, so two facades in one process can
//!   log at different levels with different prefixes.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing_subscriber::{fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the global `tracing` subscriber.
///
/// The filter comes from `CENTRIFUGO_SDK_LOG`, then `RUST_LOG`, defaulting to
/// `info`. Set `CENTRIFUGO_SDK_LOG_FORMAT=json` for JSON lines. Safe to call more
/// than once and alongside an already installed subscriber.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = std::env::var("CENTRIFUGO_SDK_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| "info".to_string());
        let json = std::env::var("CENTRIFUGO_SDK_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let registry = tracing_subscriber::registry().with(EnvFilter::new(filter));
        let result = if json {
            registry
                .with(tracing_fmt::layer().json().with_target(true))
                .try_init()
        } else {
            registry
                .with(
                    tracing_fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_ansi(true),
                )
                .try_init()
        };

        if result.is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
        }
    });
}

/// Severity levels, ordered `Error < Warn < Info < Debug`
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    #[default]
    Info = 2,
    Debug = 3,
}

impl LogLevel {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Error,
            1 => Self::Warn,
            2 => Self::Info,
            _ => Self::Debug,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single emitted log entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub prefix: String,
    pub message: String,
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

/// Destination for records that pass the logger's level check
pub trait LogSink: Send + Sync + fmt::Debug {
    fn emit(&self, record: &LogRecord);
}

/// Forwards records to `tracing` under the `centrifugo` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, record: &LogRecord) {
        let data = record.data.as_ref().map(Value::to_string);
        match record.level {
            LogLevel::Error => tracing::error!(target: "centrifugo", prefix = %record.prefix, data = ?data, "{}", record.message),
            LogLevel::Warn => tracing::warn!(target: "centrifugo", prefix = %record.prefix, data = ?data, "{}", record.message),
            LogLevel::Info => tracing::info!(target: "centrifugo", prefix = %record.prefix, data = ?data, "{}", record.message),
            LogLevel::Debug => tracing::debug!(target: "centrifugo", prefix = %record.prefix, data = ?data, "{}", record.message),
        }
    }
}

/// Keeps every record in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    pub fn records_at(&self, level: LogLevel) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.level == level)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl LogSink for MemorySink {
    fn emit(&self, record: &LogRecord) {
        self.records.lock().push(record.clone());
    }
}

/// Logger options as they appear in configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogOption {
    pub enabled: bool,
    pub level: LogLevel,
    pub prefix: String,
    /// Custom sink; `None` means [`TracingSink`]
    #[serde(skip)]
    pub sink: Option<Arc<dyn LogSink>>,
}

impl Default for LogOption {
    fn default() -> Self {
        Self {
            enabled: true,
            level: LogLevel::Info,
            prefix: "[Centrifugo]".to_string(),
            sink: None,
        }
    }
}

impl fmt::Debug for LogOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogOption")
            .field("enabled", &self.enabled)
            .field("level", &self.level)
            .field("prefix", &self.prefix)
            .field("custom_sink", &self.sink.is_some())
            .finish()
    }
}

impl LogOption {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    #[must_use]
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }
}

struct LoggerInner {
    enabled: AtomicBool,
    level: AtomicU8,
    prefix: String,
    sink: Arc<dyn LogSink>,
}

/// Leveled logger owned by a facade and shared with its queue.
///
/// Cloning is cheap and clones share level and enablement.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("enabled", &self.is_enabled())
            .field("level", &self.level())
            .field("prefix", &self.inner.prefix)
            .finish()
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(&LogOption::default())
    }
}

impl Logger {
    pub fn new(option: &LogOption) -> Self {
        let sink = option
            .sink
            .clone()
            .unwrap_or_else(|| Arc::new(TracingSink) as Arc<dyn LogSink>);
        Self::with_parts(option.enabled, option.level, option.prefix.clone(), sink)
    }

    fn with_parts(enabled: bool, level: LogLevel, prefix: String, sink: Arc<dyn LogSink>) -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                enabled: AtomicBool::new(enabled),
                level: AtomicU8::new(level as u8),
                prefix,
                sink,
            }),
        }
    }

    /// A logger that emits nothing
    pub fn disabled() -> Self {
        Self::new(&LogOption::disabled())
    }

    /// New logger writing to the same sink with an extended prefix.
    ///
    /// The child starts at the parent's current level and enablement but is
    /// adjusted independently afterwards.
    pub fn child(&self, prefix: &str) -> Self {
        let prefix = if self.inner.prefix.is_empty() {
            prefix.to_string()
        } else {
            format!("{} {}", self.inner.prefix, prefix)
        };
        Self::with_parts(
            self.is_enabled(),
            self.level(),
            prefix,
            self.inner.sink.clone(),
        )
    }

    pub fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.inner.level.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, level: LogLevel) {
        self.inner.level.store(level as u8, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    /// Whether a record at `level` would be emitted
    pub fn would_log(&self, level: LogLevel) -> bool {
        self.is_enabled() && level <= self.level()
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>, data: Option<Value>) {
        if !self.would_log(level) {
            return;
        }
        let record = LogRecord {
            level,
            prefix: self.inner.prefix.clone(),
            message: message.into(),
            data,
            timestamp: Utc::now(),
        };
        self.inner.sink.emit(&record);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message, None);
    }

    pub fn error_with(&self, message: impl Into<String>, data: Value) {
        self.log(LogLevel::Error, message, Some(data));
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message, None);
    }

    pub fn warn_with(&self, message: impl Into<String>, data: Value) {
        self.log(LogLevel::Warn, message, Some(data));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message, None);
    }

    pub fn info_with(&self, message: impl Into<String>, data: Value) {
        self.log(LogLevel::Info, message, Some(data));
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message, None);
    }

    pub fn debug_with(&self, message: impl Into<String>, data: Value) {
        self.log(LogLevel::Debug, message, Some(data));
    }
}
