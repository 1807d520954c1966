//! # Error Types
//!
//! Every public operation of the crate fails with exactly one typed error:
//! [`CentrifugoError`]. Its variants mirror the failure sources a caller has
//! to tell apart: the server call itself, durable submission, background
//! execution, and configuration.

use thiserror::Error;

use crate::types::OperationKind;

/// Result type for facade operations
pub type CentrifugoResult<T> = Result<T, CentrifugoError>;

/// Result type for transport adapter calls
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for offload queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Top-level error returned by the facade
#[derive(Debug, Error)]
pub enum CentrifugoError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Failed to submit job: {0}")]
    QueueSubmit(QueueError),

    #[error("Job execution failed: {0}")]
    QueueExecution(QueueError),

    /// Worker start, metrics or other queue lifecycle failures
    #[error("Queue error: {0}")]
    Queue(QueueError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl CentrifugoError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Name of the server operation this error belongs to, if any
    pub fn operation(&self) -> Option<OperationKind> {
        match self {
            Self::Transport(e) => Some(e.operation),
            Self::QueueExecution(QueueError::Execution { method, .. }) => Some(*method),
            _ => None,
        }
    }
}

/// A failed server call, tagged with the operation that was attempted.
#[derive(Debug, Error)]
#[error("{operation} failed over {transport}: {cause}")]
pub struct TransportError {
    pub operation: OperationKind,
    pub transport: &'static str,
    pub cause: TransportCause,
}

/// Why a transport call failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportCause {
    /// Connection refused, DNS failure, timeout, channel unavailable
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with an application-level error object
    #[error("server error {code}: {message}")]
    Api {
        code: u32,
        message: String,
        temporary: bool,
    },

    /// Non-success HTTP status or gRPC status code
    #[error("status {code}: {message}")]
    Status { code: u16, message: String },

    /// The reply could not be parsed or lacked a required result
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// An embedded JSON payload could not be decoded
    #[error("payload decode error: {0}")]
    Decode(String),

    /// The request could not be built or encoded
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    pub fn new(operation: OperationKind, transport: &'static str, cause: TransportCause) -> Self {
        Self {
            operation,
            transport,
            cause,
        }
    }

    pub fn network(operation: OperationKind, transport: &'static str, message: impl Into<String>) -> Self {
        Self::new(operation, transport, TransportCause::Network(message.into()))
    }

    pub fn malformed(operation: OperationKind, transport: &'static str, message: impl Into<String>) -> Self {
        Self::new(
            operation,
            transport,
            TransportCause::MalformedResponse(message.into()),
        )
    }

    pub fn decode(operation: OperationKind, transport: &'static str, message: impl Into<String>) -> Self {
        Self::new(operation, transport, TransportCause::Decode(message.into()))
    }

    /// A reply that is missing its result block
    pub fn missing_result(operation: OperationKind, transport: &'static str) -> Self {
        Self::malformed(operation, transport, "response has no result")
    }

    /// Check if the failed call is worth retrying
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match &self.cause {
            TransportCause::Network(_) => true,
            // gRPC codes: Unknown, ResourceExhausted, Aborted, Internal
            TransportCause::Status { code, .. } if self.transport == "grpc" => {
                matches!(code, 2 | 8 | 10 | 13)
            }
            TransportCause::Status { code, .. } => *code >= 500 || *code == 429,
            TransportCause::Api { temporary, .. } => *temporary,
            TransportCause::MalformedResponse(_)
            | TransportCause::Decode(_)
            | TransportCause::InvalidRequest(_) => false,
        }
    }
}

/// Offload queue failures
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue store error during {operation}: {message}")]
    Store { operation: String, message: String },

    #[error("Queue '{queue}' is closed")]
    Closed { queue: String },

    #[error("A worker is already running on queue '{queue}'")]
    WorkerAlreadyRunning { queue: String },

    #[error("Job {job_id} ({method}) failed after {attempts} attempt(s): {message}")]
    Execution {
        job_id: String,
        method: OperationKind,
        attempts: u32,
        message: String,
    },

    #[error("Job payload serialization error: {0}")]
    Serialization(String),
}

impl QueueError {
    pub fn store(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn closed(queue: impl Into<String>) -> Self {
        Self::Closed {
            queue: queue.into(),
        }
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        Self::store("database", err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Failure of one queued job attempt, as reported by a job handler
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct JobError {
    pub message: String,
    /// Retrying cannot succeed; dead-letter without using the remaining attempts
    pub permanent: bool,
}

impl JobError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permanent: false,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permanent: true,
        }
    }
}

impl From<String> for JobError {
    fn from(message: String) -> Self {
        Self::retryable(message)
    }
}

impl From<&str> for JobError {
    fn from(message: &str) -> Self {
        Self::retryable(message)
    }
}

/// A failed server call is permanent unless [`TransportError::is_retryable`]
impl From<TransportError> for JobError {
    fn from(err: TransportError) -> Self {
        Self {
            permanent: !err.is_retryable(),
            message: err.to_string(),
        }
    }
}

/// Invalid options or queue-only calls on a facade built without a queue
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Queue is not enabled. Set enable_queue to true in config.")]
    QueueDisabled,
}

impl ConfigurationError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        Self::Load(err.to_string())
    }
}
