//! Job records as they move through the offload queue.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use super::config::JobOptions;
use crate::error::QueueError;
use crate::types::OperationKind;

/// Store-assigned job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A deferred server operation.
///
/// `params` is the serialized typed request, including any idempotency key,
/// exactly as it will be replayed by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueJob {
    pub method: OperationKind,
    pub params: Value,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueJob {
    pub fn new<P: Serialize>(method: OperationKind, params: &P) -> Result<Self, QueueError> {
        Ok(Self {
            method,
            params: serde_json::to_value(params)?,
            enqueued_at: Utc::now(),
        })
    }

    /// Decode `params` back into the typed request
    pub fn params_as<P: DeserializeOwned>(&self) -> Result<P, QueueError> {
        serde_json::from_value(self.params.clone()).map_err(|e| {
            QueueError::Serialization(format!("invalid params for '{}': {e}", self.method))
        })
    }

    /// Idempotency key carried in the params, if any
    pub fn idempotency_key(&self) -> Option<&str> {
        self.params.get("idempotency_key").and_then(Value::as_str)
    }
}

/// What the store persists per job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredJob {
    pub job: QueueJob,
    pub options: JobOptions,
}

/// A job handed to the worker for one attempt
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: JobId,
    /// 1-based attempt number, equal to the store's delivery count
    pub attempt: u32,
    pub job: QueueJob,
    pub options: JobOptions,
}

impl ClaimedJob {
    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.options.attempts.max(1)
    }
}

/// Returned to callers of queued facade operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReceipt {
    pub job_id: JobId,
    pub method: OperationKind,
    pub idempotency_key: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

/// Point-in-time counts for a queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueMetrics {
    pub queue_name: String,
    /// Visible and ready to claim, or waiting out a retry delay
    pub waiting: u64,
    /// Claimed and not yet finished
    pub in_flight: u64,
    /// Retained completed jobs
    pub completed: u64,
    /// Dead-lettered jobs
    pub failed: u64,
}
