//! # Queue Stores
//!
//! Persistence behind the offload queue. A store owns job records, their
//! visibility (claim locks) and delivery counts; the worker owns execution.
//!
//! - [`InMemoryQueueStore`]: process-local, for tests and single-process use
//! - [`PgmqQueueStore`]: durable, pgmq on PostgreSQL

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use super::job::{ClaimedJob, JobId, QueueMetrics, StoredJob};
use crate::error::QueueResult;

pub mod in_memory;
pub mod pgmq;

pub use in_memory::{DeadJob, InMemoryQueueStore};
pub use pgmq::PgmqQueueStore;

/// Suffix of the queue that receives jobs whose attempts are exhausted
pub const DEAD_LETTER_SUFFIX: &str = "_dead";

pub fn dead_letter_queue_name(queue: &str) -> String {
    format!("{queue}{DEAD_LETTER_SUFFIX}")
}

#[async_trait]
pub trait QueueStore: Send + Sync + fmt::Debug {
    /// Store identifier for logging
    fn store_type(&self) -> &'static str;

    /// Create the queue (and its dead-letter queue) if missing
    async fn ensure_queue(&self, queue: &str) -> QueueResult<()>;

    /// Persist a job; it is durable once this returns
    async fn enqueue(&self, queue: &str, job: &StoredJob) -> QueueResult<JobId>;

    /// Claim up to `limit` visible jobs, hiding them for `visibility`.
    ///
    /// Each claim increments the job's delivery count, which becomes the
    /// attempt number.
    async fn claim(
        &self,
        queue: &str,
        limit: usize,
        visibility: Duration,
    ) -> QueueResult<Vec<ClaimedJob>>;

    /// Finish a job; `remove` deletes it instead of retaining it
    async fn complete(&self, queue: &str, id: JobId, remove: bool) -> QueueResult<()>;

    /// Undo a claim the worker did not execute: the delivery is not counted
    /// and the job becomes visible again after `delay`
    async fn release(&self, queue: &str, id: JobId, delay: Duration) -> QueueResult<()>;

    /// Make a claimed job visible again after `delay`
    async fn retry_later(&self, queue: &str, id: JobId, delay: Duration) -> QueueResult<()>;

    /// Move a job out of the queue after its final failed attempt;
    /// `remove` drops it instead of keeping it in the dead-letter queue
    async fn dead_letter(
        &self,
        queue: &str,
        job: &ClaimedJob,
        error: &str,
        remove: bool,
    ) -> QueueResult<()>;

    async fn metrics(&self, queue: &str) -> QueueResult<QueueMetrics>;

    /// Release connections; later calls fail with a store error
    async fn close(&self);
}
