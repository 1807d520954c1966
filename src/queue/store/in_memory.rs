//! # In-Memory Queue Store
//!
//! Keeps jobs in process memory with the same visibility-timeout and
//! delivery-count semantics as the pgmq store. Nothing survives a restart.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::QueueStore;
use crate::error::{QueueError, QueueResult};
use crate::queue::job::{ClaimedJob, JobId, QueueMetrics, QueueJob, StoredJob};

#[derive(Debug, Clone)]
struct InMemoryJob {
    id: JobId,
    stored: StoredJob,
    deliveries: u32,
    claimed: bool,
    visible_at: DateTime<Utc>,
}

/// A job whose attempts were exhausted
#[derive(Debug, Clone)]
pub struct DeadJob {
    pub id: JobId,
    pub job: QueueJob,
    pub attempts: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct InMemoryQueue {
    next_id: i64,
    pending: VecDeque<InMemoryJob>,
    completed: Vec<(JobId, QueueJob)>,
    dead: Vec<DeadJob>,
}

impl InMemoryQueue {
    fn position(&self, id: JobId) -> Option<usize> {
        self.pending.iter().position(|job| job.id == id)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    queues: tokio::sync::Mutex<HashMap<String, InMemoryQueue>>,
    closed: AtomicBool,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_open(&self, operation: &str) -> QueueResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::store(operation, "in-memory store is closed"));
        }
        Ok(())
    }

    /// Jobs that were dead-lettered on `queue`
    pub async fn dead_jobs(&self, queue: &str) -> Vec<DeadJob> {
        self.queues
            .lock()
            .await
            .get(queue)
            .map(|q| q.dead.clone())
            .unwrap_or_default()
    }

    /// Completed jobs retained on `queue`
    pub async fn completed_jobs(&self, queue: &str) -> Vec<QueueJob> {
        self.queues
            .lock()
            .await
            .get(queue)
            .map(|q| q.completed.iter().map(|(_, job)| job.clone()).collect())
            .unwrap_or_default()
    }

    /// Jobs still waiting or in flight on `queue`
    pub async fn pending_jobs(&self, queue: &str) -> Vec<QueueJob> {
        self.queues
            .lock()
            .await
            .get(queue)
            .map(|q| q.pending.iter().map(|j| j.stored.job.clone()).collect())
            .unwrap_or_default()
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    fn store_type(&self) -> &'static str {
        "in_memory"
    }

    async fn ensure_queue(&self, queue: &str) -> QueueResult<()> {
        self.check_open("ensure_queue")?;
        self.queues
            .lock()
            .await
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn enqueue(&self, queue: &str, job: &StoredJob) -> QueueResult<JobId> {
        self.check_open("enqueue")?;
        let mut queues = self.queues.lock().await;
        let queue = queues.entry(queue.to_string()).or_default();

        queue.next_id += 1;
        let id = JobId(queue.next_id);
        queue.pending.push_back(InMemoryJob {
            id,
            stored: job.clone(),
            deliveries: 0,
            claimed: false,
            visible_at: Utc::now(),
        });
        Ok(id)
    }

    async fn claim(
        &self,
        queue: &str,
        limit: usize,
        visibility: Duration,
    ) -> QueueResult<Vec<ClaimedJob>> {
        self.check_open("claim")?;
        let mut queues = self.queues.lock().await;
        let Some(queue) = queues.get_mut(queue) else {
            return Ok(Vec::new());
        };

        let now = Utc::now();
        let hidden_until = now + to_chrono(visibility);
        let mut claimed = Vec::new();

        for job in queue.pending.iter_mut() {
            if claimed.len() >= limit {
                break;
            }
            if job.visible_at > now {
                continue;
            }
            job.deliveries += 1;
            job.claimed = true;
            job.visible_at = hidden_until;
            claimed.push(ClaimedJob {
                id: job.id,
                attempt: job.deliveries,
                job: job.stored.job.clone(),
                options: job.stored.options.clone(),
            });
        }

        Ok(claimed)
    }

    async fn complete(&self, queue: &str, id: JobId, remove: bool) -> QueueResult<()> {
        self.check_open("complete")?;
        let mut queues = self.queues.lock().await;
        let Some(queue) = queues.get_mut(queue) else {
            return Ok(());
        };
        if let Some(index) = queue.position(id) {
            if let Some(job) = queue.pending.remove(index) {
                if !remove {
                    queue.completed.push((id, job.stored.job));
                }
            }
        }
        Ok(())
    }

    async fn release(&self, queue: &str, id: JobId, delay: Duration) -> QueueResult<()> {
        self.check_open("release")?;
        let mut queues = self.queues.lock().await;
        let Some(queue) = queues.get_mut(queue) else {
            return Ok(());
        };
        if let Some(index) = queue.position(id) {
            if let Some(job) = queue.pending.get_mut(index) {
                job.deliveries = job.deliveries.saturating_sub(1);
                job.visible_at = Utc::now() + to_chrono(delay);
            }
        }
        Ok(())
    }

    async fn retry_later(&self, queue: &str, id: JobId, delay: Duration) -> QueueResult<()> {
        self.check_open("retry_later")?;
        let mut queues = self.queues.lock().await;
        let Some(queue) = queues.get_mut(queue) else {
            return Ok(());
        };
        if let Some(index) = queue.position(id) {
            if let Some(job) = queue.pending.get_mut(index) {
                job.claimed = false;
                job.visible_at = Utc::now() + to_chrono(delay);
            }
        }
        Ok(())
    }

    async fn dead_letter(
        &self,
        queue: &str,
        job: &ClaimedJob,
        error: &str,
        remove: bool,
    ) -> QueueResult<()> {
        self.check_open("dead_letter")?;
        let mut queues = self.queues.lock().await;
        let Some(queue) = queues.get_mut(queue) else {
            return Ok(());
        };
        if let Some(index) = queue.position(job.id) {
            queue.pending.remove(index);
        }
        if !remove {
            queue.dead.push(DeadJob {
                id: job.id,
                job: job.job.clone(),
                attempts: job.attempt,
                error: error.to_string(),
                failed_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn metrics(&self, queue_name: &str) -> QueueResult<QueueMetrics> {
        self.check_open("metrics")?;
        let queues = self.queues.lock().await;
        let Some(queue) = queues.get(queue_name) else {
            return Ok(QueueMetrics {
                queue_name: queue_name.to_string(),
                ..QueueMetrics::default()
            });
        };

        let now = Utc::now();
        let in_flight = queue
            .pending
            .iter()
            .filter(|job| job.claimed && job.visible_at > now)
            .count() as u64;

        Ok(QueueMetrics {
            queue_name: queue_name.to_string(),
            waiting: queue.pending.len() as u64 - in_flight,
            in_flight,
            completed: queue.completed.len() as u64,
            failed: queue.dead.len() as u64,
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
