//! # Offload Queue
//!
//! Durable job queue for mutating server operations. A facade submits jobs
//! instead of calling the server; a worker started on the same (or another)
//! process replays them through the transport with retries and backoff.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use centrifugo_sdk::queue::{OffloadQueue, QueueConfig, InMemoryQueueStore};
//! use centrifugo_sdk::types::{OperationKind, PublishRequest};
//! use centrifugo_sdk::logging::Logger;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = OffloadQueue::new(
//!     QueueConfig::in_memory(),
//!     Arc::new(InMemoryQueueStore::new()),
//!     Logger::default(),
//! );
//! let request = PublishRequest::new("news", json!({"text": "hi"}));
//! let job_id = queue.add_job(OperationKind::Publish, &request).await?;
//! println!("queued job {job_id}");
//! queue.close().await;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

pub mod config;
pub mod events;
pub mod job;
pub mod store;
pub mod worker;

pub use config::{BackoffPolicy, JobOptions, PostgresStoreConfig, QueueConfig, StoreConfig, WorkerConfig};
pub use events::{QueueEvent, QueueEventPublisher};
pub use job::{ClaimedJob, JobId, JobReceipt, QueueJob, QueueMetrics, StoredJob};
pub use store::{DeadJob, InMemoryQueueStore, PgmqQueueStore, QueueStore};
pub use worker::JobHandler;
pub use crate::error::JobError;

use crate::error::{QueueError, QueueResult};
use crate::logging::Logger;
use crate::types::OperationKind;
use worker::{WorkerContext, WorkerHandle};

struct QueueInner {
    config: QueueConfig,
    store: Arc<dyn QueueStore>,
    events: QueueEventPublisher,
    logger: Logger,
    closed: AtomicBool,
    worker: Mutex<Option<WorkerHandle>>,
}

/// Handle to one named queue. Clones share the same queue.
#[derive(Clone)]
pub struct OffloadQueue {
    inner: Arc<QueueInner>,
}

impl fmt::Debug for OffloadQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffloadQueue")
            .field("name", &self.inner.config.name)
            .field("store", &self.inner.store.store_type())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl OffloadQueue {
    pub fn new(config: QueueConfig, store: Arc<dyn QueueStore>, logger: Logger) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                config,
                store,
                events: QueueEventPublisher::default(),
                logger,
                closed: AtomicBool::new(false),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Build the store named by `config.store`
    pub fn from_config(config: QueueConfig, logger: Logger) -> QueueResult<Self> {
        let store: Arc<dyn QueueStore> = match &config.store {
            StoreConfig::InMemory => Arc::new(InMemoryQueueStore::new()),
            StoreConfig::Postgres(pg) => Arc::new(PgmqQueueStore::connect_lazy(pg)?),
        };
        Ok(Self::new(config, store, logger))
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.inner.store
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Persist a job with the queue's default options.
    ///
    /// Returns once the store has accepted it.
    pub async fn submit(&self, job: QueueJob) -> QueueResult<JobId> {
        let options = self.inner.config.default_job_options.clone();
        self.submit_with(job, options).await
    }

    /// Persist a job with explicit delivery options
    pub async fn submit_with(&self, job: QueueJob, options: JobOptions) -> QueueResult<JobId> {
        if self.is_closed() {
            return Err(QueueError::closed(self.name()));
        }
        let method = job.method;
        let id = self
            .inner
            .store
            .enqueue(self.name(), &StoredJob { job, options })
            .await?;

        debug!(queue = %self.name(), job_id = %id, method = %method, "Job submitted");
        Ok(id)
    }

    /// Serialize `params` and submit them as a job for `method`
    pub async fn add_job<P: Serialize>(&self, method: OperationKind, params: &P) -> QueueResult<JobId> {
        self.submit(QueueJob::new(method, params)?).await
    }

    /// Start the single worker of this queue
    pub async fn start_worker(&self, handler: Arc<dyn JobHandler>) -> QueueResult<()> {
        if self.is_closed() {
            return Err(QueueError::closed(self.name()));
        }
        let mut worker = self.inner.worker.lock().await;
        if worker.is_some() {
            return Err(QueueError::WorkerAlreadyRunning {
                queue: self.name().to_string(),
            });
        }

        self.inner.store.ensure_queue(self.name()).await?;
        *worker = Some(WorkerHandle::spawn(WorkerContext {
            queue_name: self.name().to_string(),
            store: self.inner.store.clone(),
            handler,
            events: self.inner.events.clone(),
            logger: self.inner.logger.clone(),
            config: self.inner.config.worker.clone(),
        }));
        Ok(())
    }

    pub async fn has_worker(&self) -> bool {
        self.inner.worker.lock().await.is_some()
    }

    /// Receive completion, retry and failure events
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    pub async fn metrics(&self) -> QueueResult<QueueMetrics> {
        self.inner.store.metrics(self.name()).await
    }

    /// Stop accepting jobs, stop the worker (draining in-flight jobs up to
    /// the grace period) and release the store. Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let worker = self.inner.worker.lock().await.take();
        if let Some(worker) = worker {
            worker.stop().await;
        }
        self.inner.store.close().await;

        info!(queue = %self.name(), "Offload queue closed");
        self.inner.logger.info(format!("Queue '{}' closed", self.name()));
    }
}
