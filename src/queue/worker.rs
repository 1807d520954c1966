//! # Queue Worker
//!
//! Claims jobs from the store and executes them with bounded concurrency.
//!
//! ```text
//! store.claim() → [Semaphore] → handler.handle() → complete / retry_later / dead_letter
//!                      │                                 │
//!                      └─→ at most `concurrency` jobs     └─→ QueueEvent + log
//! ```
//!
//! Handler errors, panics and timeouts all count as a failed attempt. A
//! failed attempt is retried after the job's backoff delay until its
//! attempts are exhausted, then the job is dead-lettered. A handler error
//! marked permanent dead-letters the job right away.
//!
//! A job whose lock expired while it is still executing here can be claimed
//! again. That claim is released back to the store uncounted, so only
//! executed attempts use up the budget.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashSet;
use futures::FutureExt;
use serde_json::json;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::config::WorkerConfig;
use super::events::{QueueEvent, QueueEventPublisher};
use super::job::{ClaimedJob, JobId, QueueJob};
use super::store::QueueStore;
use crate::error::JobError;
use crate::logging::Logger;

/// Executes one job attempt.
///
/// An `Err` is the failure recorded for the attempt; a permanent one skips
/// the remaining attempts.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &QueueJob) -> Result<(), JobError>;
}

/// Everything one worker loop needs, shared with its job tasks
pub(crate) struct WorkerContext {
    pub queue_name: String,
    pub store: Arc<dyn QueueStore>,
    pub handler: Arc<dyn JobHandler>,
    pub events: QueueEventPublisher,
    pub logger: Logger,
    pub config: WorkerConfig,
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("queue_name", &self.queue_name)
            .field("store", &self.store.store_type())
            .field("config", &self.config)
            .finish()
    }
}

/// Handle to a running worker loop
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl WorkerHandle {
    pub fn spawn(context: WorkerContext) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(Arc::new(context), shutdown_rx));
        Self { shutdown, task }
    }

    /// Stop claiming, then wait for the loop (which drains in-flight jobs
    /// up to its grace period) to exit
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Queue worker task ended abnormally");
        }
    }
}

async fn run(ctx: Arc<WorkerContext>, mut shutdown: watch::Receiver<bool>) {
    let concurrency = ctx.config.concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let in_flight: Arc<DashSet<JobId>> = Arc::new(DashSet::new());
    let mut tasks = JoinSet::new();

    info!(
        queue = %ctx.queue_name,
        store = ctx.store.store_type(),
        concurrency,
        "Queue worker starting"
    );
    ctx.logger.info_with(
        "Queue worker started",
        json!({"queue": ctx.queue_name, "concurrency": concurrency}),
    );

    loop {
        while tasks.try_join_next().is_some() {}

        let first_permit = tokio::select! {
            _ = shutdown.changed() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        if *shutdown.borrow() {
            break;
        }

        let limit = 1 + semaphore.available_permits();
        let claimed = match ctx
            .store
            .claim(&ctx.queue_name, limit, ctx.config.lock_duration())
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                warn!(queue = %ctx.queue_name, error = %e, "Failed to claim jobs");
                drop(first_permit);
                if wait_or_shutdown(&mut shutdown, ctx.config.poll_interval()).await {
                    break;
                }
                continue;
            }
        };

        if claimed.is_empty() {
            drop(first_permit);
            if wait_or_shutdown(&mut shutdown, ctx.config.poll_interval()).await {
                break;
            }
            continue;
        }

        let mut first_permit = Some(first_permit);
        for job in claimed {
            if !in_flight.insert(job.id) {
                debug!(queue = %ctx.queue_name, job_id = %job.id, "Job already executing, claim released");
                if let Err(e) = ctx
                    .store
                    .release(&ctx.queue_name, job.id, ctx.config.poll_interval())
                    .await
                {
                    warn!(queue = %ctx.queue_name, job_id = %job.id, error = %e, "Failed to release duplicate claim");
                }
                continue;
            }
            let permit = match first_permit.take() {
                Some(permit) => permit,
                // permits are only released by finishing tasks, so this cannot starve
                None => match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let ctx = ctx.clone();
            let in_flight = in_flight.clone();
            tasks.spawn(async move {
                let job_id = job.id;
                execute(&ctx, job).await;
                in_flight.remove(&job_id);
                drop(permit);
            });
        }
    }

    drain(&ctx, &mut tasks).await;
    info!(queue = %ctx.queue_name, "Queue worker stopped");
    ctx.logger.info_with("Queue worker stopped", json!({"queue": ctx.queue_name}));
}

/// Sleep for `interval`; returns true if shutdown was requested meanwhile
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, interval: Duration) -> bool {
    tokio::select! {
        _ = shutdown.changed() => true,
        _ = tokio::time::sleep(interval) => *shutdown.borrow(),
    }
}

/// Wait for in-flight jobs up to the grace period.
///
/// Jobs still running afterwards are detached, not aborted: each keeps its
/// claim and finishes (or its lock expires and the job is redelivered).
async fn drain(ctx: &WorkerContext, tasks: &mut JoinSet<()>) {
    if tasks.is_empty() {
        return;
    }
    let grace = ctx.config.shutdown_grace();
    let pending = tasks.len();
    debug!(queue = %ctx.queue_name, pending, "Draining in-flight jobs");

    let drained = tokio::time::timeout(grace, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(
            queue = %ctx.queue_name,
            remaining = tasks.len(),
            grace_ms = grace.as_millis() as u64,
            "Shutdown grace period elapsed with jobs still running"
        );
        tasks.detach_all();
    }
}

/// Run one attempt and record its outcome in the store
pub(crate) async fn execute(ctx: &WorkerContext, claimed: ClaimedJob) {
    let timeout = claimed.options.timeout();
    debug!(
        queue = %ctx.queue_name,
        job_id = %claimed.id,
        method = %claimed.job.method,
        attempt = claimed.attempt,
        "Executing job"
    );

    let outcome = tokio::time::timeout(
        timeout,
        AssertUnwindSafe(ctx.handler.handle(&claimed.job)).catch_unwind(),
    )
    .await;

    let failure = match outcome {
        Ok(Ok(Ok(()))) => None,
        Ok(Ok(Err(error))) => Some(error),
        Ok(Err(panic)) => Some(JobError::retryable(panic_message(panic.as_ref()))),
        Err(_) => Some(JobError::retryable(format!(
            "timed out after {}ms",
            timeout.as_millis()
        ))),
    };

    match failure {
        None => on_success(ctx, &claimed).await,
        Some(error) => on_failure(ctx, &claimed, error).await,
    }
}

async fn on_success(ctx: &WorkerContext, claimed: &ClaimedJob) {
    if let Err(e) = ctx
        .store
        .complete(&ctx.queue_name, claimed.id, claimed.options.remove_on_complete)
        .await
    {
        // the job stays claimed and is redelivered when its lock expires
        error!(queue = %ctx.queue_name, job_id = %claimed.id, error = %e, "Failed to mark job complete");
        return;
    }

    ctx.logger.info_with(
        format!("Job {} completed", claimed.id),
        json!({"job_id": claimed.id, "method": claimed.job.method, "attempt": claimed.attempt}),
    );
    ctx.events.publish(QueueEvent::Completed {
        job_id: claimed.id,
        method: claimed.job.method,
        attempt: claimed.attempt,
        at: Utc::now(),
    });
}

async fn on_failure(ctx: &WorkerContext, claimed: &ClaimedJob, error: JobError) {
    let JobError { message, permanent } = error;
    if permanent || claimed.is_final_attempt() {
        if let Err(e) = ctx
            .store
            .dead_letter(
                &ctx.queue_name,
                claimed,
                &message,
                claimed.options.remove_on_fail,
            )
            .await
        {
            error!(queue = %ctx.queue_name, job_id = %claimed.id, error = %e, "Failed to dead-letter job");
        }

        ctx.logger.error_with(
            format!("Job {} failed", claimed.id),
            json!({
                "job_id": claimed.id,
                "method": claimed.job.method,
                "attempts": claimed.attempt,
                "permanent": permanent,
                "error": message,
            }),
        );
        ctx.events.publish(QueueEvent::Failed {
            job_id: claimed.id,
            method: claimed.job.method,
            attempts: claimed.attempt,
            error: message,
            at: Utc::now(),
        });
        return;
    }

    let delay = claimed.options.backoff.delay_for(claimed.attempt);
    if let Err(e) = ctx
        .store
        .retry_later(&ctx.queue_name, claimed.id, delay)
        .await
    {
        error!(queue = %ctx.queue_name, job_id = %claimed.id, error = %e, "Failed to schedule retry");
    }

    ctx.logger.warn_with(
        format!("Job {} attempt {} failed, retrying", claimed.id, claimed.attempt),
        json!({
            "job_id": claimed.id,
            "method": claimed.job.method,
            "error": message,
            "retry_in_ms": delay.as_millis() as u64,
        }),
    );
    ctx.events.publish(QueueEvent::Retrying {
        job_id: claimed.id,
        method: claimed.job.method,
        attempt: claimed.attempt,
        error: message,
        retry_in_ms: delay.as_millis() as u64,
        at: Utc::now(),
    });
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}
