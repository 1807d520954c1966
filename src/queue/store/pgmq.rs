//! # pgmq Queue Store
//!
//! Durable job storage on PostgreSQL through the `pgmq` extension. Jobs are
//! pgmq messages; the message's `read_ct` is the delivery count and its
//! visibility timeout is the worker's claim lock. Dead jobs are sent to a
//! sibling `<queue>_dead` pgmq queue in the same transaction that deletes
//! them from the work queue.
//!
//! The pool connects lazily, so building a store never blocks and an
//! unreachable database surfaces as a store error on first use.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashSet;
use serde_json::{json, Value};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use tracing::{debug, error, info, warn};

use super::{dead_letter_queue_name, QueueStore};
use crate::error::{QueueError, QueueResult};
use crate::queue::config::{validate_queue_name, PostgresStoreConfig};
use crate::queue::job::{ClaimedJob, JobId, QueueMetrics, StoredJob};

#[derive(Debug)]
pub struct PgmqQueueStore {
    pool: PgPool,
    ensured: DashSet<String>,
}

impl PgmqQueueStore {
    /// Build a store with a lazily connecting pool
    pub fn connect_lazy(config: &PostgresStoreConfig) -> QueueResult<Self> {
        let options = Self::connect_options(config)?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout())
            .connect_lazy_with(options);

        info!(
            host = %config.host,
            database = %config.database,
            max_connections = config.max_connections,
            "pgmq queue store configured"
        );
        Ok(Self::with_pool(pool))
    }

    /// Use an existing pool
    pub fn with_pool(pool: PgPool) -> Self {
        Self {
            pool,
            ensured: DashSet::new(),
        }
    }

    fn connect_options(config: &PostgresStoreConfig) -> QueueResult<PgConnectOptions> {
        if let Some(url) = &config.url {
            return PgConnectOptions::from_str(url)
                .map_err(|e| QueueError::store("configure", format!("invalid database url: {e}")));
        }

        let ssl_mode = match config.ssl_mode.as_str() {
            "disable" => PgSslMode::Disable,
            "require" => PgSslMode::Require,
            _ => PgSslMode::Prefer,
        };
        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .database(&config.database)
            .ssl_mode(ssl_mode)
            .application_name("centrifugo-sdk");
        if let Some(password) = &config.password {
            options = options.password(password);
        }
        Ok(options)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn ensure_once(&self, queue: &str) -> QueueResult<()> {
        if self.ensured.contains(queue) {
            return Ok(());
        }
        self.ensure_queue(queue).await
    }

    /// Table-name interpolation is only safe for validated names
    fn checked(queue: &str) -> QueueResult<&str> {
        validate_queue_name(queue)
            .map(|_| queue)
            .map_err(|e| QueueError::store("validate", e.to_string()))
    }
}

/// pgmq visibility timeouts are whole seconds; round up so a sub-second
/// backoff still delays the retry
fn seconds(duration: Duration) -> i32 {
    let secs = duration.as_millis().div_ceil(1_000);
    i32::try_from(secs).unwrap_or(i32::MAX)
}

fn db_error(operation: &str, err: sqlx::Error) -> QueueError {
    QueueError::store(operation, err.to_string())
}

#[async_trait]
impl QueueStore for PgmqQueueStore {
    fn store_type(&self) -> &'static str {
        "pgmq"
    }

    async fn ensure_queue(&self, queue: &str) -> QueueResult<()> {
        let queue = Self::checked(queue)?;
        for name in [queue.to_string(), dead_letter_queue_name(queue)] {
            sqlx::query("SELECT pgmq.create($1)")
                .bind(&name)
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("create_queue", e))?;
            debug!(queue = %name, "pgmq queue ensured");
        }
        self.ensured.insert(queue.to_string());
        Ok(())
    }

    async fn enqueue(&self, queue: &str, job: &StoredJob) -> QueueResult<JobId> {
        self.ensure_once(queue).await?;
        let message = serde_json::to_value(job)?;

        let msg_id: i64 = sqlx::query_scalar("SELECT pgmq.send($1, $2)")
            .bind(queue)
            .bind(&message)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("send", e))?;

        debug!(queue = %queue, msg_id, method = %job.job.method, "Job enqueued");
        Ok(JobId(msg_id))
    }

    async fn claim(
        &self,
        queue: &str,
        limit: usize,
        visibility: Duration,
    ) -> QueueResult<Vec<ClaimedJob>> {
        self.ensure_once(queue).await?;
        let qty = i32::try_from(limit).unwrap_or(i32::MAX);

        let rows: Vec<(i64, i32, Value)> =
            sqlx::query_as("SELECT msg_id, read_ct, message FROM pgmq.read($1, $2, $3)")
                .bind(queue)
                .bind(seconds(visibility).max(1))
                .bind(qty)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| db_error("read", e))?;

        let mut claimed = Vec::with_capacity(rows.len());
        for (msg_id, read_ct, message) in rows {
            match serde_json::from_value::<StoredJob>(message) {
                Ok(stored) => claimed.push(ClaimedJob {
                    id: JobId(msg_id),
                    attempt: u32::try_from(read_ct.max(1)).unwrap_or(1),
                    job: stored.job,
                    options: stored.options,
                }),
                Err(e) => {
                    error!(queue = %queue, msg_id, error = %e, "Undecodable job archived");
                    sqlx::query("SELECT pgmq.archive($1, $2::bigint)")
                        .bind(queue)
                        .bind(msg_id)
                        .execute(&self.pool)
                        .await
                        .map_err(|e| db_error("archive", e))?;
                }
            }
        }
        Ok(claimed)
    }

    async fn complete(&self, queue: &str, id: JobId, remove: bool) -> QueueResult<()> {
        let sql = if remove {
            "SELECT pgmq.delete($1, $2::bigint)"
        } else {
            "SELECT pgmq.archive($1, $2::bigint)"
        };
        let found: bool = sqlx::query_scalar(sql)
            .bind(queue)
            .bind(id.0)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("complete", e))?;

        if !found {
            warn!(queue = %queue, job_id = %id, "Completed job was already gone");
        }
        Ok(())
    }

    async fn release(&self, queue: &str, id: JobId, delay: Duration) -> QueueResult<()> {
        let queue = Self::checked(queue)?;
        sqlx::query(&format!(
            "UPDATE pgmq.q_{queue} \
             SET read_ct = GREATEST(read_ct - 1, 0), vt = clock_timestamp() + make_interval(secs => $2) \
             WHERE msg_id = $1"
        ))
        .bind(id.0)
        .bind(f64::from(seconds(delay)))
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("release", e))?;
        Ok(())
    }

    async fn retry_later(&self, queue: &str, id: JobId, delay: Duration) -> QueueResult<()> {
        sqlx::query("SELECT msg_id FROM pgmq.set_vt($1, $2::bigint, $3)")
            .bind(queue)
            .bind(id.0)
            .bind(seconds(delay))
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("set_vt", e))?;
        Ok(())
    }

    async fn dead_letter(
        &self,
        queue: &str,
        job: &ClaimedJob,
        error: &str,
        remove: bool,
    ) -> QueueResult<()> {
        let mut tx = self.pool.begin().await.map_err(|e| db_error("begin", e))?;

        if !remove {
            let record = json!({
                "original_id": job.id.0,
                "job": job.job,
                "attempts": job.attempt,
                "error": error,
                "failed_at": Utc::now(),
            });
            sqlx::query("SELECT pgmq.send($1, $2)")
                .bind(dead_letter_queue_name(queue))
                .bind(&record)
                .execute(&mut *tx)
                .await
                .map_err(|e| db_error("send_dead_letter", e))?;
        }

        sqlx::query("SELECT pgmq.delete($1, $2::bigint)")
            .bind(queue)
            .bind(job.id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("delete", e))?;

        tx.commit().await.map_err(|e| db_error("commit", e))?;
        Ok(())
    }

    async fn metrics(&self, queue: &str) -> QueueResult<QueueMetrics> {
        let queue = Self::checked(queue)?;
        self.ensure_once(queue).await?;

        let queue_length: i64 =
            sqlx::query_scalar("SELECT queue_length FROM pgmq.metrics($1)")
                .bind(queue)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| db_error("metrics", e))?;

        let failed: i64 = sqlx::query_scalar("SELECT queue_length FROM pgmq.metrics($1)")
            .bind(dead_letter_queue_name(queue))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("metrics", e))?;

        let in_flight: i64 = sqlx::query_scalar(&format!(
            "SELECT count(*) FROM pgmq.q_{queue} WHERE vt > now()"
        ))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("metrics", e))?;

        let completed: i64 = sqlx::query_scalar(&format!("SELECT count(*) FROM pgmq.a_{queue}"))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("metrics", e))?;

        let to_u64 = |v: i64| u64::try_from(v).unwrap_or(0);
        Ok(QueueMetrics {
            queue_name: queue.to_string(),
            waiting: to_u64(queue_length - in_flight),
            in_flight: to_u64(in_flight),
            completed: to_u64(completed),
            failed: to_u64(failed),
        })
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("pgmq queue store closed");
    }
}
