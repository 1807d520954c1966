//! # Centrifugo Facade
//!
//! Single entry point for server operations. Each mutating call either runs
//! through the configured transport right away or, when the offload queue is
//! enabled, is stored as a job and executed later by the queue worker. Read
//! operations always run right away.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use centrifugo_sdk::{Centrifugo, CentrifugoConfig, Dispatched};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CentrifugoConfig::http("http://localhost:8000").with_api_key("secret");
//! let centrifugo = Centrifugo::new(config).await?;
//!
//! if let Dispatched::Applied(result) = centrifugo.publish("chat", json!({"msg": "hi"})).await? {
//!     println!("published at offset {}", result.offset);
//! }
//! centrifugo.close().await;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;

pub mod dispatch;
pub mod handler;

pub use dispatch::Dispatched;
pub use handler::TransportJobHandler;

use crate::config::{CentrifugoConfig, TransportMode};
use crate::error::{
    CentrifugoError, CentrifugoResult, ConfigurationError, QueueError, TransportResult,
};
use crate::idempotency::IdempotencyPolicy;
use crate::logging::{LogLevel, Logger};
use crate::queue::{JobHandler, JobReceipt, OffloadQueue, QueueEvent, QueueJob};
use crate::transport::{CentrifugoTransport, UnifiedTransport};
use crate::types::{
    BatchCommand, BatchRequest, BatchResult, BroadcastRequest, BroadcastResult, ChannelMap, ChannelsRequest, DisconnectRequest,
    HistoryRequest, HistoryResult, Operation, OperationKind, PresenceMap, PresenceStats,
    PublishRequest, PublishResult, RefreshRequest, ServerInfo, SubscribeRequest,
    UnsubscribeRequest,
};

/// Log lines for one mutating call
struct Outcome {
    queued: String,
    applied: String,
    failed: String,
}

fn require(field: &str, value: &str) -> CentrifugoResult<()> {
    if value.trim().is_empty() {
        return Err(CentrifugoError::invalid_request(format!(
            "{field} must not be empty"
        )));
    }
    Ok(())
}

/// Centrifugo client facade
#[derive(Debug)]
pub struct Centrifugo {
    config: CentrifugoConfig,
    transport: Arc<UnifiedTransport>,
    queue: Option<OffloadQueue>,
    idempotency: IdempotencyPolicy,
    logger: Logger,
}

impl Centrifugo {
    /// Validate `config` and build the transport, logger and (if enabled)
    /// the offload queue.
    ///
    /// Nothing connects here: HTTP connects per request, gRPC on first call
    /// and the queue store on first use.
    pub async fn new(config: CentrifugoConfig) -> CentrifugoResult<Self> {
        config.validate()?;

        let logger = Logger::new(&config.log);
        logger.info(format!("Initializing Centrifugo SDK in {} mode", config.mode));

        let transport = UnifiedTransport::from_config(&config)?;
        logger.debug(format!(
            "Created {} client for endpoint: {}",
            transport.transport_name(),
            transport.endpoint()
        ));

        let queue = if config.enable_queue {
            let queue = OffloadQueue::from_config(config.queue.clone(), logger.clone())
                .map_err(|e| ConfigurationError::invalid("queue.store", e.to_string()))?;
            logger.info(format!("Queue is enabled: {}", queue.name()));
            Some(queue)
        } else {
            None
        };

        Ok(Self {
            idempotency: IdempotencyPolicy::from_config(&config.idempotency),
            transport: Arc::new(transport),
            queue,
            logger,
            config,
        })
    }

    // ===================================================================================
    // ACCESSORS
    // ===================================================================================

    pub fn config(&self) -> &CentrifugoConfig {
        &self.config
    }

    pub fn mode(&self) -> TransportMode {
        self.transport.mode()
    }

    /// The transport all calls go through
    pub fn client(&self) -> &UnifiedTransport {
        &self.transport
    }

    /// The offload queue, when enabled
    pub fn queue(&self) -> Option<&OffloadQueue> {
        self.queue.as_ref()
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn idempotency(&self) -> &IdempotencyPolicy {
        &self.idempotency
    }

    pub fn set_log_level(&self, level: LogLevel) {
        self.logger.set_level(level);
    }

    /// Debug mode logs everything; turning it off restores the configured level
    pub fn set_debug(&self, debug: bool) {
        if debug {
            self.logger.set_enabled(true);
            self.logger.set_level(LogLevel::Debug);
        } else {
            self.logger.set_enabled(self.config.log.enabled);
            self.logger.set_level(self.config.log.level);
        }
    }

    fn require_queue(&self) -> CentrifugoResult<&OffloadQueue> {
        self.queue
            .as_ref()
            .ok_or(CentrifugoError::Configuration(ConfigurationError::QueueDisabled))
    }

    // ===================================================================================
    // QUEUE LIFECYCLE
    // ===================================================================================

    /// Start the queue worker.
    ///
    /// Without a handler, jobs are replayed against this facade's transport.
    pub async fn start_worker(&self, handler: Option<Arc<dyn JobHandler>>) -> CentrifugoResult<()> {
        let queue = self.require_queue()?;
        let handler = handler.unwrap_or_else(|| {
            let transport: Arc<dyn CentrifugoTransport> = self.transport.clone();
            Arc::new(TransportJobHandler::new(transport))
        });
        queue
            .start_worker(handler)
            .await
            .map_err(CentrifugoError::Queue)?;
        self.logger.info(format!("Queue worker started on '{}'", queue.name()));
        Ok(())
    }

    /// Completion, retry and failure events of queued jobs
    pub fn queue_events(&self) -> CentrifugoResult<broadcast::Receiver<QueueEvent>> {
        Ok(self.require_queue()?.subscribe())
    }

    /// Stop the worker (if any) and release the queue store. Idempotent.
    pub async fn close(&self) {
        self.logger.info("Closing Centrifugo SDK");
        if let Some(queue) = &self.queue {
            queue.close().await;
        }
    }

    // ===================================================================================
    // DISPATCH
    // ===================================================================================

    /// Queue `request` as a job, or await `direct` when there is no queue.
    ///
    /// `direct` is only polled on the synchronous path.
    async fn dispatch<R, T, F>(
        &self,
        method: OperationKind,
        request: &R,
        outcome: Outcome,
        direct: F,
    ) -> CentrifugoResult<Dispatched<T>>
    where
        R: Serialize + Sync,
        F: Future<Output = TransportResult<T>> + Send,
    {
        let Some(queue) = &self.queue else {
            return match direct.await {
                Ok(result) => {
                    self.logger.info(outcome.applied);
                    Ok(Dispatched::Applied(result))
                }
                Err(e) => {
                    self.logger
                        .error_with(outcome.failed, json!({ "error": e.to_string() }));
                    Err(e.into())
                }
            };
        };

        let submitted = async {
            let job = QueueJob::new(method, request)?;
            let enqueued_at = job.enqueued_at;
            let idempotency_key = job.idempotency_key().map(str::to_string);
            let job_id = queue.submit(job).await?;
            Ok::<_, QueueError>(JobReceipt {
                job_id,
                method,
                idempotency_key,
                enqueued_at,
            })
        };

        match submitted.await {
            Ok(receipt) => {
                self.logger
                    .info_with(outcome.queued, json!({ "job_id": receipt.job_id }));
                Ok(Dispatched::Accepted(receipt))
            }
            Err(e) => {
                self.logger
                    .error_with(outcome.failed, json!({ "error": e.to_string() }));
                Err(CentrifugoError::QueueSubmit(e))
            }
        }
    }

    /// Await a read call, logging failures
    async fn read<T>(
        &self,
        operation: OperationKind,
        call: impl Future<Output = TransportResult<T>>,
    ) -> CentrifugoResult<T> {
        self.logger.debug(format!("Running {operation}"));
        call.await.map_err(|e| {
            self.logger.error_with(
                format!("Failed to run {operation}"),
                json!({ "error": e.to_string() }),
            );
            e.into()
        })
    }

    fn resolve_key(
        &self,
        method: OperationKind,
        channels: Vec<String>,
        data: &Value,
        supplied: Option<String>,
    ) -> CentrifugoResult<Option<String>> {
        let operation = Operation::new(method, channels, data.clone());
        self.idempotency.resolve(&operation, supplied)
    }

    // ===================================================================================
    // MUTATING OPERATIONS
    // ===================================================================================

    /// Publish `data` to `channel`
    pub async fn publish(
        &self,
        channel: impl Into<String>,
        data: Value,
    ) -> CentrifugoResult<Dispatched<PublishResult>> {
        self.publish_with(PublishRequest::new(channel, data)).await
    }

    /// Publish with explicit options (idempotency key, tags, history)
    pub async fn publish_with(
        &self,
        mut request: PublishRequest,
    ) -> CentrifugoResult<Dispatched<PublishResult>> {
        require("channel", &request.channel)?;
        request.idempotency_key = self.resolve_key(
            OperationKind::Publish,
            vec![request.channel.clone()],
            &request.data,
            request.idempotency_key.take(),
        )?;

        let channel = &request.channel;
        self.logger
            .debug(format!("Publishing message to channel: {channel}"));
        let outcome = Outcome {
            queued: format!("Job queued for publishing to {channel}"),
            applied: format!("Message published to {channel}"),
            failed: format!("Failed to publish to {channel}"),
        };
        self.dispatch(
            OperationKind::Publish,
            &request,
            outcome,
            self.transport.publish(&request),
        )
        .await
    }

    /// Publish `data` to every channel in `channels`
    pub async fn broadcast<I, S>(
        &self,
        channels: I,
        data: Value,
    ) -> CentrifugoResult<Dispatched<BroadcastResult>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.broadcast_with(BroadcastRequest::new(channels, data))
            .await
    }

    pub async fn broadcast_with(
        &self,
        mut request: BroadcastRequest,
    ) -> CentrifugoResult<Dispatched<BroadcastResult>> {
        if request.channels.is_empty() {
            return Err(CentrifugoError::invalid_request(
                "broadcast needs at least one channel",
            ));
        }
        for channel in &request.channels {
            require("channel", channel)?;
        }
        request.idempotency_key = self.resolve_key(
            OperationKind::Broadcast,
            request.channels.clone(),
            &request.data,
            request.idempotency_key.take(),
        )?;

        let channels = request.channels.join(", ");
        self.logger.debug(format!(
            "Broadcasting message to {} channels",
            request.channels.len()
        ));
        let outcome = Outcome {
            queued: format!("Job queued for broadcasting to channels: {channels}"),
            applied: format!("Broadcast sent to channels: {channels}"),
            failed: "Failed to broadcast to channels".to_string(),
        };
        self.dispatch(
            OperationKind::Broadcast,
            &request,
            outcome,
            self.transport.broadcast(&request),
        )
        .await
    }

    /// Subscribe a user to a channel on the server side
    pub async fn subscribe(&self, request: SubscribeRequest) -> CentrifugoResult<Dispatched<()>> {
        require("user", &request.user)?;
        require("channel", &request.channel)?;

        let (user, channel) = (&request.user, &request.channel);
        let outcome = Outcome {
            queued: format!("Job queued for subscribing user {user} to {channel}"),
            applied: format!("User {user} subscribed to {channel}"),
            failed: format!("Failed to subscribe user {user} to {channel}"),
        };
        self.dispatch(
            OperationKind::Subscribe,
            &request,
            outcome,
            self.transport.subscribe(&request),
        )
        .await
    }

    /// Unsubscribe a user from `channel`, or from all channels
    pub async fn unsubscribe(
        &self,
        user: impl Into<String>,
        channel: Option<&str>,
    ) -> CentrifugoResult<Dispatched<()>> {
        self.unsubscribe_with(UnsubscribeRequest::new(user, channel.map(str::to_string)))
            .await
    }

    pub async fn unsubscribe_with(
        &self,
        request: UnsubscribeRequest,
    ) -> CentrifugoResult<Dispatched<()>> {
        require("user", &request.user)?;

        let user = &request.user;
        let target = request.channel.as_deref().unwrap_or("all channels");
        let outcome = Outcome {
            queued: format!("Job queued for unsubscribing user {user} from {target}"),
            applied: format!("User {user} unsubscribed from {target}"),
            failed: format!("Failed to unsubscribe user {user}"),
        };
        self.dispatch(
            OperationKind::Unsubscribe,
            &request,
            outcome,
            self.transport.unsubscribe(&request),
        )
        .await
    }

    /// Disconnect all connections of a user
    pub async fn disconnect(
        &self,
        user: impl Into<String>,
        reconnect: bool,
    ) -> CentrifugoResult<Dispatched<()>> {
        self.disconnect_with(DisconnectRequest::new(user, reconnect))
            .await
    }

    pub async fn disconnect_with(
        &self,
        request: DisconnectRequest,
    ) -> CentrifugoResult<Dispatched<()>> {
        require("user", &request.user)?;

        let user = &request.user;
        let outcome = Outcome {
            queued: format!("Job queued for disconnecting user {user}"),
            applied: format!("User {user} disconnected"),
            failed: format!("Failed to disconnect user {user}"),
        };
        self.dispatch(
            OperationKind::Disconnect,
            &request,
            outcome,
            self.transport.disconnect(&request),
        )
        .await
    }

    /// Refresh a user connection (prolong or expire it)
    pub async fn refresh(&self, request: RefreshRequest) -> CentrifugoResult<Dispatched<()>> {
        require("user", &request.user)?;

        let user = &request.user;
        let outcome = Outcome {
            queued: format!("Job queued for refreshing user {user}"),
            applied: format!("Connection refreshed for user {user}"),
            failed: format!("Failed to refresh connection for user {user}"),
        };
        self.dispatch(
            OperationKind::Refresh,
            &request,
            outcome,
            self.transport.refresh(&request),
        )
        .await
    }

    /// Remove channel history. Always runs synchronously.
    pub async fn history_remove(&self, channel: &str) -> CentrifugoResult<()> {
        require("channel", channel)?;
        match self.transport.history_remove(channel).await {
            Ok(()) => {
                self.logger
                    .info(format!("History removed for channel {channel}"));
                Ok(())
            }
            Err(e) => {
                self.logger.error_with(
                    format!("Failed to remove history for channel {channel}"),
                    json!({ "error": e.to_string() }),
                );
                Err(e.into())
            }
        }
    }

    // ===================================================================================
    // READ OPERATIONS
    // ===================================================================================

    pub async fn history(&self, request: HistoryRequest) -> CentrifugoResult<HistoryResult> {
        require("channel", &request.channel)?;
        self.read(OperationKind::History, self.transport.history(&request))
            .await
    }

    pub async fn presence(&self, channel: &str) -> CentrifugoResult<PresenceMap> {
        require("channel", channel)?;
        self.read(OperationKind::Presence, self.transport.presence(channel))
            .await
    }

    pub async fn presence_stats(&self, channel: &str) -> CentrifugoResult<PresenceStats> {
        require("channel", channel)?;
        self.read(
            OperationKind::PresenceStats,
            self.transport.presence_stats(channel),
        )
        .await
    }

    /// Active channels, optionally filtered by a pattern
    pub async fn channels(&self, pattern: Option<&str>) -> CentrifugoResult<ChannelMap> {
        let request = ChannelsRequest {
            pattern: pattern.map(str::to_string),
        };
        self.read(OperationKind::Channels, self.transport.channels(&request))
            .await
    }

    pub async fn info(&self) -> CentrifugoResult<ServerInfo> {
        self.read(OperationKind::Info, self.transport.info()).await
    }

    // ===================================================================================
    // BATCH
    // ===================================================================================

    /// Send several commands in one request.
    ///
    /// Always runs synchronously, with or without the queue. Publish and
    /// broadcast commands get idempotency keys like their standalone calls.
    /// A rejected command does not fail the batch; check
    /// [`BatchResult::replies`].
    pub async fn batch(&self, mut request: BatchRequest) -> CentrifugoResult<BatchResult> {
        if request.is_empty() {
            return Err(CentrifugoError::invalid_request(
                "batch needs at least one command",
            ));
        }
        for command in &mut request.commands {
            match command {
                BatchCommand::Publish(publish) => {
                    require("channel", &publish.channel)?;
                    publish.idempotency_key = self.resolve_key(
                        OperationKind::Publish,
                        vec![publish.channel.clone()],
                        &publish.data,
                        publish.idempotency_key.take(),
                    )?;
                }
                BatchCommand::Broadcast(broadcast) => {
                    if broadcast.channels.is_empty() {
                        return Err(CentrifugoError::invalid_request(
                            "broadcast needs at least one channel",
                        ));
                    }
                    broadcast.idempotency_key = self.resolve_key(
                        OperationKind::Broadcast,
                        broadcast.channels.clone(),
                        &broadcast.data,
                        broadcast.idempotency_key.take(),
                    )?;
                }
                _ => {}
            }
        }

        let count = request.len();
        self.logger
            .debug(format!("Sending batch of {count} commands"));
        match self.transport.batch(&request).await {
            Ok(result) => {
                let failures = result.failures();
                if failures == 0 {
                    self.logger.info(format!("Batch of {count} commands applied"));
                } else {
                    let errors: Vec<String> = result
                        .replies
                        .iter()
                        .filter_map(|r| r.as_ref().err().map(ToString::to_string))
                        .collect();
                    self.logger.warn_with(
                        format!("Batch applied with {failures} of {count} commands failed"),
                        json!({ "errors": errors }),
                    );
                }
                Ok(result)
            }
            Err(e) => {
                self.logger
                    .error_with("Failed to send batch", json!({ "error": e.to_string() }));
                Err(e.into())
            }
        }
    }
}
