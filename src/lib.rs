#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, gRPC in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Centrifugo SDK
//!
//! Server-side client for the Centrifugo real-time messaging server.
//!
//! ## Overview
//!
//! One facade issues server API operations (publish, broadcast, subscribe,
//! presence, disconnect, ...) through either of two interchangeable
//! transports, HTTP/JSON or gRPC/protobuf. Mutating operations can instead be
//! offloaded to a durable job queue and executed by a background worker with
//! retries and backoff.
//!
//! ## Architecture
//!
//! ```text
//! caller → Centrifugo ─┬─→ UnifiedTransport (HTTP | gRPC)          → server
//!                      └─→ OffloadQueue.submit → store (pgmq | memory)
//!                                 worker.claim → TransportJobHandler → server
//! ```
//!
//! The idempotency policy runs before the path is chosen, so a queued
//! publish and its retries all carry the same deduplication key.
//!
//! ## Module Organization
//!
//! - [`client`] - The [`Centrifugo`] facade and the default job handler
//! - [`transport`] - HTTP and gRPC transports behind one trait
//! - [`queue`] - Offload queue, job stores and the worker
//! - [`idempotency`] - Idempotency key policy and generators
//! - [`logging`] - Leveled logger and `tracing` setup
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Structured error handling
//! - [`types`] - Operation, request and result types
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use centrifugo_sdk::queue::PostgresStoreConfig;
//! use centrifugo_sdk::{Centrifugo, CentrifugoConfig, HistoryRequest, QueueConfig};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! centrifugo_sdk::logging::init_structured_logging();
//!
//! let config = CentrifugoConfig::http("http://localhost:8000")
//!     .with_api_key("secret")
//!     .with_queue(QueueConfig::postgres(PostgresStoreConfig::from_url(
//!         "postgresql://localhost/centrifugo",
//!     )));
//! let centrifugo = Centrifugo::new(config).await?;
//! centrifugo.start_worker(None).await?;
//!
//! // durably queued; applied by the worker
//! let receipt = centrifugo.publish("chat", json!({"msg": "hi"})).await?;
//! println!("{receipt:?}");
//!
//! // reads always go straight to the server
//! let history = centrifugo.history(HistoryRequest::new("chat").with_limit(10)).await?;
//! println!("{} publications", history.publications.len());
//!
//! centrifugo.close().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod logging;
pub mod queue;
pub mod transport;
pub mod types;

pub use client::{Centrifugo, Dispatched, TransportJobHandler};
pub use config::{CentrifugoConfig, TransportMode};
pub use error::{
    CentrifugoError, CentrifugoResult, ConfigurationError, JobError, QueueError, TransportCause,
    TransportError,
};
pub use idempotency::{IdempotencyConfig, IdempotencyPolicy, KeyStrategy};
pub use logging::{LogLevel, LogOption, Logger};
pub use queue::{JobHandler, JobReceipt, OffloadQueue, QueueConfig, QueueEvent};
pub use transport::{CentrifugoTransport, UnifiedTransport};
pub use types::{
    BatchCommand, BatchReply, BatchRequest, BatchResult, BroadcastRequest, BroadcastResult,
    ChannelsRequest, DisconnectRequest, HistoryRequest, HistoryResult, OperationKind,
    PublishRequest, PublishResult, RefreshRequest, SubscribeRequest, UnsubscribeRequest,
};
