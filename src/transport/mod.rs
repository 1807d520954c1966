//! # Transport Abstraction
//!
//! One interface to the Centrifugo server API over either HTTP (JSON) or
//! gRPC (protobuf). Both adapters take the same typed requests, return the
//! same parsed results and map failures to the same [`TransportError`]
//! shapes, so callers and the queue worker never care which is in use.
//!
//! ```rust,ignore
//! let transport = UnifiedTransport::from_config(&config)?;
//! let result = transport.publish(&PublishRequest::new("news", json!({"a": 1}))).await?;
//! ```

use async_trait::async_trait;

use crate::config::{CentrifugoConfig, TransportMode};
use crate::error::{ConfigurationError, TransportResult};
use crate::types::{
    BatchRequest, BatchResult, BroadcastRequest, BroadcastResult, ChannelMap, ChannelsRequest,
    DisconnectRequest, HistoryRequest, HistoryResult, PresenceMap, PresenceStats, PublishRequest,
    PublishResult, RefreshRequest, ServerInfo, SubscribeRequest, UnsubscribeRequest,
};

pub mod grpc;
pub mod http;

pub use grpc::{GrpcClientConfig, GrpcTransport};
pub use http::HttpTransport;

/// Server API operations, independent of wire format.
///
/// Mutating calls fail if the reply has no result; read calls fall back to
/// empty results for missing fields.
#[async_trait]
pub trait CentrifugoTransport: Send + Sync {
    /// Transport name for logging and errors
    fn transport_name(&self) -> &'static str;

    /// Configured server address
    fn endpoint(&self) -> &str;

    // ===================================================================================
    // MUTATING OPERATIONS
    // ===================================================================================

    async fn publish(&self, request: &PublishRequest) -> TransportResult<PublishResult>;

    /// Publish to several channels; fails if any channel fails
    async fn broadcast(&self, request: &BroadcastRequest) -> TransportResult<BroadcastResult>;

    async fn subscribe(&self, request: &SubscribeRequest) -> TransportResult<()>;

    async fn unsubscribe(&self, request: &UnsubscribeRequest) -> TransportResult<()>;

    async fn disconnect(&self, request: &DisconnectRequest) -> TransportResult<()>;

    async fn refresh(&self, request: &RefreshRequest) -> TransportResult<()>;

    async fn history_remove(&self, channel: &str) -> TransportResult<()>;

    // ===================================================================================
    // READ OPERATIONS
    // ===================================================================================

    async fn history(&self, request: &HistoryRequest) -> TransportResult<HistoryResult>;

    async fn presence(&self, channel: &str) -> TransportResult<PresenceMap>;

    async fn presence_stats(&self, channel: &str) -> TransportResult<PresenceStats>;

    async fn channels(&self, request: &ChannelsRequest) -> TransportResult<ChannelMap>;

    async fn info(&self) -> TransportResult<ServerInfo>;

    // ===================================================================================
    // BATCH
    // ===================================================================================

    /// Send several commands in one request.
    ///
    /// `Err` means the request as a whole failed; per-command failures are
    /// reported in [`BatchResult::replies`].
    async fn batch(&self, request: &BatchRequest) -> TransportResult<BatchResult>;
}

/// The configured transport, chosen once at construction
#[derive(Debug)]
pub enum UnifiedTransport {
    Http(Box<HttpTransport>),
    Grpc(Box<GrpcTransport>),
}

impl UnifiedTransport {
    /// Build the transport selected by `config.mode`.
    ///
    /// Never connects: HTTP connects per request and gRPC opens its channel
    /// on first use.
    pub fn from_config(config: &CentrifugoConfig) -> Result<Self, ConfigurationError> {
        match config.mode {
            TransportMode::SyncHttp => Ok(Self::Http(Box::new(HttpTransport::from_config(config)?))),
            TransportMode::SyncRpc => Ok(Self::Grpc(Box::new(GrpcTransport::new(
                GrpcClientConfig::from_config(config)?,
            )))),
        }
    }

    pub fn mode(&self) -> TransportMode {
        match self {
            Self::Http(_) => TransportMode::SyncHttp,
            Self::Grpc(_) => TransportMode::SyncRpc,
        }
    }

    pub fn as_http(&self) -> Option<&HttpTransport> {
        match self {
            Self::Http(client) => Some(client),
            Self::Grpc(_) => None,
        }
    }

    pub fn as_grpc(&self) -> Option<&GrpcTransport> {
        match self {
            Self::Grpc(client) => Some(client),
            Self::Http(_) => None,
        }
    }

    fn inner(&self) -> &dyn CentrifugoTransport {
        match self {
            Self::Http(client) => client.as_ref(),
            Self::Grpc(client) => client.as_ref(),
        }
    }
}

#[async_trait]
impl CentrifugoTransport for UnifiedTransport {
    fn transport_name(&self) -> &'static str {
        self.inner().transport_name()
    }

    fn endpoint(&self) -> &str {
        self.inner().endpoint()
    }

    async fn publish(&self, request: &PublishRequest) -> TransportResult<PublishResult> {
        self.inner().publish(request).await
    }

    async fn broadcast(&self, request: &BroadcastRequest) -> TransportResult<BroadcastResult> {
        self.inner().broadcast(request).await
    }

    async fn subscribe(&self, request: &SubscribeRequest) -> TransportResult<()> {
        self.inner().subscribe(request).await
    }

    async fn unsubscribe(&self, request: &UnsubscribeRequest) -> TransportResult<()> {
        self.inner().unsubscribe(request).await
    }

    async fn disconnect(&self, request: &DisconnectRequest) -> TransportResult<()> {
        self.inner().disconnect(request).await
    }

    async fn refresh(&self, request: &RefreshRequest) -> TransportResult<()> {
        self.inner().refresh(request).await
    }

    async fn history_remove(&self, channel: &str) -> TransportResult<()> {
        self.inner().history_remove(channel).await
    }

    async fn history(&self, request: &HistoryRequest) -> TransportResult<HistoryResult> {
        self.inner().history(request).await
    }

    async fn presence(&self, channel: &str) -> TransportResult<PresenceMap> {
        self.inner().presence(channel).await
    }

    async fn presence_stats(&self, channel: &str) -> TransportResult<PresenceStats> {
        self.inner().presence_stats(channel).await
    }

    async fn channels(&self, request: &ChannelsRequest) -> TransportResult<ChannelMap> {
        self.inner().channels(request).await
    }

    async fn info(&self) -> TransportResult<ServerInfo> {
        self.inner().info().await
    }

    async fn batch(&self, request: &BatchRequest) -> TransportResult<BatchResult> {
        self.inner().batch(request).await
    }
}
