//! # gRPC Transport
//!
//! Centrifugo server API over gRPC (`centrifugal.centrifugo.api.CentrifugoApi`).
//!
//! The channel is opened on the first call and shared afterwards. Concurrent
//! first callers wait on one connection attempt; a failed attempt is not
//! cached, so the next call tries again.
//!
//! ```rust,ignore
//! let transport = GrpcTransport::new(GrpcClientConfig::new("localhost:10000").with_api_key("key"));
//! let stats = transport.presence_stats("chat").await?;
//! ```

use std::fmt;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::service::interceptor::InterceptedService;
use tonic::transport::Channel;
use tracing::{debug, info};

use super::CentrifugoTransport;
use crate::error::{TransportError, TransportResult};
use crate::types::{
    BatchRequest, BatchResult, BroadcastRequest, BroadcastResult, ChannelMap, ChannelsRequest,
    DisconnectRequest, HistoryRequest, HistoryResult, OperationKind, PresenceMap, PresenceStats,
    PublishRequest, PublishResult, RefreshRequest, ServerInfo, SubscribeRequest,
    UnsubscribeRequest,
};

mod common;
pub mod conversions;
pub mod proto;

pub use common::{normalize_endpoint, status_error, AuthInterceptor, GrpcClientConfig};

use proto::ApiReply;

pub(crate) const TRANSPORT: &str = "grpc";

/// Method path for an operation on the Centrifugo API service
fn method_path(operation: OperationKind) -> &'static str {
    match operation {
        OperationKind::Publish => "/centrifugal.centrifugo.api.CentrifugoApi/Publish",
        OperationKind::Broadcast => "/centrifugal.centrifugo.api.CentrifugoApi/Broadcast",
        OperationKind::Subscribe => "/centrifugal.centrifugo.api.CentrifugoApi/Subscribe",
        OperationKind::Unsubscribe => "/centrifugal.centrifugo.api.CentrifugoApi/Unsubscribe",
        OperationKind::Disconnect => "/centrifugal.centrifugo.api.CentrifugoApi/Disconnect",
        OperationKind::Refresh => "/centrifugal.centrifugo.api.CentrifugoApi/Refresh",
        OperationKind::HistoryRemove => "/centrifugal.centrifugo.api.CentrifugoApi/HistoryRemove",
        OperationKind::History => "/centrifugal.centrifugo.api.CentrifugoApi/History",
        OperationKind::Presence => "/centrifugal.centrifugo.api.CentrifugoApi/Presence",
        OperationKind::PresenceStats => "/centrifugal.centrifugo.api.CentrifugoApi/PresenceStats",
        OperationKind::Channels => "/centrifugal.centrifugo.api.CentrifugoApi/Channels",
        OperationKind::Info => "/centrifugal.centrifugo.api.CentrifugoApi/Info",
        OperationKind::Batch => "/centrifugal.centrifugo.api.CentrifugoApi/Batch",
    }
}

/// Protobuf client for the server gRPC API
pub struct GrpcTransport {
    config: GrpcClientConfig,
    channel: OnceCell<Channel>,
}

impl fmt::Debug for GrpcTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrpcTransport")
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl GrpcTransport {
    /// Create the transport without connecting
    pub fn new(config: GrpcClientConfig) -> Self {
        Self {
            config,
            channel: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &GrpcClientConfig {
        &self.config
    }

    /// Whether the channel has been opened
    pub fn is_connected(&self) -> bool {
        self.channel.initialized()
    }

    async fn channel(&self, operation: OperationKind) -> TransportResult<Channel> {
        self.channel
            .get_or_try_init(|| async {
                let channel = self.config.connect().await?;
                info!(endpoint = %self.config.endpoint, "Connected to Centrifugo gRPC endpoint");
                Ok::<_, String>(channel)
            })
            .await
            .cloned()
            .map_err(|e| TransportError::network(operation, TRANSPORT, e))
    }

    /// One unary call returning the raw response message
    async fn unary<Req, Resp>(&self, operation: OperationKind, request: Req) -> TransportResult<Resp>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let channel = self.channel(operation).await?;
        let service =
            InterceptedService::new(channel, AuthInterceptor::new(self.config.api_key.clone()));
        let mut grpc = tonic::client::Grpc::new(service);

        grpc.ready()
            .await
            .map_err(|e| TransportError::network(operation, TRANSPORT, e.to_string()))?;

        debug!(operation = %operation, "Sending gRPC API request");
        let response = grpc
            .unary(
                tonic::Request::new(request),
                PathAndQuery::from_static(method_path(operation)),
                ProstCodec::<Req, Resp>::default(),
            )
            .await
            .map_err(|status| status_error(operation, status))?;
        Ok(response.into_inner())
    }

    /// Unary call unwrapped from the `{error, result}` envelope
    async fn call<Req, Resp>(
        &self,
        operation: OperationKind,
        request: Req,
    ) -> TransportResult<Option<Resp::Output>>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: ApiReply,
    {
        let reply: Resp = self.unary(operation, request).await?;
        let (error, result) = reply.into_parts();
        if let Some(err) = error.filter(|e| e.code != 0) {
            return Err(conversions::api_error(operation, err));
        }
        Ok(result)
    }

    /// Mutating call: the reply must carry a result
    async fn mutate<Req, Resp>(
        &self,
        operation: OperationKind,
        request: Req,
    ) -> TransportResult<Resp::Output>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: ApiReply,
    {
        self.call::<Req, Resp>(operation, request)
            .await?
            .ok_or_else(|| TransportError::missing_result(operation, TRANSPORT))
    }

    /// Read call: a missing result becomes the empty message
    async fn read<Req, Resp>(
        &self,
        operation: OperationKind,
        request: Req,
    ) -> TransportResult<Resp::Output>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: ApiReply,
        Resp::Output: Default,
    {
        Ok(self
            .call::<Req, Resp>(operation, request)
            .await?
            .unwrap_or_default())
    }
}

#[async_trait]
impl CentrifugoTransport for GrpcTransport {
    fn transport_name(&self) -> &'static str {
        TRANSPORT
    }

    fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    async fn publish(&self, request: &PublishRequest) -> TransportResult<PublishResult> {
        let message = conversions::publish_request(request)?;
        let result = self
            .mutate::<_, proto::PublishResponse>(OperationKind::Publish, message)
            .await?;
        Ok(conversions::publish_result(result))
    }

    async fn broadcast(&self, request: &BroadcastRequest) -> TransportResult<BroadcastResult> {
        let message = conversions::broadcast_request(request)?;
        let result = self
            .mutate::<_, proto::BroadcastResponse>(OperationKind::Broadcast, message)
            .await?;
        conversions::broadcast_result(result)
    }

    async fn subscribe(&self, request: &SubscribeRequest) -> TransportResult<()> {
        let message = conversions::subscribe_request(request)?;
        self.mutate::<_, proto::SubscribeResponse>(OperationKind::Subscribe, message)
            .await?;
        Ok(())
    }

    async fn unsubscribe(&self, request: &UnsubscribeRequest) -> TransportResult<()> {
        self.mutate::<_, proto::UnsubscribeResponse>(
            OperationKind::Unsubscribe,
            conversions::unsubscribe_request(request),
        )
        .await?;
        Ok(())
    }

    async fn disconnect(&self, request: &DisconnectRequest) -> TransportResult<()> {
        self.mutate::<_, proto::DisconnectResponse>(
            OperationKind::Disconnect,
            conversions::disconnect_request(request),
        )
        .await?;
        Ok(())
    }

    async fn refresh(&self, request: &RefreshRequest) -> TransportResult<()> {
        self.mutate::<_, proto::RefreshResponse>(
            OperationKind::Refresh,
            conversions::refresh_request(request),
        )
        .await?;
        Ok(())
    }

    async fn history_remove(&self, channel: &str) -> TransportResult<()> {
        self.mutate::<_, proto::HistoryRemoveResponse>(
            OperationKind::HistoryRemove,
            conversions::channel_request(channel),
        )
        .await?;
        Ok(())
    }

    async fn history(&self, request: &HistoryRequest) -> TransportResult<HistoryResult> {
        let result = self
            .read::<_, proto::HistoryResponse>(
                OperationKind::History,
                conversions::history_request(request),
            )
            .await?;
        conversions::history_result(result)
    }

    async fn presence(&self, channel: &str) -> TransportResult<PresenceMap> {
        let result = self
            .read::<_, proto::PresenceResponse>(
                OperationKind::Presence,
                conversions::channel_request(channel),
            )
            .await?;
        conversions::presence_result(result)
    }

    async fn presence_stats(&self, channel: &str) -> TransportResult<PresenceStats> {
        let result = self
            .read::<_, proto::PresenceStatsResponse>(
                OperationKind::PresenceStats,
                conversions::channel_request(channel),
            )
            .await?;
        Ok(conversions::presence_stats_result(result))
    }

    async fn channels(&self, request: &ChannelsRequest) -> TransportResult<ChannelMap> {
        let result = self
            .read::<_, proto::ChannelsResponse>(
                OperationKind::Channels,
                conversions::channels_request(request),
            )
            .await?;
        Ok(conversions::channels_result(result))
    }

    async fn info(&self) -> TransportResult<ServerInfo> {
        let result = self
            .read::<_, proto::InfoResponse>(OperationKind::Info, proto::InfoRequest {})
            .await?;
        Ok(conversions::info_result(result))
    }

    async fn batch(&self, request: &BatchRequest) -> TransportResult<BatchResult> {
        let message = conversions::batch_request(request)?;
        let response: proto::BatchResponse = self.unary(OperationKind::Batch, message).await?;
        Ok(BatchResult {
            replies: conversions::batch_replies(&request.commands, response),
        })
    }
}
