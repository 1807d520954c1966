//! In-process gRPC server for the `CentrifugoApi` service.
//!
//! Requests are turned into the JSON bodies the HTTP API takes and answered
//! by a `MockState`, so both mocks behave alike. Methods are routed by hand
//! over `tonic::server::Grpc` with the crate's own prost messages. Accepted
//! TCP connections are counted.

use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::future::{ready, Ready};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use centrifugo_sdk::transport::grpc::proto;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tonic::body::{empty_body, BoxBody};
use tonic::codec::ProstCodec;
use tonic::codegen::{http, Body, BoxFuture, Service, StdError};
use tonic::server::{Grpc, NamedService, UnaryService};
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use super::mock_centrifugo::{ApiOutcome, RecordedRequest, Rejection, SharedState};

/// Payload bytes that are not JSON
const CORRUPT_PAYLOAD: &[u8] = b"{not json";

// =============================================================================
// Requests to JSON bodies
// =============================================================================

fn payload(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap_or(Value::Null)
}

fn with_key(mut body: Value, key: &str) -> Value {
    if !key.is_empty() {
        body["idempotency_key"] = json!(key);
    }
    body
}

fn publish_body(r: &proto::PublishRequest) -> Value {
    with_key(
        json!({ "channel": r.channel, "data": payload(&r.data), "tags": r.tags }),
        &r.idempotency_key,
    )
}

fn broadcast_body(r: &proto::BroadcastRequest) -> Value {
    with_key(
        json!({ "channels": r.channels, "data": payload(&r.data), "tags": r.tags }),
        &r.idempotency_key,
    )
}

fn subscribe_body(r: &proto::SubscribeRequest) -> Value {
    json!({ "user": r.user, "channel": r.channel })
}

fn unsubscribe_body(r: &proto::UnsubscribeRequest) -> Value {
    json!({ "user": r.user, "channel": r.channel })
}

fn disconnect_body(r: &proto::DisconnectRequest) -> Value {
    let disconnect = r.disconnect.clone().unwrap_or_default();
    json!({
        "user": r.user,
        "disconnect": { "code": disconnect.code, "reason": disconnect.reason },
    })
}

fn refresh_body(r: &proto::RefreshRequest) -> Value {
    json!({ "user": r.user, "expire_at": r.expire_at })
}

fn channel_body(r: &proto::ChannelRequest) -> Value {
    json!({ "channel": r.channel })
}

fn history_body(r: &proto::HistoryRequest) -> Value {
    json!({ "channel": r.channel, "limit": r.limit, "reverse": r.reverse })
}

fn channels_body(r: &proto::ChannelsRequest) -> Value {
    json!({ "pattern": r.pattern })
}

fn command_body(c: &proto::Command) -> Value {
    let (method, body) = if let Some(r) = &c.publish {
        ("publish", publish_body(r))
    } else if let Some(r) = &c.broadcast {
        ("broadcast", broadcast_body(r))
    } else if let Some(r) = &c.subscribe {
        ("subscribe", subscribe_body(r))
    } else if let Some(r) = &c.unsubscribe {
        ("unsubscribe", unsubscribe_body(r))
    } else if let Some(r) = &c.disconnect {
        ("disconnect", disconnect_body(r))
    } else if let Some(r) = &c.refresh {
        ("refresh", refresh_body(r))
    } else if let Some(r) = &c.history_remove {
        ("history_remove", channel_body(r))
    } else if let Some(r) = &c.history {
        ("history", history_body(r))
    } else if let Some(r) = &c.presence {
        ("presence", channel_body(r))
    } else if let Some(r) = &c.presence_stats {
        ("presence_stats", channel_body(r))
    } else if let Some(r) = &c.channels {
        ("channels", channels_body(r))
    } else {
        ("info", json!({}))
    };
    let mut command = Map::new();
    command.insert(method.to_string(), body);
    Value::Object(command)
}

fn batch_body(r: &proto::BatchRequest) -> Value {
    let commands: Vec<Value> = r.commands.iter().map(command_body).collect();
    json!({ "commands": commands, "parallel": r.parallel })
}

// =============================================================================
// JSON results to messages
// =============================================================================

fn u64_of(v: &Value, key: &str) -> u64 {
    v.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn u32_of(v: &Value, key: &str) -> u32 {
    u32::try_from(u64_of(v, key)).unwrap_or(u32::MAX)
}

fn str_of(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn entries<'a>(v: &'a Value, key: &str) -> impl Iterator<Item = (&'a String, &'a Value)> {
    v.get(key).and_then(Value::as_object).into_iter().flatten()
}

fn items<'a>(v: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    v.get(key).and_then(Value::as_array).into_iter().flatten()
}

fn api_error(v: &Value) -> proto::ApiError {
    proto::ApiError {
        code: u32_of(v, "code"),
        message: str_of(v, "message"),
        temporary: false,
    }
}

fn publish_result(v: &Value) -> proto::PublishResult {
    proto::PublishResult {
        offset: u64_of(v, "offset"),
        epoch: str_of(v, "epoch"),
    }
}

fn broadcast_result(v: &Value) -> proto::BroadcastResult {
    proto::BroadcastResult {
        responses: items(v, "responses")
            .map(|item| proto::PublishResponse {
                error: item.get("error").map(api_error),
                result: item.get("result").map(publish_result),
            })
            .collect(),
    }
}

fn history_result(v: &Value, corrupt: bool) -> proto::HistoryResult {
    proto::HistoryResult {
        publications: items(v, "publications")
            .map(|publication| proto::Publication {
                data: if corrupt {
                    CORRUPT_PAYLOAD.to_vec()
                } else {
                    serde_json::to_vec(&publication["data"]).unwrap()
                },
                info: None,
                offset: u64_of(publication, "offset"),
                tags: entries(publication, "tags")
                    .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string()))
                    .collect::<BTreeMap<_, _>>(),
            })
            .collect(),
        epoch: str_of(v, "epoch"),
        offset: u64_of(v, "offset"),
    }
}

fn presence_result(v: &Value) -> proto::PresenceResult {
    proto::PresenceResult {
        presence: entries(v, "presence")
            .map(|(id, info)| {
                let info = proto::ClientInfo {
                    user: str_of(info, "user"),
                    client: str_of(info, "client"),
                    conn_info: Vec::new(),
                    chan_info: Vec::new(),
                };
                (id.clone(), info)
            })
            .collect::<HashMap<_, _>>(),
    }
}

fn presence_stats_result(v: &Value) -> proto::PresenceStatsResult {
    proto::PresenceStatsResult {
        num_clients: u32_of(v, "num_clients"),
        num_users: u32_of(v, "num_users"),
    }
}

fn channels_result(v: &Value) -> proto::ChannelsResult {
    proto::ChannelsResult {
        channels: entries(v, "channels")
            .map(|(name, info)| {
                let info = proto::ChannelInfo {
                    num_clients: u32_of(info, "num_clients"),
                };
                (name.clone(), info)
            })
            .collect(),
    }
}

fn info_result(v: &Value) -> proto::InfoResult {
    proto::InfoResult {
        nodes: items(v, "nodes")
            .map(|node| proto::NodeResult {
                uid: str_of(node, "uid"),
                name: str_of(node, "name"),
                version: str_of(node, "version"),
                num_clients: u32_of(node, "num_clients"),
                num_users: u32_of(node, "num_users"),
                num_channels: u32_of(node, "num_channels"),
                uptime: u32_of(node, "uptime"),
                num_subs: u32_of(node, "num_subs"),
            })
            .collect(),
    }
}

fn batch_reply(reply: &Value, corrupt: bool) -> proto::Reply {
    let mut message = proto::Reply::default();
    if let Some(error) = reply.get("error") {
        message.error = Some(api_error(error));
        return message;
    }
    let Some((method, result)) = reply.as_object().and_then(|r| r.iter().next()) else {
        return message;
    };
    let empty = Some(proto::EmptyResult {});
    match method.as_str() {
        "publish" => message.publish = Some(publish_result(result)),
        "broadcast" => message.broadcast = Some(broadcast_result(result)),
        "subscribe" => message.subscribe = empty,
        "unsubscribe" => message.unsubscribe = empty,
        "disconnect" => message.disconnect = empty,
        "refresh" => message.refresh = empty,
        "history_remove" => message.history_remove = empty,
        "history" => message.history = Some(history_result(result, corrupt)),
        "presence" => message.presence = Some(presence_result(result)),
        "presence_stats" => message.presence_stats = Some(presence_stats_result(result)),
        "channels" => message.channels = Some(channels_result(result)),
        "info" => message.info = Some(info_result(result)),
        _ => {}
    }
    message
}

/// `{error, result}` response messages
trait Envelope {
    type Result;

    fn from_parts(error: Option<proto::ApiError>, result: Option<Self::Result>) -> Self;
}

macro_rules! envelope {
    ($($name:ident => $result:ident),+ $(,)?) => {
        $(
            impl Envelope for proto::$name {
                type Result = proto::$result;

                fn from_parts(error: Option<proto::ApiError>, result: Option<Self::Result>) -> Self {
                    Self { error, result }
                }
            }
        )+
    };
}

envelope! {
    PublishResponse => PublishResult,
    BroadcastResponse => BroadcastResult,
    SubscribeResponse => EmptyResult,
    UnsubscribeResponse => EmptyResult,
    DisconnectResponse => EmptyResult,
    RefreshResponse => EmptyResult,
    HistoryRemoveResponse => EmptyResult,
    HistoryResponse => HistoryResult,
    PresenceResponse => PresenceResult,
    PresenceStatsResponse => PresenceStatsResult,
    ChannelsResponse => ChannelsResult,
    InfoResponse => InfoResult,
}

fn envelope<E: Envelope>(outcome: ApiOutcome, convert: impl FnOnce(&Value) -> E::Result) -> E {
    match outcome {
        Ok(result) => E::from_parts(None, Some(convert(&result))),
        Err((code, message)) => E::from_parts(
            Some(proto::ApiError {
                code,
                message,
                temporary: false,
            }),
            None,
        ),
    }
}

// =============================================================================
// Service
// =============================================================================

struct Inner {
    state: SharedState,
    corrupt_payloads: AtomicBool,
}

impl Inner {
    fn answer<T>(&self, method: &str, request: &Request<T>, body: Value) -> Result<ApiOutcome, Status> {
        let authorization = request
            .metadata()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.state
            .lock()
            .handle(method, body, authorization)
            .map_err(|rejection| match rejection {
                Rejection::Unauthorized => Status::unauthenticated("unauthorized"),
                Rejection::Injected => Status::internal("injected failure"),
            })
    }

    fn corrupt(&self) -> bool {
        self.corrupt_payloads.load(Ordering::SeqCst)
    }
}

/// Unary method backed by a closure
struct Unary<F>(F);

impl<Req, Resp, F> UnaryService<Req> for Unary<F>
where
    F: FnMut(Request<Req>) -> Result<Resp, Status>,
{
    type Response = Resp;
    type Future = Ready<Result<Response<Resp>, Status>>;

    fn call(&mut self, request: Request<Req>) -> Self::Future {
        ready((self.0)(request).map(Response::new))
    }
}

fn respond<Req, Resp, B, F>(
    request: http::Request<B>,
    handler: F,
) -> BoxFuture<http::Response<BoxBody>, Infallible>
where
    Req: prost::Message + Default + Send + 'static,
    Resp: prost::Message + Send + 'static,
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
    F: FnMut(Request<Req>) -> Result<Resp, Status> + Send + 'static,
{
    Box::pin(async move {
        let mut grpc = Grpc::new(ProstCodec::<Resp, Req>::default());
        Ok(grpc.unary(Unary(handler), request).await)
    })
}

fn unimplemented() -> http::Response<BoxBody> {
    let mut response = http::Response::new(empty_body());
    let headers = response.headers_mut();
    headers.insert(
        "grpc-status",
        http::HeaderValue::from(tonic::Code::Unimplemented as i32),
    );
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/grpc"),
    );
    response
}

#[derive(Clone)]
struct CentrifugoApi {
    inner: Arc<Inner>,
}

impl NamedService for CentrifugoApi {
    const NAME: &'static str = proto::SERVICE;
}

impl<B> Service<http::Request<B>> for CentrifugoApi
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<BoxBody>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<B>) -> Self::Future {
        let api = self.inner.clone();
        let method = request
            .uri()
            .path()
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();

        match method.as_str() {
            "Publish" => respond(request, move |r: Request<proto::PublishRequest>| {
                let outcome = api.answer("publish", &r, publish_body(r.get_ref()))?;
                Ok(envelope::<proto::PublishResponse>(outcome, publish_result))
            }),
            "Broadcast" => respond(request, move |r: Request<proto::BroadcastRequest>| {
                let outcome = api.answer("broadcast", &r, broadcast_body(r.get_ref()))?;
                Ok(envelope::<proto::BroadcastResponse>(outcome, broadcast_result))
            }),
            "Subscribe" => respond(request, move |r: Request<proto::SubscribeRequest>| {
                let outcome = api.answer("subscribe", &r, subscribe_body(r.get_ref()))?;
                Ok(envelope::<proto::SubscribeResponse>(outcome, |_| proto::EmptyResult {}))
            }),
            "Unsubscribe" => respond(request, move |r: Request<proto::UnsubscribeRequest>| {
                let outcome = api.answer("unsubscribe", &r, unsubscribe_body(r.get_ref()))?;
                Ok(envelope::<proto::UnsubscribeResponse>(outcome, |_| proto::EmptyResult {}))
            }),
            "Disconnect" => respond(request, move |r: Request<proto::DisconnectRequest>| {
                let outcome = api.answer("disconnect", &r, disconnect_body(r.get_ref()))?;
                Ok(envelope::<proto::DisconnectResponse>(outcome, |_| proto::EmptyResult {}))
            }),
            "Refresh" => respond(request, move |r: Request<proto::RefreshRequest>| {
                let outcome = api.answer("refresh", &r, refresh_body(r.get_ref()))?;
                Ok(envelope::<proto::RefreshResponse>(outcome, |_| proto::EmptyResult {}))
            }),
            "HistoryRemove" => respond(request, move |r: Request<proto::ChannelRequest>| {
                let outcome = api.answer("history_remove", &r, channel_body(r.get_ref()))?;
                Ok(envelope::<proto::HistoryRemoveResponse>(outcome, |_| proto::EmptyResult {}))
            }),
            "History" => respond(request, move |r: Request<proto::HistoryRequest>| {
                let outcome = api.answer("history", &r, history_body(r.get_ref()))?;
                let corrupt = api.corrupt();
                Ok(envelope::<proto::HistoryResponse>(outcome, |v| {
                    history_result(v, corrupt)
                }))
            }),
            "Presence" => respond(request, move |r: Request<proto::ChannelRequest>| {
                let outcome = api.answer("presence", &r, channel_body(r.get_ref()))?;
                Ok(envelope::<proto::PresenceResponse>(outcome, presence_result))
            }),
            "PresenceStats" => respond(request, move |r: Request<proto::ChannelRequest>| {
                let outcome = api.answer("presence_stats", &r, channel_body(r.get_ref()))?;
                Ok(envelope::<proto::PresenceStatsResponse>(outcome, presence_stats_result))
            }),
            "Channels" => respond(request, move |r: Request<proto::ChannelsRequest>| {
                let outcome = api.answer("channels", &r, channels_body(r.get_ref()))?;
                Ok(envelope::<proto::ChannelsResponse>(outcome, channels_result))
            }),
            "Info" => respond(request, move |r: Request<proto::InfoRequest>| {
                let outcome = api.answer("info", &r, json!({}))?;
                Ok(envelope::<proto::InfoResponse>(outcome, info_result))
            }),
            "Batch" => respond(request, move |r: Request<proto::BatchRequest>| {
                let outcome = api.answer("batch", &r, batch_body(r.get_ref()))?;
                let replies = outcome.map_err(|(_, message)| Status::invalid_argument(message))?;
                let corrupt = api.corrupt();
                Ok(proto::BatchResponse {
                    replies: items(&replies, "replies")
                        .map(|reply| batch_reply(reply, corrupt))
                        .collect(),
                })
            }),
            _ => Box::pin(async { Ok(unimplemented()) }),
        }
    }
}

// =============================================================================
// Server
// =============================================================================

/// Running gRPC mock bound to an ephemeral local port
pub struct MockGrpcCentrifugo {
    addr: SocketAddr,
    inner: Arc<Inner>,
    connections: Arc<AtomicUsize>,
    server: JoinHandle<()>,
}

impl MockGrpcCentrifugo {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind grpc mock");
        let addr = listener.local_addr().expect("grpc mock address");

        let connections = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();
        let incoming = futures::stream::unfold(listener, move |listener| {
            let counter = counter.clone();
            async move {
                let accepted = listener.accept().await.map(|(stream, _)| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    stream
                });
                Some((accepted, listener))
            }
        });

        let inner = Arc::new(Inner {
            state: SharedState::default(),
            corrupt_payloads: AtomicBool::new(false),
        });
        let api = CentrifugoApi {
            inner: inner.clone(),
        };
        let server = tokio::spawn(async move {
            let mut builder = Server::builder();
            builder
                .add_service(api)
                .serve_with_incoming(Box::pin(incoming))
                .await
                .expect("grpc mock server");
        });

        Self {
            addr,
            inner,
            connections,
            server,
        }
    }

    /// Bare `host:port`, as gRPC endpoints are usually configured
    pub fn endpoint(&self) -> String {
        self.addr.to_string()
    }

    /// TCP connections accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Send history payloads that are not JSON
    pub fn corrupt_payloads(&self) {
        self.inner.corrupt_payloads.store(true, Ordering::SeqCst);
    }

    pub fn state(&self) -> &SharedState {
        &self.inner.state
    }

    pub fn fail(&self, method: &str, times: u32) {
        self.inner.state.lock().inject_failure(method, times, false);
    }

    pub fn reject_channel(&self, channel: &str) {
        self.inner.state.lock().reject_channel(channel);
    }

    pub fn history_len(&self, channel: &str) -> usize {
        self.inner.state.lock().history_len(channel)
    }

    pub fn requests_for(&self, method: &str) -> Vec<RecordedRequest> {
        self.inner.state.lock().requests_for(method)
    }
}

impl Drop for MockGrpcCentrifugo {
    fn drop(&mut self) {
        self.server.abort();
    }
}
