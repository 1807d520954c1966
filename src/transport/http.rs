//! # HTTP Transport
//!
//! Centrifugo server HTTP API: `POST {endpoint}/api/{method}` with a JSON
//! body, answered by `{"result": ...}` or `{"error": {"code", "message"}}`.
//! A batch is answered by `{"replies": [...]}` with one object per command.

use std::fmt;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use super::CentrifugoTransport;
use crate::config::CentrifugoConfig;
use crate::error::{ConfigurationError, TransportCause, TransportError, TransportResult};
use crate::types::{
    BatchCommand, BatchReply, BatchRequest, BatchResult, BroadcastRequest, BroadcastResult, ChannelMap, ChannelsRequest, DisconnectRequest,
    HistoryRequest, HistoryResult, OperationKind, PresenceMap, PresenceStats, PublishRequest,
    PublishResult, RefreshRequest, ServerInfo, SubscribeOverride, SubscribeRequest,
    UnsubscribeRequest,
};

const TRANSPORT: &str = "http";

/// Longest error body kept in a status error message
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    temporary: bool,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct BroadcastItem {
    #[serde(default)]
    error: Option<ApiErrorBody>,
    #[serde(default)]
    result: Option<PublishResult>,
}

#[derive(Debug, Deserialize)]
struct BroadcastWire {
    #[serde(default)]
    responses: Vec<BroadcastItem>,
}

#[derive(Debug, Default, Deserialize)]
struct PresenceWire {
    #[serde(default)]
    presence: PresenceMap,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelsWire {
    #[serde(default)]
    channels: ChannelMap,
}

fn api_error(operation: OperationKind, err: ApiErrorBody) -> TransportError {
    TransportError::new(
        operation,
        TRANSPORT,
        TransportCause::Api {
            code: err.code,
            message: err.message,
            temporary: err.temporary,
        },
    )
}

fn request_error(operation: OperationKind, err: reqwest::Error) -> TransportError {
    let cause = if err.is_builder() {
        TransportCause::InvalidRequest(err.to_string())
    } else if err.is_decode() {
        TransportCause::MalformedResponse(err.to_string())
    } else {
        TransportCause::Network(err.to_string())
    };
    TransportError::new(operation, TRANSPORT, cause)
}

fn truncate(mut text: String) -> String {
    if text.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

fn parse<T: DeserializeOwned>(operation: OperationKind, value: Value) -> TransportResult<T> {
    serde_json::from_value(value)
        .map_err(|e| TransportError::malformed(operation, TRANSPORT, e.to_string()))
}

/// Any per-channel error fails the whole broadcast
fn broadcast_result(wire: BroadcastWire) -> TransportResult<BroadcastResult> {
    let mut responses = Vec::with_capacity(wire.responses.len());
    for item in wire.responses {
        if let Some(err) = item.error.filter(|e| e.code != 0) {
            return Err(api_error(OperationKind::Broadcast, err));
        }
        responses.push(item.result.unwrap_or_default());
    }
    Ok(BroadcastResult { responses })
}

/// JSON client for the server HTTP API
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    has_api_key: bool,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("api_key", &self.has_api_key.then_some("[REDACTED]"))
            .finish()
    }
}

impl HttpTransport {
    pub fn from_config(config: &CentrifugoConfig) -> Result<Self, ConfigurationError> {
        let base_url = config.endpoint.trim().trim_end_matches('/').to_string();
        reqwest::Url::parse(&base_url).map_err(|e| {
            ConfigurationError::invalid("endpoint", format!("'{base_url}' is not a valid URL: {e}"))
        })?;

        let mut headers = HeaderMap::new();
        if let Some(api_key) = &config.api_key {
            let mut value = HeaderValue::from_str(&format!("apikey {api_key}"))
                .map_err(|e| ConfigurationError::invalid("api_key", e.to_string()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(concat!("centrifugo-sdk-rs/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| ConfigurationError::invalid("endpoint", e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            has_api_key: config.api_key.is_some(),
        })
    }

    fn url(&self, operation: OperationKind) -> String {
        format!("{}/api/{}", self.base_url, operation.as_str())
    }

    /// POST one API method and parse the JSON reply
    async fn post<B: Serialize + ?Sized>(
        &self,
        operation: OperationKind,
        body: &B,
    ) -> TransportResult<Value> {
        let url = self.url(operation);
        debug!(operation = %operation, url = %url, "Sending HTTP API request");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| request_error(operation, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| request_error(operation, e))?;

        if !status.is_success() {
            return Err(TransportError::new(
                operation,
                TRANSPORT,
                TransportCause::Status {
                    code: status.as_u16(),
                    message: truncate(text),
                },
            ));
        }

        serde_json::from_str(&text)
            .map_err(|e| TransportError::malformed(operation, TRANSPORT, e.to_string()))
    }

    /// One API method unwrapped from the envelope; `Ok(None)` means the
    /// reply had no result
    async fn call<B: Serialize + ?Sized>(
        &self,
        operation: OperationKind,
        body: &B,
    ) -> TransportResult<Option<Value>> {
        let reply = self.post(operation, body).await?;
        let envelope: ApiEnvelope = parse(operation, reply)?;

        if let Some(err) = envelope.error {
            if err.code != 0 {
                return Err(api_error(operation, err));
            }
        }
        Ok(envelope.result)
    }

    /// Mutating call: the reply must carry a result
    async fn mutate<B, T>(&self, operation: OperationKind, body: &B) -> TransportResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let result = self
            .call(operation, body)
            .await?
            .ok_or_else(|| TransportError::missing_result(operation, TRANSPORT))?;
        parse(operation, result)
    }

    /// Read call: a missing result becomes the empty value
    async fn read<B, T>(&self, operation: OperationKind, body: &B) -> TransportResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned + Default,
    {
        match self.call(operation, body).await? {
            Some(result) => parse(operation, result),
            None => Ok(T::default()),
        }
    }
}

fn wrap_bool(value: Option<bool>) -> Option<Value> {
    value.map(|v| json!({ "value": v }))
}

/// Override flags travel as `{"value": bool}` wrappers
fn override_body(overrides: &SubscribeOverride) -> Value {
    let mut map = Map::new();
    for (name, flag) in [
        ("presence", overrides.presence),
        ("join_leave", overrides.join_leave),
        ("force_push_join_leave", overrides.force_push_join_leave),
        ("force_positioning", overrides.force_positioning),
        ("force_recovery", overrides.force_recovery),
    ] {
        if let Some(value) = wrap_bool(flag) {
            map.insert(name.to_string(), value);
        }
    }
    Value::Object(map)
}

pub(crate) fn subscribe_body(request: &SubscribeRequest) -> Value {
    let mut body = json!({
        "user": request.user,
        "channel": request.channel,
    });
    let Some(map) = body.as_object_mut() else {
        return body;
    };
    if let Some(info) = &request.info {
        map.insert("info".into(), info.clone());
    }
    if let Some(client) = &request.client {
        map.insert("client".into(), json!(client));
    }
    if let Some(session) = &request.session {
        map.insert("session".into(), json!(session));
    }
    if let Some(data) = &request.data {
        map.insert("data".into(), data.clone());
    }
    if let Some(expire_at) = request.expire_at {
        map.insert("expire_at".into(), json!(expire_at));
    }
    if let Some(since) = &request.recover_since {
        map.insert("recover_since".into(), json!(since));
    }
    if let Some(overrides) = request.overrides.as_ref().filter(|o| !o.is_empty()) {
        map.insert("override".into(), override_body(overrides));
    }
    body
}

pub(crate) fn disconnect_body(request: &DisconnectRequest) -> Value {
    let (code, reason) = request.disconnect_code();
    let mut body = json!({
        "user": request.user,
        "disconnect": { "code": code, "reason": reason },
    });
    if let Some(map) = body.as_object_mut() {
        if let Some(client) = &request.client {
            map.insert("client".into(), json!(client));
        }
        if let Some(session) = &request.session {
            map.insert("session".into(), json!(session));
        }
    }
    body
}

fn to_body<T: Serialize>(operation: OperationKind, value: &T) -> TransportResult<Value> {
    serde_json::to_value(value).map_err(|e| {
        TransportError::new(operation, TRANSPORT, TransportCause::InvalidRequest(e.to_string()))
    })
}

/// A batched command travels as `{"<method>": <request body>}`
pub(crate) fn command_body(command: &BatchCommand) -> TransportResult<Value> {
    let operation = command.operation();
    let body = match command {
        BatchCommand::Publish(r) => to_body(operation, r)?,
        BatchCommand::Broadcast(r) => to_body(operation, r)?,
        BatchCommand::Subscribe(r) => subscribe_body(r),
        BatchCommand::Unsubscribe(r) => to_body(operation, r)?,
        BatchCommand::Disconnect(r) => disconnect_body(r),
        BatchCommand::Refresh(r) => to_body(operation, r)?,
        BatchCommand::History(r) => to_body(operation, r)?,
        BatchCommand::Channels(r) => to_body(operation, r)?,
        BatchCommand::HistoryRemove { channel }
        | BatchCommand::Presence { channel }
        | BatchCommand::PresenceStats { channel } => json!({ "channel": channel }),
        BatchCommand::Info => json!({}),
    };
    let mut map = Map::new();
    map.insert(operation.as_str().to_string(), body);
    Ok(Value::Object(map))
}

#[derive(Debug, Deserialize)]
struct BatchWire {
    #[serde(default)]
    error: Option<ApiErrorBody>,
    #[serde(default)]
    replies: Vec<Map<String, Value>>,
}

/// One reply object: `{"error": ...}` or `{"<method>": <result>}`
fn batch_reply(operation: OperationKind, mut reply: Map<String, Value>) -> TransportResult<BatchReply> {
    if let Some(error) = reply.remove("error") {
        let err: ApiErrorBody = parse(operation, error)?;
        if err.code != 0 {
            return Err(api_error(operation, err));
        }
    }
    let result = reply.remove(operation.as_str());
    let required = |result: Option<Value>| {
        result.ok_or_else(|| TransportError::missing_result(operation, TRANSPORT))
    };
    let reply = match operation {
        OperationKind::Publish => BatchReply::Publish(parse(operation, required(result)?)?),
        OperationKind::Broadcast => {
            BatchReply::Broadcast(broadcast_result(parse(operation, required(result)?)?)?)
        }
        OperationKind::Subscribe => {
            required(result)?;
            BatchReply::Subscribe
        }
        OperationKind::Unsubscribe => {
            required(result)?;
            BatchReply::Unsubscribe
        }
        OperationKind::Disconnect => {
            required(result)?;
            BatchReply::Disconnect
        }
        OperationKind::Refresh => {
            required(result)?;
            BatchReply::Refresh
        }
        OperationKind::HistoryRemove => {
            required(result)?;
            BatchReply::HistoryRemove
        }
        OperationKind::History => BatchReply::History(parse_or_default(operation, result)?),
        OperationKind::Presence => {
            let wire: PresenceWire = parse_or_default(operation, result)?;
            BatchReply::Presence(wire.presence)
        }
        OperationKind::PresenceStats => {
            BatchReply::PresenceStats(parse_or_default(operation, result)?)
        }
        OperationKind::Channels => {
            let wire: ChannelsWire = parse_or_default(operation, result)?;
            BatchReply::Channels(wire.channels)
        }
        OperationKind::Info => BatchReply::Info(parse_or_default(operation, result)?),
        OperationKind::Batch => {
            return Err(TransportError::malformed(
                operation,
                TRANSPORT,
                "batches do not nest",
            ))
        }
    };
    Ok(reply)
}

fn parse_or_default<T: DeserializeOwned + Default>(
    operation: OperationKind,
    value: Option<Value>,
) -> TransportResult<T> {
    value.map_or_else(|| Ok(T::default()), |v| parse(operation, v))
}

#[async_trait]
impl CentrifugoTransport for HttpTransport {
    fn transport_name(&self) -> &'static str {
        TRANSPORT
    }

    fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn publish(&self, request: &PublishRequest) -> TransportResult<PublishResult> {
        self.mutate(OperationKind::Publish, request).await
    }

    async fn broadcast(&self, request: &BroadcastRequest) -> TransportResult<BroadcastResult> {
        let wire: BroadcastWire = self.mutate(OperationKind::Broadcast, request).await?;
        broadcast_result(wire)
    }

    async fn subscribe(&self, request: &SubscribeRequest) -> TransportResult<()> {
        let _: Value = self
            .mutate(OperationKind::Subscribe, &subscribe_body(request))
            .await?;
        Ok(())
    }

    async fn unsubscribe(&self, request: &UnsubscribeRequest) -> TransportResult<()> {
        let _: Value = self.mutate(OperationKind::Unsubscribe, request).await?;
        Ok(())
    }

    async fn disconnect(&self, request: &DisconnectRequest) -> TransportResult<()> {
        let _: Value = self
            .mutate(OperationKind::Disconnect, &disconnect_body(request))
            .await?;
        Ok(())
    }

    async fn refresh(&self, request: &RefreshRequest) -> TransportResult<()> {
        let _: Value = self.mutate(OperationKind::Refresh, request).await?;
        Ok(())
    }

    async fn history_remove(&self, channel: &str) -> TransportResult<()> {
        let _: Value = self
            .mutate(OperationKind::HistoryRemove, &json!({ "channel": channel }))
            .await?;
        Ok(())
    }

    async fn history(&self, request: &HistoryRequest) -> TransportResult<HistoryResult> {
        self.read(OperationKind::History, request).await
    }

    async fn presence(&self, channel: &str) -> TransportResult<PresenceMap> {
        let wire: PresenceWire = self
            .read(OperationKind::Presence, &json!({ "channel": channel }))
            .await?;
        Ok(wire.presence)
    }

    async fn presence_stats(&self, channel: &str) -> TransportResult<PresenceStats> {
        self.read(OperationKind::PresenceStats, &json!({ "channel": channel }))
            .await
    }

    async fn channels(&self, request: &ChannelsRequest) -> TransportResult<ChannelMap> {
        let wire: ChannelsWire = self.read(OperationKind::Channels, request).await?;
        Ok(wire.channels)
    }

    async fn info(&self) -> TransportResult<ServerInfo> {
        self.read(OperationKind::Info, &json!({})).await
    }

    async fn batch(&self, request: &BatchRequest) -> TransportResult<BatchResult> {
        let operation = OperationKind::Batch;
        let commands = request
            .commands
            .iter()
            .map(command_body)
            .collect::<TransportResult<Vec<_>>>()?;
        let body = json!({ "commands": commands, "parallel": request.parallel });

        let wire: BatchWire = parse(operation, self.post(operation, &body).await?)?;
        if let Some(err) = wire.error.filter(|e| e.code != 0) {
            return Err(api_error(operation, err));
        }

        let mut replies = wire.replies.into_iter();
        let replies = request
            .commands
            .iter()
            .map(|command| {
                let operation = command.operation();
                match replies.next() {
                    Some(reply) => batch_reply(operation, reply),
                    None => Err(TransportError::missing_result(operation, TRANSPORT)),
                }
            })
            .collect();
        Ok(BatchResult { replies })
    }
}
