//! Conversions between the crate's request/result types and protobuf messages.
//!
//! JSON payloads travel in `bytes` fields. Empty bytes decode to `null`.

use serde_json::Value;

use super::proto;
use super::TRANSPORT;
use crate::error::{TransportCause, TransportError, TransportResult};
use crate::types::{
    BatchCommand, BatchReply, BatchRequest, BroadcastRequest, BroadcastResult, ChannelInfo, ChannelMap, ChannelsRequest, ClientInfo, DisconnectRequest,
    HistoryRequest, HistoryResult, NodeInfo, OperationKind, PresenceMap, PresenceStats,
    Publication, PublishRequest, PublishResult, RefreshRequest, ServerInfo, StreamPosition,
    SubscribeOverride, SubscribeRequest, UnsubscribeRequest,
};

// ============================================================================
// JSON payloads
// ============================================================================

pub fn encode_json(operation: OperationKind, value: &Value) -> TransportResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        TransportError::new(operation, TRANSPORT, TransportCause::InvalidRequest(e.to_string()))
    })
}

fn encode_json_opt(operation: OperationKind, value: Option<&Value>) -> TransportResult<Vec<u8>> {
    value.map_or_else(|| Ok(Vec::new()), |v| encode_json(operation, v))
}

pub fn decode_json(operation: OperationKind, bytes: &[u8]) -> TransportResult<Value> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map_err(|e| TransportError::decode(operation, TRANSPORT, e.to_string()))
}

fn decode_json_opt(operation: OperationKind, bytes: &[u8]) -> TransportResult<Option<Value>> {
    if bytes.is_empty() {
        return Ok(None);
    }
    decode_json(operation, bytes).map(Some)
}

// ============================================================================
// Requests
// ============================================================================

pub fn publish_request(request: &PublishRequest) -> TransportResult<proto::PublishRequest> {
    Ok(proto::PublishRequest {
        channel: request.channel.clone(),
        data: encode_json(OperationKind::Publish, &request.data)?,
        skip_history: request.skip_history,
        tags: request.tags.clone(),
        idempotency_key: request.idempotency_key.clone().unwrap_or_default(),
        ..Default::default()
    })
}

pub fn broadcast_request(request: &BroadcastRequest) -> TransportResult<proto::BroadcastRequest> {
    Ok(proto::BroadcastRequest {
        channels: request.channels.clone(),
        data: encode_json(OperationKind::Broadcast, &request.data)?,
        skip_history: request.skip_history,
        tags: request.tags.clone(),
        idempotency_key: request.idempotency_key.clone().unwrap_or_default(),
        ..Default::default()
    })
}

fn stream_position(position: &StreamPosition) -> proto::StreamPosition {
    proto::StreamPosition {
        offset: position.offset,
        epoch: position.epoch.clone(),
    }
}

fn bool_value(flag: Option<bool>) -> Option<proto::BoolValue> {
    flag.map(|value| proto::BoolValue { value })
}

fn option_override(overrides: &SubscribeOverride) -> proto::SubscribeOptionOverride {
    proto::SubscribeOptionOverride {
        presence: bool_value(overrides.presence),
        join_leave: bool_value(overrides.join_leave),
        force_recovery: bool_value(overrides.force_recovery),
        force_positioning: bool_value(overrides.force_positioning),
        force_push_join_leave: bool_value(overrides.force_push_join_leave),
    }
}

pub fn subscribe_request(request: &SubscribeRequest) -> TransportResult<proto::SubscribeRequest> {
    let operation = OperationKind::Subscribe;
    Ok(proto::SubscribeRequest {
        channel: request.channel.clone(),
        user: request.user.clone(),
        expire_at: request.expire_at.unwrap_or_default(),
        info: encode_json_opt(operation, request.info.as_ref())?,
        client: request.client.clone().unwrap_or_default(),
        data: encode_json_opt(operation, request.data.as_ref())?,
        recover_since: request.recover_since.as_ref().map(stream_position),
        r#override: request
            .overrides
            .as_ref()
            .filter(|o| !o.is_empty())
            .map(option_override),
        session: request.session.clone().unwrap_or_default(),
        ..Default::default()
    })
}

pub fn unsubscribe_request(request: &UnsubscribeRequest) -> proto::UnsubscribeRequest {
    proto::UnsubscribeRequest {
        channel: request.channel.clone().unwrap_or_default(),
        user: request.user.clone(),
        client: request.client.clone().unwrap_or_default(),
        session: request.session.clone().unwrap_or_default(),
    }
}

pub fn disconnect_request(request: &DisconnectRequest) -> proto::DisconnectRequest {
    let (code, reason) = request.disconnect_code();
    proto::DisconnectRequest {
        user: request.user.clone(),
        disconnect: Some(proto::Disconnect {
            code,
            reason: reason.to_string(),
        }),
        client: request.client.clone().unwrap_or_default(),
        whitelist: Vec::new(),
        session: request.session.clone().unwrap_or_default(),
    }
}

pub fn refresh_request(request: &RefreshRequest) -> proto::RefreshRequest {
    proto::RefreshRequest {
        user: request.user.clone(),
        client: request.client.clone().unwrap_or_default(),
        expired: request.expired,
        expire_at: request.expire_at.unwrap_or_default(),
        session: request.session.clone().unwrap_or_default(),
        ..Default::default()
    }
}

pub fn history_request(request: &HistoryRequest) -> proto::HistoryRequest {
    proto::HistoryRequest {
        channel: request.channel.clone(),
        limit: request
            .limit
            .map_or(0, |limit| i32::try_from(limit).unwrap_or(i32::MAX)),
        since: request.since.as_ref().map(stream_position),
        reverse: request.reverse,
    }
}

pub fn channels_request(request: &ChannelsRequest) -> proto::ChannelsRequest {
    proto::ChannelsRequest {
        pattern: request.pattern.clone().unwrap_or_default(),
    }
}

pub fn channel_request(channel: &str) -> proto::ChannelRequest {
    proto::ChannelRequest {
        channel: channel.to_string(),
    }
}

fn command(command: &BatchCommand) -> TransportResult<proto::Command> {
    let mut message = proto::Command::default();
    match command {
        BatchCommand::Publish(r) => message.publish = Some(publish_request(r)?),
        BatchCommand::Broadcast(r) => message.broadcast = Some(broadcast_request(r)?),
        BatchCommand::Subscribe(r) => message.subscribe = Some(subscribe_request(r)?),
        BatchCommand::Unsubscribe(r) => message.unsubscribe = Some(unsubscribe_request(r)),
        BatchCommand::Disconnect(r) => message.disconnect = Some(disconnect_request(r)),
        BatchCommand::Refresh(r) => message.refresh = Some(refresh_request(r)),
        BatchCommand::HistoryRemove { channel } => {
            message.history_remove = Some(channel_request(channel));
        }
        BatchCommand::History(r) => message.history = Some(history_request(r)),
        BatchCommand::Presence { channel } => message.presence = Some(channel_request(channel)),
        BatchCommand::PresenceStats { channel } => {
            message.presence_stats = Some(channel_request(channel));
        }
        BatchCommand::Channels(r) => message.channels = Some(channels_request(r)),
        BatchCommand::Info => message.info = Some(proto::InfoRequest {}),
    }
    Ok(message)
}

pub fn batch_request(request: &BatchRequest) -> TransportResult<proto::BatchRequest> {
    Ok(proto::BatchRequest {
        commands: request
            .commands
            .iter()
            .map(command)
            .collect::<TransportResult<Vec<_>>>()?,
        parallel: request.parallel,
    })
}

// ============================================================================
// Results
// ============================================================================

pub fn api_error(operation: OperationKind, err: proto::ApiError) -> TransportError {
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

pub fn publish_result(result: proto::PublishResult) -> PublishResult {
    PublishResult {
        offset: result.offset,
        epoch: result.epoch,
    }
}

/// Any per-channel error fails the whole broadcast
pub fn broadcast_result(result: proto::BroadcastResult) -> TransportResult<BroadcastResult> {
    let mut responses = Vec::with_capacity(result.responses.len());
    for item in result.responses {
        if let Some(err) = item.error.filter(|e| e.code != 0) {
            return Err(api_error(OperationKind::Broadcast, err));
        }
        responses.push(item.result.map(publish_result).unwrap_or_default());
    }
    Ok(BroadcastResult { responses })
}

fn client_info(operation: OperationKind, info: proto::ClientInfo) -> TransportResult<ClientInfo> {
    Ok(ClientInfo {
        user: info.user,
        client: info.client,
        conn_info: decode_json_opt(operation, &info.conn_info)?,
        chan_info: decode_json_opt(operation, &info.chan_info)?,
    })
}

pub fn history_result(result: proto::HistoryResult) -> TransportResult<HistoryResult> {
    let operation = OperationKind::History;
    let publications = result
        .publications
        .into_iter()
        .map(|publication| {
            Ok(Publication {
                data: decode_json(operation, &publication.data)?,
                info: publication
                    .info
                    .map(|info| client_info(operation, info))
                    .transpose()?,
                offset: publication.offset,
                tags: publication.tags,
            })
        })
        .collect::<TransportResult<Vec<_>>>()?;

    Ok(HistoryResult {
        publications,
        offset: result.offset,
        epoch: result.epoch,
    })
}

pub fn presence_result(result: proto::PresenceResult) -> TransportResult<PresenceMap> {
    result
        .presence
        .into_iter()
        .map(|(id, info)| Ok((id, client_info(OperationKind::Presence, info)?)))
        .collect()
}

pub fn presence_stats_result(result: proto::PresenceStatsResult) -> PresenceStats {
    PresenceStats {
        num_clients: result.num_clients,
        num_users: result.num_users,
    }
}

pub fn channels_result(result: proto::ChannelsResult) -> ChannelMap {
    result
        .channels
        .into_iter()
        .map(|(name, info)| {
            (
                name,
                ChannelInfo {
                    num_clients: info.num_clients,
                },
            )
        })
        .collect()
}

pub fn info_result(result: proto::InfoResult) -> ServerInfo {
    ServerInfo {
        nodes: result
            .nodes
            .into_iter()
            .map(|node| NodeInfo {
                uid: node.uid,
                name: node.name,
                version: node.version,
                num_clients: node.num_clients,
                num_users: node.num_users,
                num_channels: node.num_channels,
                num_subs: node.num_subs,
                uptime: node.uptime,
            })
            .collect(),
    }
}

fn batch_reply(operation: OperationKind, reply: proto::Reply) -> TransportResult<BatchReply> {
    if let Some(err) = reply.error.filter(|e| e.code != 0) {
        return Err(api_error(operation, err));
    }
    let missing = || TransportError::missing_result(operation, TRANSPORT);
    let reply = match operation {
        OperationKind::Publish => {
            BatchReply::Publish(publish_result(reply.publish.ok_or_else(missing)?))
        }
        OperationKind::Broadcast => {
            BatchReply::Broadcast(broadcast_result(reply.broadcast.ok_or_else(missing)?)?)
        }
        OperationKind::Subscribe => {
            reply.subscribe.ok_or_else(missing)?;
            BatchReply::Subscribe
        }
        OperationKind::Unsubscribe => {
            reply.unsubscribe.ok_or_else(missing)?;
            BatchReply::Unsubscribe
        }
        OperationKind::Disconnect => {
            reply.disconnect.ok_or_else(missing)?;
            BatchReply::Disconnect
        }
        OperationKind::Refresh => {
            reply.refresh.ok_or_else(missing)?;
            BatchReply::Refresh
        }
        OperationKind::HistoryRemove => {
            reply.history_remove.ok_or_else(missing)?;
            BatchReply::HistoryRemove
        }
        OperationKind::History => {
            BatchReply::History(history_result(reply.history.unwrap_or_default())?)
        }
        OperationKind::Presence => {
            BatchReply::Presence(presence_result(reply.presence.unwrap_or_default())?)
        }
        OperationKind::PresenceStats => BatchReply::PresenceStats(presence_stats_result(
            reply.presence_stats.unwrap_or_default(),
        )),
        OperationKind::Channels => {
            BatchReply::Channels(channels_result(reply.channels.unwrap_or_default()))
        }
        OperationKind::Info => BatchReply::Info(info_result(reply.info.unwrap_or_default())),
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

/// Pair replies with their commands; a command without a reply is malformed
pub fn batch_replies(
    commands: &[BatchCommand],
    response: proto::BatchResponse,
) -> Vec<TransportResult<BatchReply>> {
    let mut replies = response.replies.into_iter();
    commands
        .iter()
        .map(|command| {
            let operation = command.operation();
            match replies.next() {
                Some(reply) => batch_reply(operation, reply),
                None => Err(TransportError::missing_result(operation, TRANSPORT)),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_publish_request_encodes_data_as_json_bytes() {
        let request =
            PublishRequest::new("news", json!({"text": "hi"})).with_idempotency_key("k-1");
        let message = publish_request(&request).unwrap();
        assert_eq!(message.channel, "news");
        assert_eq!(
            serde_json::from_slice::<Value>(&message.data).unwrap(),
            json!({"text": "hi"})
        );
        assert_eq!(message.idempotency_key, "k-1");
    }

    #[test]
    fn test_disconnect_codes_match_http() {
        let message = disconnect_request(&DisconnectRequest::new("u1", true));
        let disconnect = message.disconnect.unwrap();
        assert_eq!(disconnect.code, 3000);
        assert_eq!(disconnect.reason, "reconnect");

        let message = disconnect_request(&DisconnectRequest::new("u1", false));
        assert_eq!(message.disconnect.unwrap().code, 3501);
    }

    #[test]
    fn test_subscribe_override_wraps_flags() {
        let request = SubscribeRequest::new("u1", "chat").with_override(SubscribeOverride {
            join_leave: Some(false),
            ..Default::default()
        });
        let message = subscribe_request(&request).unwrap();
        let overrides = message.r#override.unwrap();
        assert_eq!(overrides.join_leave, Some(proto::BoolValue { value: false }));
        assert!(overrides.presence.is_none());
        assert!(message.info.is_empty());
    }

    #[test]
    fn test_empty_bytes_decode_to_null() {
        assert_eq!(decode_json(OperationKind::History, &[]).unwrap(), Value::Null);
    }

    #[test]
    fn test_bad_bytes_are_decode_errors() {
        let result = history_result(proto::HistoryResult {
            publications: vec![proto::Publication {
                data: b"{not json".to_vec(),
                ..Default::default()
            }],
            ..Default::default()
        });
        let err = result.unwrap_err();
        assert!(matches!(err.cause, TransportCause::Decode(_)));
        assert_eq!(err.operation, OperationKind::History);
    }

    #[test]
    fn test_presence_result_decodes_conn_info() {
        let mut presence = std::collections::HashMap::new();
        presence.insert(
            "c1".to_string(),
            proto::ClientInfo {
                user: "u1".into(),
                client: "c1".into(),
                conn_info: br#"{"name":"alice"}"#.to_vec(),
                chan_info: Vec::new(),
            },
        );
        let map = presence_result(proto::PresenceResult { presence }).unwrap();
        let info = &map["c1"];
        assert_eq!(info.user, "u1");
        assert_eq!(info.conn_info, Some(json!({"name": "alice"})));
        assert_eq!(info.chan_info, None);
    }

    #[test]
    fn test_batch_request_sets_one_field_per_command() {
        let request = BatchRequest::new(vec![
            BatchCommand::Publish(PublishRequest::new("a", json!(1))),
            BatchCommand::PresenceStats {
                channel: "b".into(),
            },
            BatchCommand::Info,
        ])
        .parallel();
        let message = batch_request(&request).unwrap();
        assert!(message.parallel);
        assert_eq!(message.commands.len(), 3);
        assert_eq!(message.commands[0].publish.as_ref().unwrap().channel, "a");
        assert!(message.commands[0].broadcast.is_none());
        assert_eq!(
            message.commands[1].presence_stats.as_ref().unwrap().channel,
            "b"
        );
        assert!(message.commands[2].info.is_some());
    }

    #[test]
    fn test_batch_replies_keep_per_command_errors() {
        let commands = [
            BatchCommand::Publish(PublishRequest::new("a", json!(1))),
            BatchCommand::Publish(PublishRequest::new("b", json!(2))),
            BatchCommand::Info,
            BatchCommand::Subscribe(SubscribeRequest::new("u1", "c")),
        ];
        let response = proto::BatchResponse {
            replies: vec![
                proto::Reply {
                    publish: Some(proto::PublishResult {
                        offset: 3,
                        epoch: "e".into(),
                    }),
                    ..Default::default()
                },
                proto::Reply {
                    error: Some(proto::ApiError {
                        code: 102,
                        message: "unknown channel".into(),
                        temporary: false,
                    }),
                    ..Default::default()
                },
                proto::Reply::default(),
            ],
        };

        let replies = batch_replies(&commands, response);
        assert_eq!(replies.len(), 4);
        assert_eq!(
            replies[0].as_ref().unwrap(),
            &BatchReply::Publish(PublishResult {
                offset: 3,
                epoch: "e".into()
            })
        );
        let err = replies[1].as_ref().unwrap_err();
        assert!(matches!(err.cause, TransportCause::Api { code: 102, .. }));
        assert_eq!(
            replies[2].as_ref().unwrap(),
            &BatchReply::Info(ServerInfo::default())
        );
        let err = replies[3].as_ref().unwrap_err();
        assert_eq!(err.operation, OperationKind::Subscribe);
        assert!(matches!(err.cause, TransportCause::MalformedResponse(_)));
    }

    #[test]
    fn test_broadcast_item_error_fails_broadcast() {
        let result = broadcast_result(proto::BroadcastResult {
            responses: vec![
                proto::PublishResponse {
                    error: None,
                    result: Some(proto::PublishResult::default()),
                },
                proto::PublishResponse {
                    error: Some(proto::ApiError {
                        code: 108,
                        message: "not available".into(),
                        temporary: true,
                    }),
                    result: None,
                },
            ],
        });
        let err = result.unwrap_err();
        assert_eq!(err.operation, OperationKind::Broadcast);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_history_limit_absent_is_zero() {
        assert_eq!(history_request(&HistoryRequest::new("c")).limit, 0);
        assert_eq!(
            history_request(&HistoryRequest::new("c").with_limit(10)).limit,
            10
        );
    }
}
