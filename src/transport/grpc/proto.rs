//! Protocol Buffer messages of the `centrifugal.centrifugo.api` package.
//!
//! Maintained by hand with `prost` derives instead of build-time codegen;
//! only the messages used by [`super::GrpcTransport`] are declared. Fields
//! this client never reads (node metrics, process stats) are left out and
//! skipped by the decoder.

use std::collections::{BTreeMap, HashMap};

/// gRPC service name, prefix of every method path
pub const SERVICE: &str = "centrifugal.centrifugo.api.CentrifugoApi";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApiError {
    #[prost(uint32, tag = "1")]
    pub code: u32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(bool, tag = "3")]
    pub temporary: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamPosition {
    #[prost(uint64, tag = "1")]
    pub offset: u64,
    #[prost(string, tag = "2")]
    pub epoch: String,
}

// =============================================================================
// Publish / Broadcast
// =============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PublishRequest {
    #[prost(string, tag = "1")]
    pub channel: String,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
    #[prost(string, tag = "3")]
    pub b64data: String,
    #[prost(bool, tag = "4")]
    pub skip_history: bool,
    #[prost(btree_map = "string, string", tag = "5")]
    pub tags: BTreeMap<String, String>,
    #[prost(string, tag = "6")]
    pub idempotency_key: String,
    #[prost(bool, tag = "7")]
    pub delta: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PublishResult {
    #[prost(uint64, tag = "1")]
    pub offset: u64,
    #[prost(string, tag = "2")]
    pub epoch: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PublishResponse {
    #[prost(message, optional, tag = "1")]
    pub error: Option<ApiError>,
    #[prost(message, optional, tag = "2")]
    pub result: Option<PublishResult>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BroadcastRequest {
    #[prost(string, repeated, tag = "1")]
    pub channels: Vec<String>,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
    #[prost(string, tag = "3")]
    pub b64data: String,
    #[prost(bool, tag = "4")]
    pub skip_history: bool,
    #[prost(btree_map = "string, string", tag = "5")]
    pub tags: BTreeMap<String, String>,
    #[prost(string, tag = "6")]
    pub idempotency_key: String,
    #[prost(bool, tag = "7")]
    pub delta: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BroadcastResult {
    #[prost(message, repeated, tag = "1")]
    pub responses: Vec<PublishResponse>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BroadcastResponse {
    #[prost(message, optional, tag = "1")]
    pub error: Option<ApiError>,
    #[prost(message, optional, tag = "2")]
    pub result: Option<BroadcastResult>,
}

// =============================================================================
// Subscriptions and connections
// =============================================================================

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct BoolValue {
    #[prost(bool, tag = "1")]
    pub value: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubscribeOptionOverride {
    #[prost(message, optional, tag = "1")]
    pub presence: Option<BoolValue>,
    #[prost(message, optional, tag = "2")]
    pub join_leave: Option<BoolValue>,
    #[prost(message, optional, tag = "3")]
    pub force_recovery: Option<BoolValue>,
    #[prost(message, optional, tag = "4")]
    pub force_positioning: Option<BoolValue>,
    #[prost(message, optional, tag = "5")]
    pub force_push_join_leave: Option<BoolValue>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubscribeRequest {
    #[prost(string, tag = "1")]
    pub channel: String,
    #[prost(string, tag = "2")]
    pub user: String,
    #[prost(int64, tag = "3")]
    pub expire_at: i64,
    #[prost(bytes = "vec", tag = "4")]
    pub info: Vec<u8>,
    #[prost(string, tag = "5")]
    pub b64info: String,
    #[prost(string, tag = "6")]
    pub client: String,
    #[prost(bytes = "vec", tag = "7")]
    pub data: Vec<u8>,
    #[prost(string, tag = "8")]
    pub b64data: String,
    #[prost(message, optional, tag = "9")]
    pub recover_since: Option<StreamPosition>,
    #[prost(message, optional, tag = "10")]
    pub r#override: Option<SubscribeOptionOverride>,
    #[prost(string, tag = "11")]
    pub session: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UnsubscribeRequest {
    #[prost(string, tag = "1")]
    pub channel: String,
    #[prost(string, tag = "2")]
    pub user: String,
    #[prost(string, tag = "3")]
    pub client: String,
    #[prost(string, tag = "4")]
    pub session: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Disconnect {
    #[prost(uint32, tag = "1")]
    pub code: u32,
    #[prost(string, tag = "2")]
    pub reason: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DisconnectRequest {
    #[prost(string, tag = "1")]
    pub user: String,
    #[prost(message, optional, tag = "2")]
    pub disconnect: Option<Disconnect>,
    #[prost(string, tag = "3")]
    pub client: String,
    #[prost(string, repeated, tag = "4")]
    pub whitelist: Vec<String>,
    #[prost(string, tag = "5")]
    pub session: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RefreshRequest {
    #[prost(string, tag = "1")]
    pub user: String,
    #[prost(string, tag = "2")]
    pub client: String,
    #[prost(bool, tag = "3")]
    pub expired: bool,
    #[prost(int64, tag = "4")]
    pub expire_at: i64,
    #[prost(bytes = "vec", tag = "5")]
    pub info: Vec<u8>,
    #[prost(string, tag = "6")]
    pub b64info: String,
    #[prost(string, tag = "7")]
    pub session: String,
}

// =============================================================================
// History, presence, channels, info
// =============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HistoryRequest {
    #[prost(string, tag = "1")]
    pub channel: String,
    #[prost(int32, tag = "2")]
    pub limit: i32,
    #[prost(message, optional, tag = "3")]
    pub since: Option<StreamPosition>,
    #[prost(bool, tag = "4")]
    pub reverse: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientInfo {
    #[prost(string, tag = "1")]
    pub user: String,
    #[prost(string, tag = "2")]
    pub client: String,
    #[prost(bytes = "vec", tag = "3")]
    pub conn_info: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub chan_info: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Publication {
    #[prost(bytes = "vec", tag = "4")]
    pub data: Vec<u8>,
    #[prost(message, optional, tag = "5")]
    pub info: Option<ClientInfo>,
    #[prost(uint64, tag = "6")]
    pub offset: u64,
    #[prost(btree_map = "string, string", tag = "7")]
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HistoryResult {
    #[prost(message, repeated, tag = "1")]
    pub publications: Vec<Publication>,
    #[prost(string, tag = "2")]
    pub epoch: String,
    #[prost(uint64, tag = "3")]
    pub offset: u64,
}

/// Request carrying only a channel name (presence, presence stats, history remove)
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChannelRequest {
    #[prost(string, tag = "1")]
    pub channel: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PresenceResult {
    #[prost(map = "string, message", tag = "1")]
    pub presence: HashMap<String, ClientInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PresenceStatsResult {
    #[prost(uint32, tag = "1")]
    pub num_clients: u32,
    #[prost(uint32, tag = "2")]
    pub num_users: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChannelsRequest {
    #[prost(string, tag = "1")]
    pub pattern: String,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ChannelInfo {
    #[prost(uint32, tag = "1")]
    pub num_clients: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChannelsResult {
    #[prost(map = "string, message", tag = "1")]
    pub channels: HashMap<String, ChannelInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InfoRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodeResult {
    #[prost(string, tag = "1")]
    pub uid: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub version: String,
    #[prost(uint32, tag = "4")]
    pub num_clients: u32,
    #[prost(uint32, tag = "5")]
    pub num_users: u32,
    #[prost(uint32, tag = "6")]
    pub num_channels: u32,
    #[prost(uint32, tag = "7")]
    pub uptime: u32,
    #[prost(uint32, tag = "10")]
    pub num_subs: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InfoResult {
    #[prost(message, repeated, tag = "1")]
    pub nodes: Vec<NodeResult>,
}

/// Result body of operations that return nothing
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EmptyResult {}

/// Every API response is `{ error = 1, result = 2 }`
pub trait ApiReply: ::prost::Message + Default + Send + Sync + 'static {
    type Output;

    fn into_parts(self) -> (Option<ApiError>, Option<Self::Output>);
}

impl ApiReply for PublishResponse {
    type Output = PublishResult;

    fn into_parts(self) -> (Option<ApiError>, Option<PublishResult>) {
        (self.error, self.result)
    }
}

impl ApiReply for BroadcastResponse {
    type Output = BroadcastResult;

    fn into_parts(self) -> (Option<ApiError>, Option<BroadcastResult>) {
        (self.error, self.result)
    }
}

macro_rules! api_response {
    ($($name:ident => $result:ty),+ $(,)?) => {
        $(
            #[derive(Clone, PartialEq, ::prost::Message)]
            pub struct $name {
                #[prost(message, optional, tag = "1")]
                pub error: Option<ApiError>,
                #[prost(message, optional, tag = "2")]
                pub result: Option<$result>,
            }

            impl ApiReply for $name {
                type Output = $result;

                fn into_parts(self) -> (Option<ApiError>, Option<$result>) {
                    (self.error, self.result)
                }
            }
        )+
    };
}

api_response! {
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

// =============================================================================
// Batch
// =============================================================================

/// One batched call; exactly one request field is set
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Command {
    #[prost(message, optional, tag = "4")]
    pub publish: Option<PublishRequest>,
    #[prost(message, optional, tag = "5")]
    pub broadcast: Option<BroadcastRequest>,
    #[prost(message, optional, tag = "6")]
    pub subscribe: Option<SubscribeRequest>,
    #[prost(message, optional, tag = "7")]
    pub unsubscribe: Option<UnsubscribeRequest>,
    #[prost(message, optional, tag = "8")]
    pub disconnect: Option<DisconnectRequest>,
    #[prost(message, optional, tag = "9")]
    pub presence: Option<ChannelRequest>,
    #[prost(message, optional, tag = "10")]
    pub presence_stats: Option<ChannelRequest>,
    #[prost(message, optional, tag = "11")]
    pub history: Option<HistoryRequest>,
    #[prost(message, optional, tag = "12")]
    pub history_remove: Option<ChannelRequest>,
    #[prost(message, optional, tag = "13")]
    pub info: Option<InfoRequest>,
    #[prost(message, optional, tag = "15")]
    pub refresh: Option<RefreshRequest>,
    #[prost(message, optional, tag = "16")]
    pub channels: Option<ChannelsRequest>,
}

/// Reply to one batched call, carrying either the error or the result of
/// the matching command
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Reply {
    #[prost(message, optional, tag = "2")]
    pub error: Option<ApiError>,
    #[prost(message, optional, tag = "4")]
    pub publish: Option<PublishResult>,
    #[prost(message, optional, tag = "5")]
    pub broadcast: Option<BroadcastResult>,
    #[prost(message, optional, tag = "6")]
    pub subscribe: Option<EmptyResult>,
    #[prost(message, optional, tag = "7")]
    pub unsubscribe: Option<EmptyResult>,
    #[prost(message, optional, tag = "8")]
    pub disconnect: Option<EmptyResult>,
    #[prost(message, optional, tag = "9")]
    pub presence: Option<PresenceResult>,
    #[prost(message, optional, tag = "10")]
    pub presence_stats: Option<PresenceStatsResult>,
    #[prost(message, optional, tag = "11")]
    pub history: Option<HistoryResult>,
    #[prost(message, optional, tag = "12")]
    pub history_remove: Option<EmptyResult>,
    #[prost(message, optional, tag = "13")]
    pub info: Option<InfoResult>,
    #[prost(message, optional, tag = "15")]
    pub refresh: Option<EmptyResult>,
    #[prost(message, optional, tag = "16")]
    pub channels: Option<ChannelsResult>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BatchRequest {
    #[prost(message, repeated, tag = "1")]
    pub commands: Vec<Command>,
    #[prost(bool, tag = "2")]
    pub parallel: bool,
}

/// Batch replies have no envelope; errors travel per reply
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BatchResponse {
    #[prost(message, repeated, tag = "1")]
    pub replies: Vec<Reply>,
}
