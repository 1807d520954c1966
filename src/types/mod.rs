//! # Domain Types
//!
//! Operation identifiers, typed request payloads and parsed server results
//! shared by both transports, the offload queue and the facade.

pub mod batch;
pub mod operation;
pub mod requests;
pub mod results;

pub use batch::{BatchCommand, BatchReply, BatchRequest, BatchResult};
pub use operation::{Operation, OperationKind};
pub use requests::{
    BroadcastRequest, ChannelsRequest, DisconnectRequest, HistoryRequest, PublishRequest,
    RefreshRequest, SubscribeOverride, SubscribeRequest, UnsubscribeRequest,
    DISCONNECT_CODE_FORCE, DISCONNECT_CODE_RECONNECT,
};
pub use results::{
    BroadcastResult, ChannelInfo, ChannelMap, ClientInfo, HistoryResult, NodeInfo, PresenceMap,
    PresenceStats, Publication, PublishResult, ServerInfo, StreamPosition,
};
