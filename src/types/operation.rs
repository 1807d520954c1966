use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every server API method the client can call.
///
/// The serialized form is the Centrifugo HTTP API method name, which is also
/// the `method` stored on offloaded jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Publish,
    Broadcast,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Refresh,
    History,
    HistoryRemove,
    Presence,
    PresenceStats,
    Channels,
    Info,
    /// Several of the above in one request
    Batch,
}

impl OperationKind {
    pub const ALL: [OperationKind; 13] = [
        OperationKind::Publish,
        OperationKind::Broadcast,
        OperationKind::Subscribe,
        OperationKind::Unsubscribe,
        OperationKind::Disconnect,
        OperationKind::Refresh,
        OperationKind::History,
        OperationKind::HistoryRemove,
        OperationKind::Presence,
        OperationKind::PresenceStats,
        OperationKind::Channels,
        OperationKind::Info,
        OperationKind::Batch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Broadcast => "broadcast",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Disconnect => "disconnect",
            Self::Refresh => "refresh",
            Self::History => "history",
            Self::HistoryRemove => "history_remove",
            Self::Presence => "presence",
            Self::PresenceStats => "presence_stats",
            Self::Channels => "channels",
            Self::Info => "info",
            Self::Batch => "batch",
        }
    }

    /// Operations that may be routed through the offload queue
    pub fn is_offloadable(&self) -> bool {
        matches!(
            self,
            Self::Publish
                | Self::Broadcast
                | Self::Subscribe
                | Self::Unsubscribe
                | Self::Disconnect
                | Self::Refresh
        )
    }

    /// Operations that never change server state
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Self::History | Self::Presence | Self::PresenceStats | Self::Channels | Self::Info
        )
    }

    /// Operations whose requests carry an idempotency key
    pub fn supports_idempotency(&self) -> bool {
        matches!(self, Self::Publish | Self::Broadcast)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named server action with its targets and payload.
///
/// This is the input idempotency generators see; `target_channels` is never
/// empty for publish and broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub name: OperationKind,
    pub target_channels: Vec<String>,
    pub payload: Value,
    pub idempotency_key: Option<String>,
}

impl Operation {
    pub fn new(name: OperationKind, target_channels: Vec<String>, payload: Value) -> Self {
        Self {
            name,
            target_channels,
            payload,
            idempotency_key: None,
        }
    }
}
