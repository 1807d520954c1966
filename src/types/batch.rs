//! Several server commands sent in one request.
//!
//! The server answers every command separately, so one rejected command does
//! not fail the others.

use super::operation::OperationKind;
use super::requests::{
    BroadcastRequest, ChannelsRequest, DisconnectRequest, HistoryRequest, PublishRequest,
    RefreshRequest, SubscribeRequest, UnsubscribeRequest,
};
use super::results::{
    BroadcastResult, ChannelMap, HistoryResult, PresenceMap, PresenceStats, PublishResult,
    ServerInfo,
};
use crate::error::TransportResult;

/// One command of a batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchCommand {
    Publish(PublishRequest),
    Broadcast(BroadcastRequest),
    Subscribe(SubscribeRequest),
    Unsubscribe(UnsubscribeRequest),
    Disconnect(DisconnectRequest),
    Refresh(RefreshRequest),
    HistoryRemove { channel: String },
    History(HistoryRequest),
    Presence { channel: String },
    PresenceStats { channel: String },
    Channels(ChannelsRequest),
    Info,
}

impl BatchCommand {
    pub fn operation(&self) -> OperationKind {
        match self {
            Self::Publish(_) => OperationKind::Publish,
            Self::Broadcast(_) => OperationKind::Broadcast,
            Self::Subscribe(_) => OperationKind::Subscribe,
            Self::Unsubscribe(_) => OperationKind::Unsubscribe,
            Self::Disconnect(_) => OperationKind::Disconnect,
            Self::Refresh(_) => OperationKind::Refresh,
            Self::HistoryRemove { .. } => OperationKind::HistoryRemove,
            Self::History(_) => OperationKind::History,
            Self::Presence { .. } => OperationKind::Presence,
            Self::PresenceStats { .. } => OperationKind::PresenceStats,
            Self::Channels(_) => OperationKind::Channels,
            Self::Info => OperationKind::Info,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchRequest {
    pub commands: Vec<BatchCommand>,
    /// Let the server execute the commands concurrently
    pub parallel: bool,
}

impl BatchRequest {
    pub fn new(commands: Vec<BatchCommand>) -> Self {
        Self {
            commands,
            parallel: false,
        }
    }

    #[must_use]
    pub fn with_command(mut self, command: BatchCommand) -> Self {
        self.commands.push(command);
        self
    }

    #[must_use]
    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Successful reply to one batched command
#[derive(Debug, Clone, PartialEq)]
pub enum BatchReply {
    Publish(PublishResult),
    Broadcast(BroadcastResult),
    Subscribe,
    Unsubscribe,
    Disconnect,
    Refresh,
    HistoryRemove,
    History(HistoryResult),
    Presence(PresenceMap),
    PresenceStats(PresenceStats),
    Channels(ChannelMap),
    Info(ServerInfo),
}

impl BatchReply {
    pub fn operation(&self) -> OperationKind {
        match self {
            Self::Publish(_) => OperationKind::Publish,
            Self::Broadcast(_) => OperationKind::Broadcast,
            Self::Subscribe => OperationKind::Subscribe,
            Self::Unsubscribe => OperationKind::Unsubscribe,
            Self::Disconnect => OperationKind::Disconnect,
            Self::Refresh => OperationKind::Refresh,
            Self::HistoryRemove => OperationKind::HistoryRemove,
            Self::History(_) => OperationKind::History,
            Self::Presence(_) => OperationKind::Presence,
            Self::PresenceStats(_) => OperationKind::PresenceStats,
            Self::Channels(_) => OperationKind::Channels,
            Self::Info(_) => OperationKind::Info,
        }
    }
}

/// Per-command outcomes, in command order
#[derive(Debug, Default)]
pub struct BatchResult {
    pub replies: Vec<TransportResult<BatchReply>>,
}

impl BatchResult {
    pub fn is_all_ok(&self) -> bool {
        self.replies.iter().all(Result::is_ok)
    }

    pub fn failures(&self) -> usize {
        self.replies.iter().filter(|r| r.is_err()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{TransportCause, TransportError};
    use serde_json::json;

    #[test]
    fn test_command_operation_names() {
        let request = BatchRequest::default()
            .with_command(BatchCommand::Publish(PublishRequest::new("c", json!(1))))
            .with_command(BatchCommand::PresenceStats {
                channel: "c".into(),
            })
            .with_command(BatchCommand::Info)
            .parallel();

        let names: Vec<&str> = request
            .commands
            .iter()
            .map(|c| c.operation().as_str())
            .collect();
        assert_eq!(names, ["publish", "presence_stats", "info"]);
        assert!(request.parallel);
        assert_eq!(request.len(), 3);
    }

    #[test]
    fn test_result_counts_failures() {
        let result = BatchResult {
            replies: vec![
                Ok(BatchReply::Subscribe),
                Err(TransportError::new(
                    OperationKind::Publish,
                    "http",
                    TransportCause::Api {
                        code: 102,
                        message: "unknown channel".into(),
                        temporary: false,
                    },
                )),
            ],
        };
        assert!(!result.is_all_ok());
        assert_eq!(result.failures(), 1);
        assert!(BatchResult::default().is_all_ok());
    }
}
