//! Parsed results of server operations.
//!
//! Field names follow the Centrifugo HTTP API so the HTTP transport can
//! deserialize replies straight into these types. Every field has a default,
//! which is what read operations fall back to when the server omits it.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Position in a channel history stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPosition {
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub epoch: String,
}

impl StreamPosition {
    pub fn new(offset: u64, epoch: impl Into<String>) -> Self {
        Self {
            offset,
            epoch: epoch.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResult {
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub epoch: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastResult {
    #[serde(default)]
    pub responses: Vec<PublishResult>,
}

/// A connection present in a channel, or the publisher of a publication
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub client: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conn_info: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chan_info: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<ClientInfo>,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryResult {
    #[serde(default)]
    pub publications: Vec<Publication>,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub epoch: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceStats {
    #[serde(default)]
    pub num_clients: u32,
    #[serde(default)]
    pub num_users: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    #[serde(default)]
    pub num_clients: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub num_clients: u32,
    #[serde(default)]
    pub num_users: u32,
    #[serde(default)]
    pub num_channels: u32,
    #[serde(default)]
    pub num_subs: u32,
    #[serde(default)]
    pub uptime: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub nodes: Vec<NodeInfo>,
}

impl ServerInfo {
    /// Total connected clients across all nodes
    pub fn total_clients(&self) -> u64 {
        self.nodes.iter().map(|n| u64::from(n.num_clients)).sum()
    }
}

/// Presence map keyed by client id
pub type PresenceMap = HashMap<String, ClientInfo>;

/// Active channels keyed by channel name
pub type ChannelMap = HashMap<String, ChannelInfo>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_fields_default_to_empty() {
        let history: HistoryResult = serde_json::from_value(json!({})).unwrap();
        assert!(history.publications.is_empty());

        let stats: PresenceStats = serde_json::from_value(json!({"num_clients": 3})).unwrap();
        assert_eq!(stats.num_clients, 3);
        assert_eq!(stats.num_users, 0);

        let publication: Publication = serde_json::from_value(json!({"offset": 7})).unwrap();
        assert_eq!(publication.data, Value::Null);
        assert_eq!(publication.offset, 7);
    }

    #[test]
    fn test_total_clients() {
        let info = ServerInfo {
            nodes: vec![
                NodeInfo {
                    num_clients: 2,
                    ..Default::default()
                },
                NodeInfo {
                    num_clients: 5,
                    ..Default::default()
                },
            ],
        };
        assert_eq!(info.total_clients(), 7);
    }
}
