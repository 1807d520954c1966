//! Typed inputs for each server operation.
//!
//! These are also the `params` persisted on offloaded jobs, so every field is
//! serde-friendly and optional fields are skipped when absent.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::results::StreamPosition;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub channel: String,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub skip_history: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl PublishRequest {
    pub fn new(channel: impl Into<String>, data: Value) -> Self {
        Self {
            channel: channel.into(),
            data,
            idempotency_key: None,
            skip_history: false,
            tags: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn skip_history(mut self) -> Self {
        self.skip_history = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastRequest {
    pub channels: Vec<String>,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub skip_history: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl BroadcastRequest {
    pub fn new<I, S>(channels: I, data: Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: channels.into_iter().map(Into::into).collect(),
            data,
            idempotency_key: None,
            skip_history: false,
            tags: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Per-subscription overrides of channel namespace options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_leave: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_push_join_leave: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_positioning: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_recovery: Option<bool>,
}

impl SubscribeOverride {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub user: String,
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recover_since: Option<StreamPosition>,
    #[serde(default, rename = "override", skip_serializing_if = "Option::is_none")]
    pub overrides: Option<SubscribeOverride>,
}

impl SubscribeRequest {
    pub fn new(user: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            channel: channel.into(),
            info: None,
            client: None,
            session: None,
            data: None,
            expire_at: None,
            recover_since: None,
            overrides: None,
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    #[must_use]
    pub fn with_info(mut self, info: Value) -> Self {
        self.info = Some(info);
        self
    }

    #[must_use]
    pub fn with_override(mut self, overrides: SubscribeOverride) -> Self {
        self.overrides = Some(overrides);
        self
    }
}

/// Unsubscribe a user from one channel, or from every channel when
/// `channel` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

impl UnsubscribeRequest {
    pub fn new(user: impl Into<String>, channel: Option<String>) -> Self {
        Self {
            user: user.into(),
            channel,
            client: None,
            session: None,
        }
    }
}

/// Centrifugo disconnect code telling clients to reconnect
pub const DISCONNECT_CODE_RECONNECT: u32 = 3000;
/// Centrifugo disconnect code telling clients not to reconnect
pub const DISCONNECT_CODE_FORCE: u32 = 3501;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectRequest {
    pub user: String,
    #[serde(default)]
    pub reconnect: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

impl DisconnectRequest {
    pub fn new(user: impl Into<String>, reconnect: bool) -> Self {
        Self {
            user: user.into(),
            reconnect,
            client: None,
            session: None,
        }
    }

    /// Disconnect code and reason sent to the server for this request
    pub fn disconnect_code(&self) -> (u32, &'static str) {
        if self.reconnect {
            (DISCONNECT_CODE_RECONNECT, "reconnect")
        } else {
            (DISCONNECT_CODE_FORCE, "force disconnect")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(default)]
    pub expired: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<i64>,
}

impl RefreshRequest {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            client: None,
            session: None,
            expired: false,
            expire_at: None,
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    #[must_use]
    pub fn expire_at(mut self, unix_seconds: i64) -> Self {
        self.expire_at = Some(unix_seconds);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRequest {
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<StreamPosition>,
    #[serde(default)]
    pub reverse: bool,
}

impl HistoryRequest {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            limit: None,
            since: None,
            reverse: false,
        }
    }

    #[must_use]
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn since(mut self, position: StreamPosition) -> Self {
        self.since = Some(position);
        self
    }

    #[must_use]
    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelsRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl ChannelsRequest {
    pub fn matching(pattern: impl Into<String>) -> Self {
        Self {
            pattern: Some(pattern.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_disconnect_code_mapping() {
        assert_eq!(
            DisconnectRequest::new("u1", true).disconnect_code(),
            (3000, "reconnect")
        );
        assert_eq!(
            DisconnectRequest::new("u1", false).disconnect_code(),
            (3501, "force disconnect")
        );
    }

    #[test]
    fn test_publish_request_skips_absent_fields() {
        let value = serde_json::to_value(PublishRequest::new("news", json!({"x": 1}))).unwrap();
        assert_eq!(
            value,
            json!({"channel": "news", "data": {"x": 1}, "skip_history": false})
        );
    }

    #[test]
    fn test_subscribe_override_uses_wire_name() {
        let request = SubscribeRequest::new("u1", "chat").with_override(SubscribeOverride {
            presence: Some(false),
            ..Default::default()
        });
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["override"]["presence"], json!(false));

        let parsed: SubscribeRequest = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, request);
    }
}
