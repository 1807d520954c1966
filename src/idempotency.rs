//! # Idempotency Policy
//!
//! Decides whether publish and broadcast carry a deduplication key and
//! produces one when the caller did not supply it. The key is resolved once
//! per facade call, before the synchronous or queued path is chosen, and is
//! stored on the offloaded job so every retry reuses it.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::CentrifugoError;
use crate::types::Operation;

/// Longest key accepted from callers
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 256;

/// Produces a key for an operation that has none yet
pub trait IdempotencyGenerator: Send + Sync + fmt::Debug {
    fn generate(&self, operation: &Operation) -> String;
}

/// Fresh random UUID v4 per call
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomKeyGenerator;

impl IdempotencyGenerator for RandomKeyGenerator {
    fn generate(&self, _operation: &Operation) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Derives the key from the operation name, targets and payload.
///
/// Canonical JSON (RFC 8785) is hashed with SHA-256, so two calls with equal
/// content produce the same key regardless of object key order.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContentHashGenerator;

impl IdempotencyGenerator for ContentHashGenerator {
    fn generate(&self, operation: &Operation) -> String {
        let material = json!({
            "method": operation.name.as_str(),
            "channels": operation.target_channels,
            "data": operation.payload,
        });
        // serde_jcs only fails on non-finite floats, which serde_json::Value cannot hold
        let canonical = serde_jcs::to_vec(&material).unwrap_or_else(|_| material.to_string().into_bytes());
        let digest = Sha256::digest(&canonical);
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Which built-in generator to use when none is injected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    #[default]
    Random,
    ContentHash,
}

/// Idempotency options as they appear in configuration
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    pub enabled: bool,
    pub strategy: KeyStrategy,
    /// Injected generator, takes precedence over `strategy`
    #[serde(skip)]
    pub generator: Option<Arc<dyn IdempotencyGenerator>>,
}

impl fmt::Debug for IdempotencyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdempotencyConfig")
            .field("enabled", &self.enabled)
            .field("strategy", &self.strategy)
            .field("custom_generator", &self.generator.is_some())
            .finish()
    }
}

impl IdempotencyConfig {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn IdempotencyGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }
}

/// The resolved policy held by a facade
#[derive(Debug, Clone)]
pub struct IdempotencyPolicy {
    enabled: bool,
    generator: Arc<dyn IdempotencyGenerator>,
}

impl IdempotencyPolicy {
    pub fn from_config(config: &IdempotencyConfig) -> Self {
        let generator = config.generator.clone().unwrap_or_else(|| match config.strategy {
            KeyStrategy::Random => Arc::new(RandomKeyGenerator) as Arc<dyn IdempotencyGenerator>,
            KeyStrategy::ContentHash => Arc::new(ContentHashGenerator),
        });
        Self {
            enabled: config.enabled,
            generator,
        }
    }

    pub fn disabled() -> Self {
        Self::from_config(&IdempotencyConfig::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Key to attach to `operation`.
    ///
    /// Returns `None` when the policy is disabled or the operation kind does
    /// not take keys, otherwise the caller's key (validated) or a generated
    /// one.
    pub fn resolve(
        &self,
        operation: &Operation,
        supplied: Option<String>,
    ) -> Result<Option<String>, CentrifugoError> {
        if !self.enabled || !operation.name.supports_idempotency() {
            return Ok(None);
        }
        match supplied {
            Some(key) => {
                validate_key(&key)?;
                Ok(Some(key))
            }
            None => Ok(Some(self.generator.generate(operation))),
        }
    }
}

impl Default for IdempotencyPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Reject keys the server would refuse or that cannot travel in a header
pub fn validate_key(key: &str) -> Result<(), CentrifugoError> {
    if key.trim().is_empty() {
        return Err(CentrifugoError::invalid_request(
            "idempotency key must not be empty",
        ));
    }
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(CentrifugoError::invalid_request(format!(
            "idempotency key exceeds {MAX_IDEMPOTENCY_KEY_LEN} bytes"
        )));
    }
    if key.chars().any(char::is_control) {
        return Err(CentrifugoError::invalid_request(
            "idempotency key contains control characters",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OperationKind;
    use proptest::prelude::*;
    use serde_json::Value;

    fn publish_op(channel: &str, payload: Value) -> Operation {
        Operation::new(OperationKind::Publish, vec![channel.to_string()], payload)
    }

    #[test]
    fn test_disabled_policy_attaches_nothing() {
        let policy = IdempotencyPolicy::disabled();
        let op = publish_op("news", json!({"a": 1}));
        assert_eq!(policy.resolve(&op, None).unwrap(), None);
        assert_eq!(policy.resolve(&op, Some("caller".into())).unwrap(), None);
    }

    #[test]
    fn test_enabled_policy_prefers_supplied_key() {
        let policy = IdempotencyPolicy::from_config(&IdempotencyConfig::enabled());
        let op = publish_op("news", json!({"a": 1}));
        assert_eq!(
            policy.resolve(&op, Some("caller-key".into())).unwrap(),
            Some("caller-key".to_string())
        );
    }

    #[test]
    fn test_enabled_policy_generates_unique_random_keys() {
        let policy = IdempotencyPolicy::from_config(&IdempotencyConfig::enabled());
        let op = publish_op("news", json!({"a": 1}));
        let first = policy.resolve(&op, None).unwrap().unwrap();
        let second = policy.resolve(&op, None).unwrap().unwrap();
        assert_ne!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn test_keys_only_for_publish_and_broadcast() {
        let policy = IdempotencyPolicy::from_config(&IdempotencyConfig::enabled());
        let op = Operation::new(OperationKind::Subscribe, vec!["chat".into()], Value::Null);
        assert_eq!(policy.resolve(&op, None).unwrap(), None);
    }

    #[test]
    fn test_invalid_supplied_keys_rejected() {
        let policy = IdempotencyPolicy::from_config(&IdempotencyConfig::enabled());
        let op = publish_op("news", Value::Null);
        assert!(policy.resolve(&op, Some("   ".into())).is_err());
        assert!(policy.resolve(&op, Some("a\nb".into())).is_err());
        assert!(policy
            .resolve(&op, Some("x".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1)))
            .is_err());
    }

    #[test]
    fn test_injected_generator_wins() {
        #[derive(Debug)]
        struct Fixed;
        impl IdempotencyGenerator for Fixed {
            fn generate(&self, operation: &Operation) -> String {
                format!("fixed-{}", operation.name)
            }
        }

        let config = IdempotencyConfig {
            enabled: true,
            strategy: KeyStrategy::ContentHash,
            generator: Some(Arc::new(Fixed)),
        };
        let policy = IdempotencyPolicy::from_config(&config);
        let op = Operation::new(OperationKind::Broadcast, vec!["a".into(), "b".into()], Value::Null);
        assert_eq!(
            policy.resolve(&op, None).unwrap(),
            Some("fixed-broadcast".to_string())
        );
    }

    #[test]
    fn test_content_hash_ignores_object_key_order() {
        let generator = ContentHashGenerator;
        let a = generator.generate(&publish_op("news", json!({"x": 1, "y": 2})));
        let b = generator.generate(&publish_op("news", json!({"y": 2, "x": 1})));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let other_channel = generator.generate(&publish_op("sport", json!({"x": 1, "y": 2})));
        assert_ne!(a, other_channel);
    }

    proptest! {
        #[test]
        fn prop_content_hash_is_deterministic(channel in "[a-z]{1,12}", n in any::<i64>(), s in ".{0,32}") {
            let op = publish_op(&channel, json!({"n": n, "s": s}));
            let generator = ContentHashGenerator;
            prop_assert_eq!(generator.generate(&op), generator.generate(&op.clone()));
        }

        #[test]
        fn prop_content_hash_separates_payloads(a in any::<i64>(), b in any::<i64>()) {
            prop_assume!(a != b);
            let generator = ContentHashGenerator;
            prop_assert_ne!(
                generator.generate(&publish_op("c", json!(a))),
                generator.generate(&publish_op("c", json!(b)))
            );
        }
    }
}
