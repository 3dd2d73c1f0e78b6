//! Wire shapes of delayed messages

use chrono::Utc;
use hoppity::PublishOverrides;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope parked in the wait queue until its TTL runs out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayedMessage {
    pub original_message: Value,
    pub original_publication: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_overrides: Option<PublishOverrides>,
    /// Requested delay in milliseconds
    pub target_delay: u64,
    /// Epoch milliseconds
    pub created_at: i64,
    #[serde(default)]
    pub retry_count: u32,
}

impl DelayedMessage {
    pub fn new(
        publication: impl Into<String>,
        message: Value,
        overrides: Option<PublishOverrides>,
        target_delay: u64,
    ) -> Self {
        Self {
            original_message: message,
            original_publication: publication.into(),
            original_overrides: overrides,
            target_delay,
            created_at: Utc::now().timestamp_millis(),
            retry_count: 0,
        }
    }

    /// The same envelope with its retry count bumped
    pub fn next_attempt(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }
}

/// Terminal artifact published when retries are exhausted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayedErrorMessage {
    pub original_message: DelayedMessage,
    pub error: String,
    pub error_code: String,
    /// Epoch milliseconds
    pub failed_at: i64,
    pub retry_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_uses_wire_field_names() {
        let message = DelayedMessage {
            original_message: json!({"id": 7}),
            original_publication: "orders".into(),
            original_overrides: None,
            target_delay: 500,
            created_at: 1_700_000_000_000,
            retry_count: 0,
        };

        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "originalMessage": {"id": 7},
                "originalPublication": "orders",
                "targetDelay": 500,
                "createdAt": 1_700_000_000_000i64,
                "retryCount": 0
            })
        );
    }

    #[test]
    fn missing_retry_count_reads_as_zero() {
        let message: DelayedMessage = serde_json::from_value(json!({
            "originalMessage": "x",
            "originalPublication": "p",
            "targetDelay": 10,
            "createdAt": 1
        }))
        .unwrap();

        assert_eq!(message.retry_count, 0);
        assert_eq!(message.next_attempt().retry_count, 1);
    }
}
