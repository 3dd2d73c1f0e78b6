//! Delayed publish failures and their error codes

use crate::policy::DelayState;
use hoppity::BrokerError;
use thiserror::Error;

/// Error codes carried by delayed publish failures and error envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DelayedPublishErrorCode {
    QueueFull,
    RepublishFailed,
    MaxRetriesExceeded,
    InvalidDelay,
}

impl DelayedPublishErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DelayedPublishErrorCode::QueueFull => "DELAYED_PUBLISH_QUEUE_FULL",
            DelayedPublishErrorCode::RepublishFailed => "DELAYED_PUBLISH_REPUBLISH_FAILED",
            DelayedPublishErrorCode::MaxRetriesExceeded => "DELAYED_PUBLISH_MAX_RETRIES_EXCEEDED",
            DelayedPublishErrorCode::InvalidDelay => "DELAYED_PUBLISH_INVALID_DELAY",
        }
    }
}

/// Where a failing delayed message stood when it failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryDetails {
    pub retry_count: u32,
    pub max_retries: u32,
    pub original_publication: String,
    pub target_delay: u64,
    pub created_at: i64,
}

#[derive(Error, Debug)]
pub enum DelayedPublishError {
    #[error("Invalid delay: {delay_ms}. Delay must be greater than 0.")]
    InvalidDelay { delay_ms: u64 },

    #[error("Failed to publish delayed message: {source}")]
    QueueFull {
        publication: String,
        delay_ms: u64,
        wait_publication: String,
        #[source]
        source: BrokerError,
    },

    /// Re-publish failed and a retry has been parked in the wait queue
    #[error("Failed to re-publish delayed message: {source}")]
    RepublishFailed {
        details: RetryDetails,
        #[source]
        source: BrokerError,
    },

    /// Re-publish failed for the last time and an error envelope has been published
    #[error("Max retries exceeded for delayed message. Original error: {source}")]
    MaxRetriesExceeded {
        details: RetryDetails,
        #[source]
        source: BrokerError,
    },

    #[error("Failed to schedule retry {} of delayed message: {source}", .details.retry_count + 1)]
    RetryScheduling {
        details: RetryDetails,
        #[source]
        source: BrokerError,
    },

    #[error("Failed to publish delayed error envelope to '{publication}': {source}")]
    ErrorQueue {
        publication: String,
        details: RetryDetails,
        #[source]
        source: BrokerError,
    },

    #[error("Invalid delayed message envelope: {0}")]
    InvalidEnvelope(#[source] serde_json::Error),

    #[error("Delayed message serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid delayed publish configuration: {0}")]
    InvalidConfig(String),

    #[error("Delayed publish is not installed on this connection")]
    NotInstalled,
}

impl DelayedPublishError {
    pub fn code(&self) -> Option<&'static str> {
        let code = match self {
            DelayedPublishError::InvalidDelay { .. } => DelayedPublishErrorCode::InvalidDelay,
            DelayedPublishError::QueueFull { .. } => DelayedPublishErrorCode::QueueFull,
            DelayedPublishError::RepublishFailed { .. }
            | DelayedPublishError::RetryScheduling { .. } => DelayedPublishErrorCode::RepublishFailed,
            DelayedPublishError::MaxRetriesExceeded { .. }
            | DelayedPublishError::ErrorQueue { .. } => DelayedPublishErrorCode::MaxRetriesExceeded,
            _ => return None,
        };
        Some(code.as_str())
    }

    pub fn retry_details(&self) -> Option<&RetryDetails> {
        match self {
            DelayedPublishError::RepublishFailed { details, .. }
            | DelayedPublishError::MaxRetriesExceeded { details, .. }
            | DelayedPublishError::RetryScheduling { details, .. }
            | DelayedPublishError::ErrorQueue { details, .. } => Some(details),
            _ => None,
        }
    }

    /// State the message was left in, when the failure still produced a follow-up
    pub fn follow_up(&self) -> Option<DelayState> {
        match self {
            DelayedPublishError::RepublishFailed { .. } => Some(DelayState::Rescheduled),
            DelayedPublishError::MaxRetriesExceeded { .. } => Some(DelayState::ErrorQueued),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details() -> RetryDetails {
        RetryDetails {
            retry_count: 2,
            max_retries: 5,
            original_publication: "orders".into(),
            target_delay: 100,
            created_at: 0,
        }
    }

    #[test]
    fn messages_and_codes() {
        let invalid = DelayedPublishError::InvalidDelay { delay_ms: 0 };
        assert_eq!(invalid.to_string(), "Invalid delay: 0. Delay must be greater than 0.");
        assert_eq!(invalid.code(), Some("DELAYED_PUBLISH_INVALID_DELAY"));

        let exceeded = DelayedPublishError::MaxRetriesExceeded {
            details: details(),
            source: BrokerError::Closed,
        };
        assert!(exceeded
            .to_string()
            .starts_with("Max retries exceeded for delayed message. Original error: "));
        assert_eq!(exceeded.retry_details().map(|d| d.retry_count), Some(2));
        assert_eq!(exceeded.follow_up(), Some(DelayState::ErrorQueued));

        let scheduling = DelayedPublishError::RetryScheduling {
            details: details(),
            source: BrokerError::Closed,
        };
        assert_eq!(scheduling.code(), Some("DELAYED_PUBLISH_REPUBLISH_FAILED"));
        assert_eq!(scheduling.follow_up(), None);
        assert_eq!(DelayedPublishError::NotInstalled.code(), None);
    }
}
