//! Ready-queue handling: deliver, reschedule or give up

use crate::error::{DelayedPublishError, DelayedPublishErrorCode, RetryDetails};
use crate::policy::{DelayState, FailureTransition, RetryPolicy};
use crate::types::{DelayedErrorMessage, DelayedMessage};
use async_trait::async_trait;
use chrono::Utc;
use hoppity::{Broker, BrokerError, BrokerHandle, Delivery, Logger, PublishOverrides, SubscriptionListener};
use std::sync::Arc;
use tracing::debug;

/// Name of the error publication paired with `publication`
pub fn error_publication_name(publication: &str) -> String {
    format!("{publication}_delayed_error")
}

/// Re-publish a message whose delay has elapsed.
///
/// On success the message is [`DelayState::Delivered`]. When re-publishing fails the
/// policy either parks a retry in the wait queue ([`DelayedPublishError::RepublishFailed`])
/// or publishes an error envelope ([`DelayedPublishError::MaxRetriesExceeded`]). Any other
/// error means that follow-up publish failed too.
pub async fn handle_ready_message(
    broker: &dyn Broker,
    message: &DelayedMessage,
    wait_publication: &str,
    policy: &RetryPolicy,
    logger: &dyn Logger,
) -> Result<DelayState, DelayedPublishError> {
    logger.debug(&format!(
        "Processing ready message for publication {} (retry {})",
        message.original_publication, message.retry_count
    ));

    let overrides = message
        .original_overrides
        .clone()
        .unwrap_or_default()
        .merged(&PublishOverrides::new().mandatory(true));

    let source = match broker
        .publish(
            &message.original_publication,
            message.original_message.clone(),
            overrides,
        )
        .await
    {
        Ok(()) => {
            logger.info(&format!(
                "Delivered delayed message to {}",
                message.original_publication
            ));
            return Ok(DelayState::Delivered);
        }
        Err(source) => source,
    };

    let details = RetryDetails {
        retry_count: message.retry_count,
        max_retries: policy.max_retries,
        original_publication: message.original_publication.clone(),
        target_delay: message.target_delay,
        created_at: message.created_at,
    };
    logger.error(&format!(
        "Failed to re-publish delayed message to {}: {source}",
        message.original_publication
    ));

    match policy.on_failure(message.retry_count) {
        FailureTransition::Reschedule { delay, .. } => {
            let retry = message.next_attempt();
            let content = serde_json::to_value(&retry)?;
            let overrides = PublishOverrides::new()
                .expiration(delay.as_millis() as u64)
                .persistent(false);

            if let Err(err) = broker.publish(wait_publication, content, overrides).await {
                return Err(DelayedPublishError::RetryScheduling {
                    details,
                    source: err,
                });
            }
            logger.warn(&format!(
                "Scheduled retry {} of {} for delayed message to {}",
                retry.retry_count, policy.max_retries, message.original_publication
            ));
            Err(DelayedPublishError::RepublishFailed { details, source })
        }
        FailureTransition::ErrorQueue => {
            let publication = error_publication_name(&message.original_publication);
            let envelope = DelayedErrorMessage {
                original_message: message.clone(),
                error: source.to_string(),
                error_code: DelayedPublishErrorCode::MaxRetriesExceeded.as_str().to_string(),
                failed_at: Utc::now().timestamp_millis(),
                retry_count: message.retry_count,
            };
            let content = serde_json::to_value(&envelope)?;

            if let Err(err) = broker
                .publish(&publication, content, PublishOverrides::new().persistent(false))
                .await
            {
                return Err(DelayedPublishError::ErrorQueue {
                    publication,
                    details,
                    source: err,
                });
            }
            logger.error(&format!(
                "Max retries exceeded for delayed message to {}; moved to {publication}",
                message.original_publication
            ));
            Err(DelayedPublishError::MaxRetriesExceeded { details, source })
        }
    }
}

/// Consumes the ready queue
pub(crate) struct ReadyListener {
    pub(crate) broker: BrokerHandle,
    pub(crate) wait_publication: String,
    pub(crate) policy: RetryPolicy,
    pub(crate) logger: Arc<dyn Logger>,
}

#[async_trait]
impl SubscriptionListener for ReadyListener {
    async fn on_message(&self, delivery: Delivery) -> anyhow::Result<()> {
        let message: DelayedMessage = match serde_json::from_value(delivery.content.clone()) {
            Ok(message) => message,
            Err(err) => {
                let err = DelayedPublishError::InvalidEnvelope(err);
                self.logger.error(&format!("Discarding ready message: {err}"));
                delivery.ack.nack(&err);
                return Ok(());
            }
        };

        let outcome = handle_ready_message(
            self.broker.as_ref(),
            &message,
            &self.wait_publication,
            &self.policy,
            self.logger.as_ref(),
        )
        .await;

        let state = match &outcome {
            Ok(state) => Some(*state),
            Err(err) => err.follow_up(),
        };
        debug!(
            publication = %message.original_publication,
            retry_count = message.retry_count,
            state = ?state,
            "Ready message handled"
        );

        match outcome {
            Ok(_) => {
                delivery.ack.ack();
            }
            Err(_) if state.is_some() => {
                delivery.ack.ack();
            }
            Err(err) => {
                self.logger
                    .error(&format!("Error processing ready message: {err}"));
                delivery.ack.nack(&err);
            }
        }
        Ok(())
    }

    async fn on_error(&self, _subscription: &str, error: BrokerError) {
        self.logger
            .error(&format!("Ready queue subscription error: {error}"));
    }
}
