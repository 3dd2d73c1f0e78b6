//! Delayed publish capability attached to a built connection

use crate::error::DelayedPublishError;
use crate::middleware::DelayedPublishConfig;
use crate::types::DelayedMessage;
use hoppity::{Broker, BrokerHandle, Connection, Logger, PublishOverrides};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

pub struct DelayedPublisher {
    broker: BrokerHandle,
    config: Arc<DelayedPublishConfig>,
    logger: Arc<dyn Logger>,
}

impl DelayedPublisher {
    pub(crate) fn new(
        broker: BrokerHandle,
        config: Arc<DelayedPublishConfig>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            broker,
            config,
            logger,
        }
    }

    pub fn config(&self) -> &DelayedPublishConfig {
        &self.config
    }

    /// Publish `message` to `publication` once `delay` (or the configured default) has elapsed.
    ///
    /// Returns when the envelope has been parked in the wait queue. `overrides` are applied
    /// when the message is finally re-published.
    pub async fn delayed_publish<T: Serialize + ?Sized>(
        &self,
        publication: &str,
        message: &T,
        overrides: Option<PublishOverrides>,
        delay: Option<Duration>,
    ) -> Result<(), DelayedPublishError> {
        let delay_ms = delay.unwrap_or(self.config.default_delay).as_millis() as u64;
        if delay_ms == 0 {
            return Err(DelayedPublishError::InvalidDelay { delay_ms });
        }

        let envelope = DelayedMessage::new(
            publication,
            serde_json::to_value(message)?,
            overrides,
            delay_ms,
        );
        let content = serde_json::to_value(&envelope)?;
        let wait = PublishOverrides::new().expiration(delay_ms).persistent(false);

        if let Err(source) = self
            .broker
            .publish(&self.config.wait_publication, content, wait)
            .await
        {
            self.logger.error(&format!(
                "Failed to publish delayed message for {publication}: {source}"
            ));
            return Err(DelayedPublishError::QueueFull {
                publication: publication.to_string(),
                delay_ms,
                wait_publication: self.config.wait_publication.clone(),
                source,
            });
        }

        self.logger.debug(&format!(
            "Scheduled delayed message for {publication} in {delay_ms}ms"
        ));
        Ok(())
    }
}

/// Access to the delayed publisher of a connection built with delayed publish support
pub trait DelayedPublishConnectionExt {
    fn delayed_publisher(&self) -> Result<Arc<DelayedPublisher>, DelayedPublishError>;
}

impl DelayedPublishConnectionExt for Connection {
    fn delayed_publisher(&self) -> Result<Arc<DelayedPublisher>, DelayedPublishError> {
        self.extension::<DelayedPublisher>()
            .ok_or(DelayedPublishError::NotInstalled)
    }
}
