//! Delayed publish middleware: wait/ready/error queues and the ready consumer

use crate::error::DelayedPublishError;
use crate::handler::{error_publication_name, ReadyListener};
use crate::policy::{RetryPolicy, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};
use crate::publisher::DelayedPublisher;
use hoppity::topology::{PublicationConfig, QueueConfig, SubscriptionConfig, DEFAULT_EXCHANGE};
use hoppity::{
    spawn_listener, Broker, Connection, Logger, Middleware, MiddlewareContext, MiddlewareOutput,
    Topology,
};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_DELAY: Duration = Duration::from_millis(30_000);

/// Options for [`with_delayed_publish`]
#[derive(Debug, Clone)]
pub struct DelayedPublishOptions {
    pub service_name: String,
    pub default_delay: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl DelayedPublishOptions {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            default_delay: DEFAULT_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

/// Delayed publish settings published into the middleware context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayedPublishConfig {
    pub service_name: String,
    pub default_delay: Duration,
    pub policy: RetryPolicy,
    pub wait_queue: String,
    pub ready_queue: String,
    pub error_queue: String,
    pub wait_publication: String,
    pub ready_subscription: String,
}

impl DelayedPublishConfig {
    fn new(service_name: &str, options: &DelayedPublishOptions) -> Self {
        Self {
            service_name: service_name.to_string(),
            default_delay: options.default_delay,
            policy: RetryPolicy {
                max_retries: options.max_retries,
                retry_delay: options.retry_delay,
            },
            wait_queue: format!("{service_name}_wait"),
            ready_queue: format!("{service_name}_ready"),
            error_queue: format!("{service_name}_delayed_errors"),
            wait_publication: format!("{service_name}_delayed_wait"),
            ready_subscription: format!("{service_name}_ready_subscription"),
        }
    }
}

pub struct DelayedPublishMiddleware {
    config: DelayedPublishConfig,
}

/// Validate `options` and build the delayed publish middleware
pub fn with_delayed_publish(
    options: DelayedPublishOptions,
) -> Result<DelayedPublishMiddleware, DelayedPublishError> {
    let service_name = options.service_name.trim();
    if service_name.is_empty() {
        return Err(DelayedPublishError::InvalidConfig(
            "service_name is required and must be a non-empty string".to_string(),
        ));
    }

    if options.default_delay.is_zero() {
        return Err(DelayedPublishError::InvalidConfig(
            "default_delay must be greater than 0".to_string(),
        ));
    }
    if options.retry_delay.is_zero() {
        return Err(DelayedPublishError::InvalidConfig(
            "retry_delay must be greater than 0".to_string(),
        ));
    }

    Ok(DelayedPublishMiddleware {
        config: DelayedPublishConfig::new(service_name, &options),
    })
}

impl Middleware for DelayedPublishMiddleware {
    fn name(&self) -> Option<&str> {
        Some("delayed-publish")
    }

    fn apply(
        &self,
        topology: &Topology,
        context: &mut MiddlewareContext,
    ) -> anyhow::Result<MiddlewareOutput> {
        let config = &self.config;
        let logger = context.logger.clone();

        logger.info(&format!(
            "[DelayedPublish] Applying delayed publish middleware for service: {}",
            config.service_name
        ));
        if context.store.insert(config.clone()).is_err() {
            logger.warn("[DelayedPublish] Delayed publish configuration already exists in context from previous middleware");
        }

        let mut next = topology.clone();
        for (vhost_name, vhost) in next.vhosts.iter_mut() {
            vhost.queues.insert(
                config.wait_queue.clone(),
                QueueConfig::new()
                    .durable(false)
                    .auto_delete(false)
                    .dead_letter_to(DEFAULT_EXCHANGE, config.ready_queue.clone()),
            );
            for queue in [&config.ready_queue, &config.error_queue] {
                vhost.queues.insert(
                    queue.clone(),
                    QueueConfig::new().durable(false).auto_delete(false),
                );
            }

            let error_publications: Vec<String> = vhost
                .publications
                .keys()
                .filter(|name| !name.ends_with("_delayed_error"))
                .map(|name| error_publication_name(name))
                .collect();
            for publication in error_publications {
                vhost.publications.entry(publication).or_insert_with(|| {
                    PublicationConfig::queue(config.error_queue.clone()).persistent(false)
                });
            }

            vhost.publications.insert(
                config.wait_publication.clone(),
                PublicationConfig::exchange(DEFAULT_EXCHANGE)
                    .routing_key(config.wait_queue.clone())
                    .persistent(false),
            );
            vhost.subscriptions.insert(
                config.ready_subscription.clone(),
                SubscriptionConfig::queue(config.ready_queue.clone()).prefetch(1),
            );

            logger.debug(&format!(
                "[DelayedPublish] Added delayed publish infrastructure to vhost '{vhost_name}': wait queue {}, ready queue {}, error queue {}",
                config.wait_queue, config.ready_queue, config.error_queue
            ));
        }

        let config = Arc::new(config.clone());
        Ok(MiddlewareOutput::new(next).on_created(move |connection| install(connection, config, logger)))
    }
}

async fn install(
    connection: Connection,
    config: Arc<DelayedPublishConfig>,
    logger: Arc<dyn Logger>,
) -> anyhow::Result<()> {
    let ready = connection.subscribe(&config.ready_subscription).await?;

    spawn_listener(
        ready,
        ReadyListener {
            broker: connection.broker().clone(),
            wait_publication: config.wait_publication.clone(),
            policy: config.policy,
            logger: logger.clone(),
        },
    );
    connection.insert_extension(DelayedPublisher::new(
        connection.broker().clone(),
        config.clone(),
        logger.clone(),
    ));

    logger.info(&format!(
        "[DelayedPublish] Delayed publish setup complete for service: {}",
        config.service_name
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoppity::topology::VhostConfig;
    use hoppity::SilentLogger;
    use serde_json::json;

    fn topology() -> Topology {
        Topology::new().with_vhost(
            "/",
            VhostConfig::default()
                .with_queue("orders", QueueConfig::new())
                .with_publication("orders", PublicationConfig::queue("orders")),
        )
    }

    #[test]
    fn rejects_blank_service_name() {
        assert!(matches!(
            with_delayed_publish(DelayedPublishOptions::new("   ")),
            Err(DelayedPublishError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_zero_delays() {
        let zero_default = with_delayed_publish(
            DelayedPublishOptions::new("shop").default_delay(Duration::ZERO),
        );
        assert!(matches!(
            zero_default,
            Err(DelayedPublishError::InvalidConfig(message)) if message.starts_with("default_delay")
        ));

        let zero_retry = with_delayed_publish(
            DelayedPublishOptions::new("shop").retry_delay(Duration::ZERO),
        );
        assert!(matches!(
            zero_retry,
            Err(DelayedPublishError::InvalidConfig(message)) if message.starts_with("retry_delay")
        ));
    }

    #[test]
    fn adds_delay_infrastructure() {
        let middleware = with_delayed_publish(DelayedPublishOptions::new(" shop ")).unwrap();
        let mut context = MiddlewareContext::with_logger(Arc::new(SilentLogger));

        let output = middleware.apply(&topology(), &mut context).unwrap();
        let vhost = output.topology.vhost("/").unwrap();

        let wait = &vhost.queues["shop_wait"].options;
        assert_eq!(wait.durable, Some(false));
        assert_eq!(wait.auto_delete, Some(false));
        assert_eq!(wait.arguments["x-dead-letter-exchange"], json!(""));
        assert_eq!(wait.arguments["x-dead-letter-routing-key"], json!("shop_ready"));
        assert!(vhost.queues.contains_key("shop_ready"));
        assert!(vhost.queues.contains_key("shop_delayed_errors"));

        let publication = &vhost.publications["shop_delayed_wait"];
        assert_eq!(publication.exchange.as_deref(), Some(""));
        assert_eq!(publication.routing_key.as_deref(), Some("shop_wait"));
        assert_eq!(
            vhost.subscriptions["shop_ready_subscription"].options.prefetch,
            Some(1)
        );
        assert_eq!(
            vhost.publications["orders_delayed_error"].queue.as_deref(),
            Some("shop_delayed_errors")
        );
        assert!(!vhost.publications.contains_key("shop_delayed_wait_delayed_error"));

        let stored = context.store.get::<DelayedPublishConfig>().unwrap();
        assert_eq!(stored.service_name, "shop");
        assert_eq!(stored.policy, RetryPolicy::default());
    }

    #[test]
    fn existing_error_publication_is_kept() {
        let mut topology = topology();
        if let Some(vhost) = topology.vhosts.get_mut("/") {
            vhost.publications.insert(
                "orders_delayed_error".into(),
                PublicationConfig::queue("orders"),
            );
        }
        let middleware = with_delayed_publish(DelayedPublishOptions::new("shop")).unwrap();
        let mut context = MiddlewareContext::with_logger(Arc::new(SilentLogger));

        let output = middleware.apply(&topology, &mut context).unwrap();
        let vhost = output.topology.vhost("/").unwrap();
        assert_eq!(
            vhost.publications["orders_delayed_error"].queue.as_deref(),
            Some("orders")
        );
    }
}
