//! RPC middleware: topology contribution and connection setup

use crate::client::{InboundListener, ReplyListener, RpcClient};
use crate::correlation::CorrelationManager;
use crate::error::RpcError;
use crate::naming::{inbound_queue_name, reply_queue_name, service_binding_pattern};
use hoppity::topology::{
    BindingConfig, ExchangeConfig, ExchangeType, PublicationConfig, QueueConfig,
    SubscriptionConfig, DEFAULT_EXCHANGE,
};
use hoppity::{
    spawn_listener, Broker, Connection, Logger, Middleware, MiddlewareContext, MiddlewareOutput,
    Topology,
};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_RPC_EXCHANGE: &str = "rpc_requests";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);
pub const REQUEST_PUBLICATION: &str = "rpc_request";
pub const REPLY_PUBLICATION: &str = "rpc_reply";

/// Options for [`with_rpc_support`]
#[derive(Clone)]
pub struct RpcOptions {
    pub service_name: String,
    pub instance_id: String,
    pub rpc_exchange: Option<String>,
    pub default_timeout: Duration,
    /// Defaults to [`CorrelationManager::shared`]
    pub correlation_manager: Option<Arc<CorrelationManager>>,
}

impl RpcOptions {
    pub fn new(service_name: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            instance_id: instance_id.into(),
            rpc_exchange: None,
            default_timeout: DEFAULT_TIMEOUT,
            correlation_manager: None,
        }
    }

    pub fn rpc_exchange(mut self, rpc_exchange: impl Into<String>) -> Self {
        self.rpc_exchange = Some(rpc_exchange.into());
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn correlation_manager(mut self, manager: Arc<CorrelationManager>) -> Self {
        self.correlation_manager = Some(manager);
        self
    }
}

/// RPC settings published into the middleware context for later middleware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcConfig {
    pub service_name: String,
    pub instance_id: String,
    pub rpc_exchange: String,
    pub reply_queue: String,
    pub inbound_queue: String,
}

pub struct RpcMiddleware {
    config: RpcConfig,
    default_timeout: Duration,
    manager: Arc<CorrelationManager>,
}

/// Validate `options` and build the RPC middleware
pub fn with_rpc_support(options: RpcOptions) -> Result<RpcMiddleware, RpcError> {
    let service_name = options.service_name.trim();
    if service_name.is_empty() {
        return Err(RpcError::InvalidConfig(
            "service_name is required and must be a non-empty string".to_string(),
        ));
    }
    let instance_id = options.instance_id.trim();
    if instance_id.is_empty() {
        return Err(RpcError::InvalidConfig(
            "instance_id is required and must be a non-empty string".to_string(),
        ));
    }
    let rpc_exchange = match options.rpc_exchange.as_deref().map(str::trim) {
        Some("") => {
            return Err(RpcError::InvalidConfig(
                "rpc_exchange must be a non-empty string when provided".to_string(),
            ))
        }
        Some(exchange) => exchange.to_string(),
        None => DEFAULT_RPC_EXCHANGE.to_string(),
    };

    Ok(RpcMiddleware {
        config: RpcConfig {
            service_name: service_name.to_string(),
            instance_id: instance_id.to_string(),
            rpc_exchange,
            reply_queue: reply_queue_name(service_name, instance_id),
            inbound_queue: inbound_queue_name(service_name, instance_id),
        },
        default_timeout: options.default_timeout,
        manager: options
            .correlation_manager
            .unwrap_or_else(CorrelationManager::shared),
    })
}

impl Middleware for RpcMiddleware {
    fn name(&self) -> Option<&str> {
        Some("rpc-support")
    }

    fn apply(
        &self,
        topology: &Topology,
        context: &mut MiddlewareContext,
    ) -> anyhow::Result<MiddlewareOutput> {
        let config = &self.config;
        let logger = context.logger.clone();

        logger.info(&format!(
            "[RpcSupport] Applying RPC middleware for service: {}",
            config.service_name
        ));
        if context.store.insert(config.clone()).is_err() {
            logger.warn("[RpcSupport] RPC configuration already exists in context from previous middleware");
        }

        let mut next = topology.clone();
        for (vhost_name, vhost) in next.vhosts.iter_mut() {
            vhost.exchanges.insert(
                config.rpc_exchange.clone(),
                ExchangeConfig::new(ExchangeType::Topic).durable(true),
            );
            for queue in [&config.reply_queue, &config.inbound_queue] {
                vhost.queues.insert(
                    queue.clone(),
                    QueueConfig::new().exclusive(true).auto_delete(true),
                );
                vhost.subscriptions.insert(
                    format!("{queue}_subscription"),
                    SubscriptionConfig::queue(queue.clone()).prefetch(1),
                );
            }
            vhost.bindings.insert(
                format!("{}_binding", config.inbound_queue),
                BindingConfig::queue(
                    config.rpc_exchange.clone(),
                    config.inbound_queue.clone(),
                    service_binding_pattern(&config.service_name),
                ),
            );
            vhost.publications.insert(
                REQUEST_PUBLICATION.to_string(),
                PublicationConfig::exchange(config.rpc_exchange.clone()),
            );
            vhost.publications.insert(
                REPLY_PUBLICATION.to_string(),
                PublicationConfig::exchange(DEFAULT_EXCHANGE)
                    .routing_key("{{replyTo}}")
                    .persistent(false),
            );

            logger.debug(&format!(
                "[RpcSupport] Added RPC infrastructure to vhost '{vhost_name}': exchange {}, reply queue {}, inbound queue {}",
                config.rpc_exchange, config.reply_queue, config.inbound_queue
            ));
        }

        let config = config.clone();
        let default_timeout = self.default_timeout;
        let manager = self.manager.clone();
        Ok(MiddlewareOutput::new(next).on_created(move |connection| {
            install(connection, config, default_timeout, manager, logger)
        }))
    }
}

async fn install(
    connection: Connection,
    config: RpcConfig,
    default_timeout: Duration,
    manager: Arc<CorrelationManager>,
    logger: Arc<dyn Logger>,
) -> anyhow::Result<()> {
    let replies = connection
        .subscribe(&format!("{}_subscription", config.reply_queue))
        .await?;
    let inbound = connection
        .subscribe(&format!("{}_subscription", config.inbound_queue))
        .await?;

    let client = RpcClient::new(
        connection.broker().clone(),
        config.clone(),
        default_timeout,
        manager.clone(),
        logger.clone(),
    );

    spawn_listener(
        replies,
        ReplyListener {
            manager,
            logger: logger.clone(),
        },
    );
    spawn_listener(inbound, InboundListener::new(client.clone()));

    let owner = client.clone();
    connection.on_shutdown(move || async move {
        owner.cleanup();
    });
    connection.insert_extension(client);

    logger.info(&format!(
        "[RpcBroker] RPC broker setup complete for service: {}",
        config.service_name
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoppity::topology::{QueueOptions, VhostConfig};

    fn options() -> RpcOptions {
        RpcOptions::new("  billing ", "pod-1").correlation_manager(CorrelationManager::new())
    }

    #[test]
    fn rejects_blank_identity() {
        assert!(matches!(
            with_rpc_support(RpcOptions::new(" ", "1")),
            Err(RpcError::InvalidConfig(message)) if message.starts_with("service_name")
        ));
        assert!(matches!(
            with_rpc_support(RpcOptions::new("svc", "")),
            Err(RpcError::InvalidConfig(message)) if message.starts_with("instance_id")
        ));
        assert!(with_rpc_support(RpcOptions::new("svc", "1").rpc_exchange("  ")).is_err());
    }

    #[test]
    fn adds_rpc_infrastructure_to_every_vhost() {
        let middleware = with_rpc_support(options()).unwrap();
        let topology = Topology::new()
            .with_vhost("/", VhostConfig::default())
            .with_vhost("other", VhostConfig::default());
        let mut context = MiddlewareContext::with_logger(Arc::new(hoppity::SilentLogger));

        let output = middleware.apply(&topology, &mut context).unwrap();
        assert!(output.on_created.is_some());

        for vhost in output.topology.vhosts.values() {
            assert_eq!(vhost.exchanges["rpc_requests"].exchange_type, ExchangeType::Topic);
            assert_eq!(
                vhost.queues["rpc_billing_pod_1_reply"].options,
                QueueOptions {
                    exclusive: Some(true),
                    auto_delete: Some(true),
                    ..QueueOptions::default()
                }
            );
            let binding = &vhost.bindings["rpc_billing_pod_1_inbound_binding"];
            assert_eq!(binding.binding_key.as_deref(), Some("rpc.billing.#.request"));
            assert_eq!(
                vhost.subscriptions["rpc_billing_pod_1_inbound_subscription"].options.prefetch,
                Some(1)
            );
            assert_eq!(vhost.publications["rpc_reply"].exchange.as_deref(), Some(""));
        }

        let stored = context.store.get::<RpcConfig>().unwrap();
        assert_eq!(stored.service_name, "billing");
        assert_eq!(stored.reply_queue, "rpc_billing_pod_1_reply");
    }
}
