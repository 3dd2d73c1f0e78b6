//! Subscription wiring middleware

use crate::error::SubscriptionError;
use crate::handlers::{SubscriptionHandler, SubscriptionHandlers};
use crate::validation::validate_subscription_handlers;
use async_trait::async_trait;
use hoppity::{
    spawn_listener, Broker, BrokerError, Connection, Delivery, Logger, Middleware,
    MiddlewareContext, MiddlewareOutput, SubscriptionListener, Topology,
};
use std::sync::Arc;

/// Subscription names whose handlers passed validation, published into the middleware context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSubscriptions(pub Vec<String>);

pub struct SubscriptionsMiddleware {
    handlers: SubscriptionHandlers,
}

pub fn with_subscriptions(handlers: SubscriptionHandlers) -> SubscriptionsMiddleware {
    SubscriptionsMiddleware { handlers }
}

impl Middleware for SubscriptionsMiddleware {
    fn name(&self) -> Option<&str> {
        Some("subscriptions")
    }

    fn apply(
        &self,
        topology: &Topology,
        context: &mut MiddlewareContext,
    ) -> anyhow::Result<MiddlewareOutput> {
        let report = validate_subscription_handlers(topology, self.handlers.names());
        if !report.is_valid() {
            return Err(SubscriptionError::Validation(report).into());
        }

        let validated: Vec<String> = self.handlers.names().map(str::to_string).collect();
        context.logger.info(&format!(
            "Validated {} subscription handlers: {}",
            validated.len(),
            validated.join(", ")
        ));
        if context
            .store
            .insert(ValidatedSubscriptions(validated))
            .is_err()
        {
            context
                .logger
                .warn("Validated subscriptions already exist in context from previous middleware");
        }

        let handlers = self.handlers.clone();
        let logger = context.logger.clone();
        Ok(MiddlewareOutput::new(topology.clone())
            .on_created(move |connection| install(connection, handlers, logger)))
    }
}

async fn install(
    connection: Connection,
    handlers: SubscriptionHandlers,
    logger: Arc<dyn Logger>,
) -> anyhow::Result<()> {
    for (name, handler) in handlers.iter() {
        let subscription = match connection.subscribe(name).await {
            Ok(subscription) => subscription,
            Err(err) => {
                logger.error(&format!(
                    "Failed to set up subscription handler for '{name}': {err}"
                ));
                return Err(err.into());
            }
        };

        spawn_listener(
            subscription,
            HandlerListener {
                name: name.to_string(),
                handler: handler.clone(),
                connection: connection.clone(),
                logger: logger.clone(),
            },
        );
        logger.info(&format!(
            "Successfully set up subscription handler for '{name}'"
        ));
    }

    logger.info(&format!(
        "Successfully set up {} subscription handlers",
        handlers.len()
    ));
    Ok(())
}

struct HandlerListener {
    name: String,
    handler: SubscriptionHandler,
    connection: Connection,
    logger: Arc<dyn Logger>,
}

#[async_trait]
impl SubscriptionListener for HandlerListener {
    async fn on_message(&self, delivery: Delivery) -> anyhow::Result<()> {
        let Delivery {
            message,
            content,
            ack,
        } = delivery;

        let outcome = hoppity::catch_panic((self.handler)(
            message,
            content,
            ack.clone(),
            self.connection.clone(),
        ))
        .await;

        if let Err(err) = &outcome {
            self.logger.error(&format!(
                "Error in subscription handler for '{}': {err}",
                self.name
            ));
            ack.nack(err);
        }
        Ok(())
    }

    async fn on_error(&self, subscription: &str, error: BrokerError) {
        self.logger
            .warn(&format!("Subscription error for '{subscription}': {error}"));
    }

    async fn on_invalid_content(&self, subscription: &str, error: BrokerError) {
        self.logger.warn(&format!(
            "Invalid content for subscription '{subscription}': {error}"
        ));
    }
}
