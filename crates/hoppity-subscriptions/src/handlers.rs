//! Subscription handler registry

use futures::future::BoxFuture;
use hoppity::{AckOrNack, Connection, MessageEnvelope};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Type-erased handler: `(message, content, ack, connection)`
pub type SubscriptionHandler = Arc<
    dyn Fn(MessageEnvelope, Value, AckOrNack, Connection) -> BoxFuture<'static, anyhow::Result<()>>
        + Send
        + Sync,
>;

/// Handlers keyed by subscription name, kept in registration order
#[derive(Clone, Default)]
pub struct SubscriptionHandlers {
    entries: Vec<(String, SubscriptionHandler)>,
}

impl SubscriptionHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `subscription`, replacing an earlier one with the same name
    pub fn on<F, Fut>(mut self, subscription: impl Into<String>, handler: F) -> Self
    where
        F: Fn(MessageEnvelope, Value, AckOrNack, Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: SubscriptionHandler = Arc::new(
            move |message: MessageEnvelope,
                  content: Value,
                  ack: AckOrNack,
                  connection: Connection|
                  -> BoxFuture<'static, anyhow::Result<()>> {
                Box::pin(handler(message, content, ack, connection))
            },
        );
        let subscription = subscription.into();
        match self.entries.iter_mut().find(|(name, _)| *name == subscription) {
            Some(entry) => entry.1 = handler,
            None => self.entries.push((subscription, handler)),
        }
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn get(&self, subscription: &str) -> Option<&SubscriptionHandler> {
        self.entries
            .iter()
            .find(|(name, _)| name == subscription)
            .map(|(_, handler)| handler)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &SubscriptionHandler)> {
        self.entries.iter().map(|(name, handler)| (name.as_str(), handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_registration_order_and_replaces_duplicates() {
        let handlers = SubscriptionHandlers::new()
            .on("b", |_, _, _, _| async { anyhow::Ok(()) })
            .on("a", |_, _, _, _| async { anyhow::Ok(()) })
            .on("b", |_, _, _, _| async { anyhow::bail!("second") });

        assert_eq!(handlers.names().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(handlers.len(), 2);
        assert!(handlers.get("a").is_some());
        assert!(handlers.get("c").is_none());
    }
}
