//! Subscription receive loop
//!
//! [`spawn_listener`] drives one [`Subscription`] on its own task. Events are handled
//! strictly one at a time in delivery order, so a subscription never runs concurrently
//! with itself, while separate subscriptions progress independently. A failing or
//! panicking handler never terminates the loop; the loop ends when the subscription's
//! stream closes.

use crate::broker::{Delivery, Subscription, SubscriptionEvent};
use crate::error::BrokerError;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Handles the events of one subscription
#[async_trait]
pub trait SubscriptionListener: Send + Sync {
    /// Handle one delivery. Returning an error nacks the delivery unless the handler
    /// already settled it.
    async fn on_message(&self, delivery: Delivery) -> anyhow::Result<()>;

    async fn on_error(&self, subscription: &str, error: BrokerError) {
        warn!(subscription = %subscription, error = %error, "Subscription error");
    }

    async fn on_invalid_content(&self, subscription: &str, error: BrokerError) {
        warn!(subscription = %subscription, error = %error, "Invalid message content");
    }
}

/// Render a panic payload the way `std` does for `&str` and `String` payloads
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Unknown error".to_string()
    }
}

/// Await `future`, turning a panic into an error carrying the panic message
pub async fn catch_panic<T, F>(future: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!(panic_message(payload.as_ref()))),
    }
}

/// Spawn the receive loop for `subscription`
pub fn spawn_listener<L>(mut subscription: Subscription, listener: L) -> JoinHandle<()>
where
    L: SubscriptionListener + 'static,
{
    tokio::spawn(async move {
        let name = subscription.name().to_string();
        debug!(subscription = %name, "Listener started");

        while let Some(event) = subscription.recv().await {
            match event {
                SubscriptionEvent::Message(delivery) => {
                    let ack = delivery.ack.clone();
                    let message_id = delivery.message.message_id.clone();
                    if let Err(err) = catch_panic(listener.on_message(delivery)).await {
                        warn!(
                            subscription = %name,
                            message_id = %message_id,
                            error = %err,
                            "Message handler failed"
                        );
                        ack.nack(&err);
                    }
                }
                SubscriptionEvent::Error(error) => listener.on_error(&name, error).await,
                SubscriptionEvent::InvalidContent(error) => {
                    listener.on_invalid_content(&name, error).await
                }
            }
        }

        debug!(subscription = %name, "Listener stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{AckOrNack, MessageEnvelope, Settlement};
    use chrono::Utc;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn delivery(content: Value) -> Delivery {
        Delivery {
            message: MessageEnvelope {
                message_id: uuid::Uuid::new_v4().to_string(),
                publication: "p".to_string(),
                exchange: String::new(),
                routing_key: "q".to_string(),
                queue: "q".to_string(),
                headers: BTreeMap::new(),
                persistent: false,
                redelivered: false,
                timestamp: Utc::now(),
            },
            content,
            ack: AckOrNack::detached(),
        }
    }

    struct Recorder {
        seen: Arc<Mutex<Vec<Value>>>,
    }

    #[async_trait]
    impl SubscriptionListener for Recorder {
        async fn on_message(&self, delivery: Delivery) -> anyhow::Result<()> {
            self.seen.lock().push(delivery.content.clone());
            match delivery.content["kind"].as_str() {
                Some("fail") => anyhow::bail!("handler failed"),
                Some("panic") => panic!("boom"),
                _ => {
                    delivery.ack.ack();
                    Ok(())
                }
            }
        }
    }

    #[tokio::test]
    async fn loop_survives_failures_and_panics() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (tx, subscription) = Subscription::channel("s");
        let handle = spawn_listener(subscription, Recorder { seen: seen.clone() });

        let failing = delivery(json!({"kind": "fail"}));
        let panicking = delivery(json!({"kind": "panic"}));
        let fine = delivery(json!({"kind": "ok"}));
        let acks = [failing.ack.clone(), panicking.ack.clone(), fine.ack.clone()];

        tx.send(SubscriptionEvent::Message(failing)).unwrap();
        tx.send(SubscriptionEvent::InvalidContent(BrokerError::InvalidContent("x".into())))
            .unwrap();
        tx.send(SubscriptionEvent::Message(panicking)).unwrap();
        tx.send(SubscriptionEvent::Message(fine)).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(seen.lock().len(), 3);
        assert_eq!(
            acks[0].settlement(),
            Some(Settlement::Nack {
                reason: "handler failed".to_string()
            })
        );
        assert_eq!(
            acks[1].settlement(),
            Some(Settlement::Nack {
                reason: "boom".to_string()
            })
        );
        assert_eq!(acks[2].settlement(), Some(Settlement::Ack));
    }

    #[test]
    fn non_string_panic_payload_becomes_unknown_error() {
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "Unknown error");
    }
}
