//! Broker client boundary
//!
//! hoppity never talks to a message broker directly. A [`BrokerProvider`] turns a final
//! [`Topology`] into a live [`Broker`], and everything above that (RPC, delayed
//! publishing, subscription wiring) is expressed through `publish`, `subscribe` and
//! `shutdown`. Topology names and option shapes are handed to the provider verbatim.

use crate::error::BrokerError;
use crate::topology::{PublishOverrides, Topology};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Shared handle to a live broker connection
pub type BrokerHandle = Arc<dyn Broker>;

/// Creates broker connections from a topology
#[async_trait]
pub trait BrokerProvider: Send + Sync {
    /// Declare the topology and return a live connection
    async fn connect(&self, topology: &Topology) -> Result<BrokerHandle, BrokerError>;
}

/// A live broker connection
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish `content` through the named publication, with call-site overrides
    /// layered on top of the publication's declared options
    async fn publish(
        &self,
        publication: &str,
        content: Value,
        overrides: PublishOverrides,
    ) -> Result<(), BrokerError>;

    /// Start consuming the named subscription
    async fn subscribe(&self, subscription: &str) -> Result<Subscription, BrokerError>;

    async fn shutdown(&self) -> Result<(), BrokerError>;
}

/// Metadata of a delivered message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub message_id: String,
    pub publication: String,
    pub exchange: String,
    pub routing_key: String,
    pub queue: String,
    #[serde(default)]
    pub headers: BTreeMap<String, Value>,
    pub persistent: bool,
    pub redelivered: bool,
    pub timestamp: DateTime<Utc>,
}

/// How a delivery was settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    /// Reject without requeue
    Nack { reason: String },
}

impl Settlement {
    pub fn is_ack(&self) -> bool {
        matches!(self, Settlement::Ack)
    }
}

/// Receives the settlement of a delivery exactly once
pub trait AckHandler: Send + Sync {
    fn settle(&self, settlement: &Settlement);
}

struct AckState {
    settled: Mutex<Option<Settlement>>,
    handler: Option<Box<dyn AckHandler>>,
}

/// Acknowledgement handle for one delivery
///
/// Cloning is cheap and every clone refers to the same delivery. The first call to
/// [`ack`](Self::ack) or [`nack`](Self::nack) wins; later calls return `false` and do
/// nothing.
#[derive(Clone)]
pub struct AckOrNack {
    inner: Arc<AckState>,
}

impl AckOrNack {
    pub fn new(handler: impl AckHandler + 'static) -> Self {
        Self {
            inner: Arc::new(AckState {
                settled: Mutex::new(None),
                handler: Some(Box::new(handler)),
            }),
        }
    }

    /// A handle that only remembers its settlement
    pub fn detached() -> Self {
        Self {
            inner: Arc::new(AckState {
                settled: Mutex::new(None),
                handler: None,
            }),
        }
    }

    pub fn ack(&self) -> bool {
        self.settle(Settlement::Ack)
    }

    pub fn nack(&self, reason: impl fmt::Display) -> bool {
        self.settle(Settlement::Nack {
            reason: reason.to_string(),
        })
    }

    pub fn is_settled(&self) -> bool {
        self.inner.settled.lock().is_some()
    }

    pub fn settlement(&self) -> Option<Settlement> {
        self.inner.settled.lock().clone()
    }

    fn settle(&self, settlement: Settlement) -> bool {
        {
            let mut settled = self.inner.settled.lock();
            if settled.is_some() {
                return false;
            }
            *settled = Some(settlement.clone());
        }
        if let Some(handler) = &self.inner.handler {
            handler.settle(&settlement);
        }
        true
    }
}

impl fmt::Debug for AckOrNack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckOrNack")
            .field("settled", &*self.inner.settled.lock())
            .finish()
    }
}

/// One delivered message
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: MessageEnvelope,
    pub content: Value,
    pub ack: AckOrNack,
}

#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    Message(Delivery),
    Error(BrokerError),
    /// A message arrived whose body could not be decoded
    InvalidContent(BrokerError),
}

/// Event stream of one subscription
///
/// The stream ends when the underlying connection is shut down.
pub struct Subscription {
    name: String,
    events: mpsc::UnboundedReceiver<SubscriptionEvent>,
}

impl Subscription {
    pub fn new(name: impl Into<String>, events: mpsc::UnboundedReceiver<SubscriptionEvent>) -> Self {
        Self {
            name: name.into(),
            events,
        }
    }

    /// A subscription plus the sender that feeds it
    pub fn channel(name: impl Into<String>) -> (mpsc::UnboundedSender<SubscriptionEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(name, rx))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn recv(&mut self) -> Option<SubscriptionEvent> {
        self.events.recv().await
    }
}

impl Stream for Subscription {
    type Item = SubscriptionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler(Arc<AtomicUsize>);

    impl AckHandler for CountingHandler {
        fn settle(&self, _settlement: &Settlement) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn first_settlement_wins() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ack = AckOrNack::new(CountingHandler(calls.clone()));
        let clone = ack.clone();

        assert!(clone.nack("boom"));
        assert!(!ack.ack());
        assert!(!ack.nack("again"));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            ack.settlement(),
            Some(Settlement::Nack {
                reason: "boom".to_string()
            })
        );
    }

    #[tokio::test]
    async fn subscription_ends_when_sender_drops() {
        let (tx, mut subscription) = Subscription::channel("orders");
        tx.send(SubscriptionEvent::Error(BrokerError::Closed)).unwrap();
        drop(tx);

        assert!(matches!(
            subscription.next().await,
            Some(SubscriptionEvent::Error(BrokerError::Closed))
        ));
        assert!(subscription.next().await.is_none());
        assert_eq!(subscription.name(), "orders");
    }
}
