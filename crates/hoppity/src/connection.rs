//! The connection handed back by the pipeline
//!
//! A [`Connection`] wraps the live broker with two things plugins need: a typed
//! extension registry (where `on_created` callbacks park capability objects such as an
//! RPC client) and an ordered list of shutdown hooks that run before the broker itself
//! shuts down.

use crate::broker::{Broker, BrokerHandle, Subscription};
use crate::builder::MiddlewareExecution;
use crate::error::BrokerError;
use crate::topology::{PublishOverrides, Topology};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

type ShutdownHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct ConnectionInner {
    broker: BrokerHandle,
    topology: Topology,
    report: Vec<MiddlewareExecution>,
    extensions: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    shutdown_hooks: Mutex<Vec<ShutdownHook>>,
}

#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub fn new(broker: BrokerHandle, topology: Topology, report: Vec<MiddlewareExecution>) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                broker,
                topology,
                report,
                extensions: RwLock::new(HashMap::new()),
                shutdown_hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The final topology the broker was created from
    pub fn topology(&self) -> &Topology {
        &self.inner.topology
    }

    /// One entry per middleware that ran, in execution order
    pub fn pipeline_report(&self) -> &[MiddlewareExecution] {
        &self.inner.report
    }

    pub fn broker(&self) -> &BrokerHandle {
        &self.inner.broker
    }

    /// Register a capability object. Returns the previous value of the same type.
    pub fn insert_extension<T: Any + Send + Sync>(&self, value: T) -> Option<Arc<T>> {
        self.inner
            .extensions
            .write()
            .insert(TypeId::of::<T>(), Arc::new(value))
            .and_then(|previous| previous.downcast::<T>().ok())
    }

    pub fn extension<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.inner
            .extensions
            .read()
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Run `hook` during [`shutdown`](Broker::shutdown), before the broker shuts down.
    /// Hooks run once, in registration order.
    pub fn on_shutdown<F, Fut>(&self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner
            .shutdown_hooks
            .lock()
            .push(Box::new(move || Box::pin(hook())));
    }
}

#[async_trait]
impl Broker for Connection {
    async fn publish(
        &self,
        publication: &str,
        content: Value,
        overrides: PublishOverrides,
    ) -> Result<(), BrokerError> {
        self.inner.broker.publish(publication, content, overrides).await
    }

    async fn subscribe(&self, subscription: &str) -> Result<Subscription, BrokerError> {
        self.inner.broker.subscribe(subscription).await
    }

    async fn shutdown(&self) -> Result<(), BrokerError> {
        let hooks = std::mem::take(&mut *self.inner.shutdown_hooks.lock());
        debug!(hooks = hooks.len(), "Running shutdown hooks");
        for hook in hooks {
            hook().await;
        }
        self.inner.broker.shutdown().await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("report", &self.inner.report)
            .field("extensions", &self.inner.extensions.read().len())
            .finish()
    }
}
