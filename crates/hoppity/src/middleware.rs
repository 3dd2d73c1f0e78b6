//! Middleware: topology transforms with optional post-connection callbacks
//!
//! A middleware receives the current topology (read-only) and the shared
//! [`MiddlewareContext`], and returns a new topology plus, optionally, a callback to run
//! once the connection exists. Middleware must not perform network I/O; anything that
//! needs the broker belongs in the callback.

use crate::connection::Connection;
use crate::context::MiddlewareContext;
use crate::logger::Logger;
use crate::topology::Topology;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Callback run against the live connection after the broker is created
pub type OnCreated = Box<dyn FnOnce(Connection) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

pub struct MiddlewareOutput {
    pub topology: Topology,
    pub on_created: Option<OnCreated>,
}

impl MiddlewareOutput {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            on_created: None,
        }
    }

    pub fn on_created<F, Fut>(mut self, callback: F) -> Self
    where
        F: FnOnce(Connection) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_created = Some(Box::new(move |connection| Box::pin(callback(connection))));
        self
    }
}

impl fmt::Debug for MiddlewareOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareOutput")
            .field("topology", &self.topology)
            .field("has_callback", &self.on_created.is_some())
            .finish()
    }
}

pub trait Middleware: Send + Sync {
    /// Name used in diagnostics; anonymous middleware gets a positional name
    fn name(&self) -> Option<&str> {
        None
    }

    fn apply(
        &self,
        topology: &Topology,
        context: &mut MiddlewareContext,
    ) -> anyhow::Result<MiddlewareOutput>;

    fn named(self, name: impl Into<String>) -> Named<Self>
    where
        Self: Sized,
    {
        Named {
            name: name.into(),
            inner: self,
        }
    }
}

impl<M: Middleware + ?Sized> Middleware for Box<M> {
    fn name(&self) -> Option<&str> {
        (**self).name()
    }

    fn apply(
        &self,
        topology: &Topology,
        context: &mut MiddlewareContext,
    ) -> anyhow::Result<MiddlewareOutput> {
        (**self).apply(topology, context)
    }
}

/// A middleware with an explicit diagnostic name
pub struct Named<M> {
    name: String,
    inner: M,
}

impl<M: Middleware> Middleware for Named<M> {
    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn apply(
        &self,
        topology: &Topology,
        context: &mut MiddlewareContext,
    ) -> anyhow::Result<MiddlewareOutput> {
        self.inner.apply(topology, context)
    }
}

/// Middleware backed by a closure; anonymous unless wrapped with [`Middleware::named`]
pub struct FnMiddleware<F> {
    f: F,
}

pub fn from_fn<F>(f: F) -> FnMiddleware<F>
where
    F: Fn(&Topology, &mut MiddlewareContext) -> anyhow::Result<MiddlewareOutput> + Send + Sync,
{
    FnMiddleware { f }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&Topology, &mut MiddlewareContext) -> anyhow::Result<MiddlewareOutput> + Send + Sync,
{
    fn apply(
        &self,
        topology: &Topology,
        context: &mut MiddlewareContext,
    ) -> anyhow::Result<MiddlewareOutput> {
        (self.f)(topology, context)
    }
}

/// Replaces the context logger for every middleware that runs after it
pub struct CustomLogger {
    logger: Arc<dyn Logger>,
}

pub fn with_custom_logger(logger: Arc<dyn Logger>) -> CustomLogger {
    CustomLogger { logger }
}

impl Middleware for CustomLogger {
    fn name(&self) -> Option<&str> {
        Some("custom-logger")
    }

    fn apply(
        &self,
        topology: &Topology,
        context: &mut MiddlewareContext,
    ) -> anyhow::Result<MiddlewareOutput> {
        context.logger = self.logger.clone();
        context.logger.debug("Custom logger installed");
        Ok(MiddlewareOutput::new(topology.clone()))
    }
}
