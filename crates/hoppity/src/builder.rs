//! Pipeline builder
//!
//! `build()` runs three strictly ordered phases:
//!
//! 1. every middleware, in registration order, each seeing the previous one's topology
//! 2. one call to the broker provider with the final topology
//! 3. every collected `on_created` callback, in registration order, against the live
//!    connection
//!
//! The first failure aborts the build. A failure in phase 3 shuts the fresh connection
//! down before the error is returned.

use crate::broker::{Broker, BrokerProvider};
use crate::connection::Connection;
use crate::context::MiddlewareContext;
use crate::error::BuildError;
use crate::listener::{catch_panic, panic_message};
use crate::logger::Logger;
use crate::middleware::{Middleware, OnCreated};
use crate::topology::Topology;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Diagnostic record of one middleware run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MiddlewareExecution {
    pub middleware: String,
    pub modified_topology: bool,
    pub has_callback: bool,
}

/// Entry points for building a connection
pub struct Hoppity;

impl Hoppity {
    /// Start a build from `topology`. The caller's value is copied, never mutated.
    pub fn with_topology(
        provider: impl BrokerProvider + 'static,
        topology: &Topology,
    ) -> PipelineBuilder {
        PipelineBuilder::new(Arc::new(provider), topology.clone())
    }

    /// Start a build from an empty topology with a first middleware
    pub fn use_middleware(
        provider: impl BrokerProvider + 'static,
        middleware: impl Middleware + 'static,
    ) -> PipelineBuilder {
        PipelineBuilder::new(Arc::new(provider), Topology::new()).use_middleware(middleware)
    }
}

pub struct PipelineBuilder {
    provider: Arc<dyn BrokerProvider>,
    topology: Topology,
    middleware: Vec<Box<dyn Middleware>>,
    context: MiddlewareContext,
}

impl PipelineBuilder {
    pub fn new(provider: Arc<dyn BrokerProvider>, topology: Topology) -> Self {
        Self {
            provider,
            topology,
            middleware: Vec::new(),
            context: MiddlewareContext::new(),
        }
    }

    pub fn use_middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Box::new(middleware));
        self
    }

    /// Logger the context starts with
    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.context.logger = logger;
        self
    }

    pub fn middleware_count(&self) -> usize {
        self.middleware.len()
    }

    pub async fn build(self) -> Result<Connection, BuildError> {
        let PipelineBuilder {
            provider,
            mut topology,
            middleware,
            mut context,
        } = self;

        let mut executions = Vec::with_capacity(middleware.len());
        let mut callbacks: Vec<OnCreated> = Vec::new();

        for (index, step) in middleware.iter().enumerate() {
            let position = index + 1;
            let name = step
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("middleware_{index}"));
            context.middleware_names.push(name.clone());

            debug!(middleware = %name, position, "Executing middleware");

            let applied = panic::catch_unwind(AssertUnwindSafe(|| step.apply(&topology, &mut context)))
                .unwrap_or_else(|payload| Err(anyhow::anyhow!(panic_message(payload.as_ref()))));
            let output = match applied {
                Ok(output) => output,
                Err(source) => {
                    error!(middleware = %name, position, error = %source, "Middleware failed");
                    return Err(BuildError::Middleware {
                        position,
                        name,
                        source,
                    });
                }
            };

            let execution = MiddlewareExecution {
                middleware: name,
                modified_topology: output.topology != topology,
                has_callback: output.on_created.is_some(),
            };
            context.logger.debug(&format!(
                "Middleware {} executed (modified topology: {}, callback: {})",
                execution.middleware, execution.modified_topology, execution.has_callback
            ));
            executions.push(execution);

            if let Some(callback) = output.on_created {
                callbacks.push(callback);
            }
            topology = output.topology;
        }

        info!(
            middleware = executions.len(),
            callbacks = callbacks.len(),
            "Middleware pipeline complete, creating broker"
        );

        let executed = executions.len();
        let broker = provider.connect(&topology).await.map_err(|source| {
            error!(executed, error = %source, "Broker creation failed");
            BuildError::Connect { executed, source }
        })?;

        let connection = Connection::new(broker, topology, executions);

        for (index, callback) in callbacks.into_iter().enumerate() {
            let position = index + 1;
            debug!(position, "Running middleware callback");

            let connection_for_callback = connection.clone();
            let result = catch_panic(async move { callback(connection_for_callback).await }).await;

            if let Err(callback_error) = result {
                error!(position, error = %callback_error, "Middleware callback failed, shutting down broker");
                return Err(match connection.shutdown().await {
                    Ok(()) => BuildError::Callback {
                        position,
                        source: callback_error,
                    },
                    Err(source) => BuildError::ShutdownAfterCallback {
                        position,
                        source,
                        callback_error,
                    },
                });
            }
        }

        context
            .logger
            .info(&format!("Broker created with {executed} middleware(s)"));
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBroker;
    use crate::middleware::{from_fn, MiddlewareOutput};
    use crate::topology::{QueueConfig, VhostConfig};
    use parking_lot::Mutex;

    fn add_queue(name: &'static str) -> impl Middleware {
        from_fn(move |topology: &Topology, _: &mut MiddlewareContext| {
            let mut next = topology.clone();
            next.vhosts
                .entry("/".to_string())
                .or_insert_with(VhostConfig::default)
                .queues
                .insert(name.to_string(), QueueConfig::new());
            Ok(MiddlewareOutput::new(next))
        })
    }

    #[tokio::test]
    async fn middleware_see_previous_topology_and_names() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = {
            let seen = seen.clone();
            from_fn(move |topology: &Topology, context: &mut MiddlewareContext| {
                let queues: Vec<String> = topology
                    .vhost("/")
                    .map(|v| v.queues.keys().cloned().collect())
                    .unwrap_or_default();
                seen.lock().push((queues, context.middleware_names.clone()));
                Ok(MiddlewareOutput::new(topology.clone()))
            })
        };

        let connection = Hoppity::use_middleware(InMemoryBroker::new(), add_queue("a").named("adder"))
            .use_middleware(recorder)
            .build()
            .await
            .unwrap();

        let seen = seen.lock();
        assert_eq!(seen[0].0, vec!["a"]);
        assert_eq!(seen[0].1, vec!["adder", "middleware_1"]);

        let report = connection.pipeline_report();
        assert_eq!(report.len(), 2);
        assert!(report[0].modified_topology);
        assert!(!report[1].modified_topology);
        assert_eq!(report[1].middleware, "middleware_1");
    }

    #[tokio::test]
    async fn caller_topology_is_not_mutated() {
        let initial = Topology::new();
        let connection = Hoppity::with_topology(InMemoryBroker::new(), &initial)
            .use_middleware(add_queue("a"))
            .build()
            .await
            .unwrap();

        assert!(initial.vhosts.is_empty());
        assert!(connection.topology().vhost("/").is_some());
    }

    async fn exploding_callback(_: Connection) -> anyhow::Result<()> {
        panic!("callback exploded")
    }

    #[tokio::test]
    async fn panicking_callback_is_reported_as_callback_failure() {
        let broker = InMemoryBroker::new();
        let err = Hoppity::with_topology(broker.clone(), &Topology::new())
            .use_middleware(from_fn(|topology: &Topology, _: &mut MiddlewareContext| {
                Ok(MiddlewareOutput::new(topology.clone()).on_created(exploding_callback))
            }))
            .build()
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::Callback { position: 1, .. }));
        assert!(err.to_string().contains("callback exploded"));
        assert_eq!(broker.shutdown_count(), 1);
    }
}
