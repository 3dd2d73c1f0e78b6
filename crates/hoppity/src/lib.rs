//! # Hoppity
//!
//! Builds a message-broker connection from a declarative [`Topology`] by running it
//! through a pipeline of middleware. Each middleware may refine the topology and may
//! register a callback that runs once the connection exists.
//!
//! ## Module Organization
//!
//! - `topology`: the declarative topology model and its JSON/YAML/TOML loaders
//! - `context`: per-build context with the logger and a typed, set-once store
//! - `middleware`: the [`Middleware`] trait, closure middleware, custom logger
//! - `builder`: [`Hoppity`] entry points and the three-phase [`PipelineBuilder`]
//! - `broker`: the broker client boundary ([`BrokerProvider`], [`Broker`], deliveries)
//! - `connection`: the [`Connection`] returned by a build, with extensions and shutdown hooks
//! - `listener`: sequential subscription receive loop
//! - `memory`: [`InMemoryBroker`], the reference broker used by tests and demos
//! - `logger`: the [`Logger`] boundary
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hoppity::{Hoppity, InMemoryBroker, Topology};
//!
//! let connection = Hoppity::with_topology(InMemoryBroker::new(), &topology)
//!     .use_middleware(with_rpc_support(rpc_options)?)
//!     .use_middleware(with_delayed_publish(delayed_options)?)
//!     .build()
//!     .await?;
//! ```

pub mod broker;
pub mod builder;
pub mod connection;
pub mod context;
pub mod error;
pub mod listener;
pub mod logger;
pub mod memory;
pub mod middleware;
pub mod topology;

pub use broker::{
    AckHandler, AckOrNack, Broker, BrokerHandle, BrokerProvider, Delivery, MessageEnvelope,
    Settlement, Subscription, SubscriptionEvent,
};
pub use builder::{Hoppity, MiddlewareExecution, PipelineBuilder};
pub use connection::Connection;
pub use context::{ContextStore, MiddlewareContext};
pub use error::{BrokerError, BuildError, ContextError};
pub use listener::{catch_panic, panic_message, spawn_listener, SubscriptionListener};
pub use logger::{LogLevel, Logger, SilentLogger, TracingLogger};
pub use memory::{InMemoryBroker, PublishFailure};
pub use middleware::{from_fn, with_custom_logger, Middleware, MiddlewareOutput, OnCreated};
pub use topology::{PublishOptions, PublishOverrides, Topology, TopologyError};
