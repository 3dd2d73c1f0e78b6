//! # Hoppity Subscriptions
//!
//! Wires plain handler functions to the subscriptions declared in the topology. Handler
//! names are checked against the final topology while the pipeline runs, so a typo
//! aborts the build before any connection exists. Once connected, every subscription is
//! consumed one message at a time; a handler error or panic nacks the message and the
//! subscription keeps running.
//!
//! ```rust,ignore
//! let handlers = SubscriptionHandlers::new().on(
//!     "orders_subscription",
//!     |_message, content, ack, _connection| async move {
//!         println!("order: {content}");
//!         ack.ack();
//!         Ok(())
//!     },
//! );
//!
//! let connection = Hoppity::with_topology(broker, &topology)
//!     .use_middleware(with_subscriptions(handlers))
//!     .build()
//!     .await?;
//! ```

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod validation;

pub use error::SubscriptionError;
pub use handlers::{SubscriptionHandler, SubscriptionHandlers};
pub use middleware::{with_subscriptions, SubscriptionsMiddleware, ValidatedSubscriptions};
pub use validation::{validate_subscription_handlers, ValidationReport};
