//! # Hoppity Delayed Publish
//!
//! Publish a message after a delay without a scheduler. The envelope is parked in a
//! per-service wait queue with a TTL; when it expires the broker dead-letters it into the
//! ready queue, whose consumer re-publishes the original message. Failed re-publishes are
//! retried through the wait queue and end up on `<publication>_delayed_error` once the
//! retry budget is spent.
//!
//! ```rust,ignore
//! let connection = Hoppity::with_topology(broker, &topology)
//!     .use_middleware(with_delayed_publish(DelayedPublishOptions::new("shop"))?)
//!     .build()
//!     .await?;
//!
//! connection
//!     .delayed_publisher()?
//!     .delayed_publish("orders", &order, None, Some(Duration::from_secs(5)))
//!     .await?;
//! ```

pub mod error;
pub mod handler;
pub mod middleware;
pub mod policy;
pub mod publisher;
pub mod types;

pub use error::{DelayedPublishError, DelayedPublishErrorCode, RetryDetails};
pub use handler::{error_publication_name, handle_ready_message};
pub use middleware::{
    with_delayed_publish, DelayedPublishConfig, DelayedPublishMiddleware, DelayedPublishOptions,
};
pub use policy::{DelayState, FailureTransition, RetryPolicy};
pub use publisher::{DelayedPublishConnectionExt, DelayedPublisher};
pub use types::{DelayedErrorMessage, DelayedMessage};
