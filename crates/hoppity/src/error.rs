//! Error types for the hoppity core
//!
//! Broker-boundary failures are [`BrokerError`]; anything that goes wrong while
//! assembling a connection is a [`BuildError`]. User-supplied code (middleware bodies,
//! `on_created` callbacks) returns `anyhow::Result`, and the original error is kept on
//! the `source()` chain of the wrapping variant.

use thiserror::Error;

/// Errors raised by a broker provider or a live broker connection
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Unknown publication: {0}")]
    UnknownPublication(String),

    #[error("Unknown subscription: {0}")]
    UnknownSubscription(String),

    #[error("Message published to '{publication}' with routing key '{routing_key}' was unroutable")]
    Unroutable {
        publication: String,
        routing_key: String,
    },

    #[error("Publish to '{publication}' failed: {message}")]
    Publish { publication: String, message: String },

    #[error("Invalid message content: {0}")]
    InvalidContent(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Connection is closed")]
    Closed,

    #[error("Shutdown failed: {0}")]
    Shutdown(String),
}

/// Errors raised by the typed middleware context store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Context slot for {type_name} is already set")]
    SlotOccupied { type_name: &'static str },
}

/// Errors raised by [`PipelineBuilder::build`](crate::PipelineBuilder::build)
#[derive(Error, Debug)]
pub enum BuildError {
    /// A middleware failed during the topology phase; nothing was connected
    #[error("Middleware {position} ({name}) failed: {source}")]
    Middleware {
        position: usize,
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// The broker provider refused to create a connection; no callback ran
    #[error("Broker creation failed. Pipeline executed {executed} middleware(s): {source}")]
    Connect {
        executed: usize,
        #[source]
        source: BrokerError,
    },

    /// An `on_created` callback failed and the connection was shut down
    #[error("Middleware callback {position} failed: {source}")]
    Callback {
        position: usize,
        #[source]
        source: anyhow::Error,
    },

    /// An `on_created` callback failed and shutting the connection down failed too.
    /// The shutdown error is the primary cause; the callback error is kept alongside.
    #[error("Shutdown after middleware callback {position} failed: {source}")]
    ShutdownAfterCallback {
        position: usize,
        #[source]
        source: BrokerError,
        callback_error: anyhow::Error,
    },
}

impl BuildError {
    /// 1-based position of the failing middleware or callback, if any
    pub fn position(&self) -> Option<usize> {
        match self {
            BuildError::Middleware { position, .. }
            | BuildError::Callback { position, .. }
            | BuildError::ShutdownAfterCallback { position, .. } => Some(*position),
            BuildError::Connect { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn middleware_error_names_position_and_keeps_cause() {
        let err = BuildError::Middleware {
            position: 2,
            name: "rpc".to_string(),
            source: anyhow::anyhow!("bad options"),
        };

        assert_eq!(err.to_string(), "Middleware 2 (rpc) failed: bad options");
        assert_eq!(err.source().map(|s| s.to_string()).as_deref(), Some("bad options"));
        assert_eq!(err.position(), Some(2));
    }

    #[test]
    fn connect_error_reports_executed_count() {
        let err = BuildError::Connect {
            executed: 3,
            source: BrokerError::Connection("refused".to_string()),
        };

        assert!(err
            .to_string()
            .starts_with("Broker creation failed. Pipeline executed 3 middleware(s)"));
        assert_eq!(err.position(), None);
    }
}
