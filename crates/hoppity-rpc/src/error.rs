//! RPC error taxonomy and wire error codes

use hoppity::BrokerError;
use serde_json::Value;
use thiserror::Error;

/// Error codes carried in RPC error responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcErrorCode {
    Timeout,
    MethodNotFound,
    HandlerError,
    Cancelled,
    /// Connectivity-level failure
    ServiceUnavailable,
}

impl RpcErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcErrorCode::Timeout => "RPC_TIMEOUT",
            RpcErrorCode::MethodNotFound => "RPC_METHOD_NOT_FOUND",
            RpcErrorCode::HandlerError => "RPC_HANDLER_ERROR",
            RpcErrorCode::Cancelled => "RPC_CANCELLED",
            RpcErrorCode::ServiceUnavailable => "RPC_SERVICE_UNAVAILABLE",
        }
    }
}

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("RPC request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("RPC request cancelled")]
    Cancelled,

    #[error("RPC manager cleanup")]
    Cleanup,

    /// Error response sent by the serving side
    #[error("{message}")]
    Remote {
        code: String,
        message: String,
        details: Option<Value>,
    },

    #[error("Correlation id '{0}' already has a pending request")]
    DuplicateCorrelationId(String),

    #[error("Failed to publish RPC request '{rpc_name}': {source}")]
    Publish {
        rpc_name: String,
        #[source]
        source: BrokerError,
    },

    #[error("Invalid RPC configuration: {0}")]
    InvalidConfig(String),

    #[error("RPC payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("RPC support is not installed on this connection")]
    NotInstalled,
}

impl RpcError {
    /// Wire code for errors that have one
    pub fn code(&self) -> Option<&str> {
        match self {
            RpcError::Timeout { .. } => Some(RpcErrorCode::Timeout.as_str()),
            RpcError::Cancelled | RpcError::Cleanup => Some(RpcErrorCode::Cancelled.as_str()),
            RpcError::Remote { code, .. } => Some(code),
            RpcError::Publish { .. } => Some(RpcErrorCode::ServiceUnavailable.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_and_codes() {
        let timeout = RpcError::Timeout { timeout_ms: 250 };
        assert_eq!(timeout.to_string(), "RPC request timed out after 250ms");
        assert_eq!(timeout.code(), Some("RPC_TIMEOUT"));

        let remote = RpcError::Remote {
            code: RpcErrorCode::MethodNotFound.as_str().to_string(),
            message: "RPC method 'x' not found".to_string(),
            details: None,
        };
        assert_eq!(remote.to_string(), "RPC method 'x' not found");
        assert_eq!(remote.code(), Some("RPC_METHOD_NOT_FOUND"));
        assert_eq!(RpcError::NotInstalled.code(), None);
    }
}
