//! Wire shapes of RPC requests and responses

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Diagnostic headers carried on every request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcHeaders {
    #[serde(rename = "service-name")]
    pub service_name: String,
    #[serde(rename = "instance-id")]
    pub instance_id: String,
    #[serde(rename = "rpc_name")]
    pub rpc_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcRequest {
    pub correlation_id: String,
    pub rpc_name: String,
    #[serde(default)]
    pub payload: Value,
    pub reply_to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<RpcHeaders>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcResponse {
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

impl RpcResponse {
    pub fn success(correlation_id: impl Into<String>, payload: Value) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            payload: Some(payload),
            error: None,
        }
    }

    pub fn failure(
        correlation_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            payload: None,
            error: Some(RpcErrorBody {
                code: code.into(),
                message: message.into(),
                details: None,
            }),
        }
    }
}
