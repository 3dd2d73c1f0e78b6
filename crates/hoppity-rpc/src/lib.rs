//! # Hoppity RPC
//!
//! Request/reply on top of publish/subscribe. The middleware adds an RPC topic exchange
//! plus a reply queue and an inbound queue per service instance; once the connection
//! exists it consumes both queues and registers an [`RpcClient`] on the connection.
//!
//! ```rust,ignore
//! let connection = Hoppity::with_topology(broker, &topology)
//!     .use_middleware(with_rpc_support(RpcOptions::new("billing", "pod-1"))?)
//!     .build()
//!     .await?;
//!
//! let rpc = connection.rpc()?;
//! rpc.add_rpc_listener("billing.add", |req: AddRequest| async move { Ok(req.a + req.b) });
//! let sum: i64 = rpc.request("billing.add", &AddRequest { a: 2, b: 3 }).await?;
//! ```

pub mod client;
pub mod correlation;
pub mod error;
pub mod middleware;
pub mod naming;
pub mod types;

pub use client::{PendingRpc, RequestOptions, RpcClient, RpcConnectionExt};
pub use correlation::{CorrelationManager, PendingResponse};
pub use error::{RpcError, RpcErrorCode};
pub use middleware::{with_rpc_support, RpcConfig, RpcMiddleware, RpcOptions};
pub use types::{RpcErrorBody, RpcHeaders, RpcRequest, RpcResponse};
