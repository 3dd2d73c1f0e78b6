//! Pending-request table keyed by correlation id
//!
//! Every [`add_request`](CorrelationManager::add_request) is matched by exactly one
//! terminal transition: resolve, reject, cancel, timeout, cleanup or removal. Whichever
//! arrives first wins; the others find no entry and report `false`.
//!
//! One manager may serve several clients. Requests registered with an owner can be
//! cleaned up per owner, leaving the rest of the table alone.

use crate::error::RpcError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

type Outcome = Result<Value, RpcError>;

struct PendingRequest {
    tx: oneshot::Sender<Outcome>,
    timer: JoinHandle<()>,
    /// Client that registered the request, if any
    owner: Option<String>,
}

/// Outcome of one pending request; settles exactly once
pub struct PendingResponse {
    rx: oneshot::Receiver<Outcome>,
}

impl Future for PendingResponse {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(RpcError::Cleanup)))
    }
}

#[derive(Default)]
pub struct CorrelationManager {
    pending: DashMap<String, PendingRequest>,
}

static SHARED: OnceLock<Arc<CorrelationManager>> = OnceLock::new();

impl CorrelationManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The process-wide instance used when none is injected
    pub fn shared() -> Arc<Self> {
        SHARED.get_or_init(CorrelationManager::new).clone()
    }

    /// Register `correlation_id` and start its timeout.
    ///
    /// If the id is already pending, the existing entry is left alone and the returned
    /// handle fails with [`RpcError::DuplicateCorrelationId`].
    pub fn add_request(self: &Arc<Self>, correlation_id: &str, timeout: Duration) -> PendingResponse {
        self.register(None, correlation_id, timeout)
    }

    /// [`add_request`](Self::add_request) on behalf of `owner`, so that
    /// [`cleanup_owner`](Self::cleanup_owner) can settle it without touching other owners
    pub fn add_owned_request(
        self: &Arc<Self>,
        owner: &str,
        correlation_id: &str,
        timeout: Duration,
    ) -> PendingResponse {
        self.register(Some(owner.to_string()), correlation_id, timeout)
    }

    fn register(
        self: &Arc<Self>,
        owner: Option<String>,
        correlation_id: &str,
        timeout: Duration,
    ) -> PendingResponse {
        let (tx, rx) = oneshot::channel();

        match self.pending.entry(correlation_id.to_string()) {
            Entry::Occupied(_) => {
                let _ = tx.send(Err(RpcError::DuplicateCorrelationId(
                    correlation_id.to_string(),
                )));
            }
            Entry::Vacant(slot) => {
                let timer = self.spawn_timeout(correlation_id.to_string(), timeout);
                slot.insert(PendingRequest { tx, timer, owner });
                debug!(correlation_id = %correlation_id, timeout_ms = timeout.as_millis() as u64, "RPC request registered");
            }
        }

        PendingResponse { rx }
    }

    fn spawn_timeout(self: &Arc<Self>, correlation_id: String, timeout: Duration) -> JoinHandle<()> {
        let manager: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(manager) = manager.upgrade() else {
                return;
            };
            if let Some((_, pending)) = manager.pending.remove(&correlation_id) {
                debug!(correlation_id = %correlation_id, "RPC request timed out");
                let _ = pending.tx.send(Err(RpcError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                }));
            }
        })
    }

    fn settle(&self, correlation_id: &str, outcome: Outcome) -> bool {
        match self.pending.remove(correlation_id) {
            Some((_, pending)) => {
                pending.timer.abort();
                let _ = pending.tx.send(outcome);
                true
            }
            None => false,
        }
    }

    pub fn resolve_request(&self, correlation_id: &str, value: Value) -> bool {
        self.settle(correlation_id, Ok(value))
    }

    pub fn reject_request(&self, correlation_id: &str, error: RpcError) -> bool {
        self.settle(correlation_id, Err(error))
    }

    pub fn cancel_request(&self, correlation_id: &str) -> bool {
        self.settle(correlation_id, Err(RpcError::Cancelled))
    }

    /// Drop a pending entry without settling its handle
    pub fn remove_request(&self, correlation_id: &str) -> bool {
        match self.pending.remove(correlation_id) {
            Some((_, pending)) => {
                pending.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Reject everything still pending
    pub fn cleanup(&self) {
        let ids: Vec<String> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        if !ids.is_empty() {
            debug!(pending = ids.len(), "Cleaning up pending RPC requests");
        }
        for id in ids {
            self.settle(&id, Err(RpcError::Cleanup));
        }
    }

    /// Reject everything still pending for `owner`
    pub fn cleanup_owner(&self, owner: &str) {
        let ids: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.value().owner.as_deref() == Some(owner))
            .map(|entry| entry.key().clone())
            .collect();
        if !ids.is_empty() {
            debug!(owner = %owner, pending = ids.len(), "Cleaning up pending RPC requests");
        }
        for id in ids {
            self.settle(&id, Err(RpcError::Cleanup));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, correlation_id: &str) -> bool {
        self.pending.contains_key(correlation_id)
    }
}
