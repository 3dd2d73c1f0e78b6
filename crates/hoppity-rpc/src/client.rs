//! RPC capability attached to a built connection

use crate::correlation::{CorrelationManager, PendingResponse};
use crate::error::{RpcError, RpcErrorCode};
use crate::middleware::{RpcConfig, REPLY_PUBLICATION, REQUEST_PUBLICATION};
use crate::naming::rpc_routing_key;
use crate::types::{RpcHeaders, RpcRequest, RpcResponse};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use hoppity::{
    catch_panic, Broker, BrokerError, BrokerHandle, Connection, Delivery, Logger,
    PublishOverrides, SubscriptionListener,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

type RpcHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Per-call options for [`RpcClient::request_with`]
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Overrides the configured default timeout
    pub timeout: Option<Duration>,
    /// Layered on top of the request publication's defaults
    pub overrides: PublishOverrides,
}

impl RequestOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn overrides(mut self, overrides: PublishOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// A request that has been published and awaits its reply
pub struct PendingRpc {
    pub correlation_id: String,
    pub response: PendingResponse,
}

#[derive(Clone)]
pub struct RpcClient {
    /// Owner tag of this client's entries in the correlation manager
    client_id: String,
    broker: BrokerHandle,
    config: Arc<RpcConfig>,
    default_timeout: Duration,
    manager: Arc<CorrelationManager>,
    handlers: Arc<DashMap<String, RpcHandler>>,
    logger: Arc<dyn Logger>,
}

impl RpcClient {
    pub(crate) fn new(
        broker: BrokerHandle,
        config: RpcConfig,
        default_timeout: Duration,
        manager: Arc<CorrelationManager>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            client_id: Uuid::new_v4().to_string(),
            broker,
            config: Arc::new(config),
            default_timeout,
            manager,
            handlers: Arc::new(DashMap::new()),
            logger,
        }
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    pub fn correlation_manager(&self) -> &Arc<CorrelationManager> {
        &self.manager
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Reject this client's pending requests; other clients sharing the manager are untouched
    pub fn cleanup(&self) {
        self.manager.cleanup_owner(&self.client_id);
    }

    /// Publish a request and return its correlation id with the pending outcome
    pub async fn start_request<Req: Serialize + ?Sized>(
        &self,
        rpc_name: &str,
        payload: &Req,
        options: RequestOptions,
    ) -> Result<PendingRpc, RpcError> {
        let payload = serde_json::to_value(payload)?;
        let correlation_id = Uuid::new_v4().to_string();
        let timeout = options.timeout.unwrap_or(self.default_timeout);

        let request = RpcRequest {
            correlation_id: correlation_id.clone(),
            rpc_name: rpc_name.to_string(),
            payload,
            reply_to: self.config.reply_queue.clone(),
            headers: Some(RpcHeaders {
                service_name: self.config.service_name.clone(),
                instance_id: self.config.instance_id.clone(),
                rpc_name: rpc_name.to_string(),
            }),
        };
        let content = serde_json::to_value(&request)?;
        let overrides = PublishOverrides::new()
            .exchange(self.config.rpc_exchange.clone())
            .routing_key(rpc_routing_key(rpc_name))
            .mandatory(true)
            .persistent(false)
            .merged(&options.overrides);

        let response = self
            .manager
            .add_owned_request(&self.client_id, &correlation_id, timeout);

        if let Err(source) = self
            .broker
            .publish(REQUEST_PUBLICATION, content, overrides)
            .await
        {
            self.manager.remove_request(&correlation_id);
            self.logger.error(&format!(
                "Failed to publish RPC request {rpc_name}: {source}"
            ));
            return Err(RpcError::Publish {
                rpc_name: rpc_name.to_string(),
                source,
            });
        }

        Ok(PendingRpc {
            correlation_id,
            response,
        })
    }

    pub async fn request_with<Req, Resp>(
        &self,
        rpc_name: &str,
        payload: &Req,
        options: RequestOptions,
    ) -> Result<Resp, RpcError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let pending = self.start_request(rpc_name, payload, options).await?;
        let value = pending.response.await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Call `rpc_name` with the default timeout
    pub async fn request<Req, Resp>(&self, rpc_name: &str, payload: &Req) -> Result<Resp, RpcError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        self.request_with(rpc_name, payload, RequestOptions::default())
            .await
    }

    /// Register the handler for `rpc_name`; a later registration for the same name wins
    pub fn add_rpc_listener<Req, Resp, F, Fut>(&self, rpc_name: impl Into<String>, handler: F)
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Resp>> + Send + 'static,
    {
        let rpc_name = rpc_name.into();
        let handler = Arc::new(handler);
        let erased: RpcHandler = Arc::new(move |payload: Value| -> BoxFuture<'static, anyhow::Result<Value>> {
            let handler = handler.clone();
            Box::pin(async move {
                let request: Req = serde_json::from_value(payload)?;
                let response = handler(request).await?;
                Ok(serde_json::to_value(response)?)
            })
        });

        self.handlers.insert(rpc_name.clone(), erased);
        self.logger
            .info(&format!("[RpcBroker] Registered RPC handler: {rpc_name}"));
    }

    pub fn has_rpc_listener(&self, rpc_name: &str) -> bool {
        self.handlers.contains_key(rpc_name)
    }

    pub fn cancel_request(&self, correlation_id: &str) -> bool {
        self.manager.cancel_request(correlation_id)
    }

    fn handler(&self, rpc_name: &str) -> Option<RpcHandler> {
        self.handlers.get(rpc_name).map(|entry| entry.value().clone())
    }
}

/// Dispatches replies to the correlation manager
pub(crate) struct ReplyListener {
    pub(crate) manager: Arc<CorrelationManager>,
    pub(crate) logger: Arc<dyn Logger>,
}

#[async_trait]
impl SubscriptionListener for ReplyListener {
    async fn on_message(&self, delivery: Delivery) -> anyhow::Result<()> {
        let response: RpcResponse = match serde_json::from_value(delivery.content.clone()) {
            Ok(response) => response,
            Err(err) => {
                self.logger
                    .error(&format!("Error processing RPC response: {err}"));
                delivery.ack.nack(&err);
                return Ok(());
            }
        };

        let settled = match response.error {
            Some(body) => self.manager.reject_request(
                &response.correlation_id,
                RpcError::Remote {
                    code: body.code,
                    message: body.message,
                    details: body.details,
                },
            ),
            None => self.manager.resolve_request(
                &response.correlation_id,
                response.payload.unwrap_or(Value::Null),
            ),
        };
        if !settled {
            self.logger.debug(&format!(
                "No pending RPC request for correlation id {}",
                response.correlation_id
            ));
        }

        delivery.ack.ack();
        Ok(())
    }

    async fn on_error(&self, _subscription: &str, error: BrokerError) {
        self.logger
            .error(&format!("Reply subscription error: {error}"));
    }
}

/// Serves incoming requests with the registered handlers
pub(crate) struct InboundListener {
    client: RpcClient,
}

impl InboundListener {
    pub(crate) fn new(client: RpcClient) -> Self {
        Self { client }
    }

    async fn respond(&self, reply_to: &str, response: &RpcResponse) -> anyhow::Result<()> {
        self.client
            .broker
            .publish(
                REPLY_PUBLICATION,
                serde_json::to_value(response)?,
                PublishOverrides::new().routing_key(reply_to).mandatory(false),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionListener for InboundListener {
    async fn on_message(&self, delivery: Delivery) -> anyhow::Result<()> {
        let logger = &self.client.logger;
        let request: RpcRequest = serde_json::from_value(delivery.content.clone()).map_err(|err| {
            logger.error(&format!("Error processing RPC request: {err}"));
            err
        })?;

        let response = match self.client.handler(&request.rpc_name) {
            None => {
                logger.warn(&format!("No handler found for RPC method: {}", request.rpc_name));
                RpcResponse::failure(
                    &request.correlation_id,
                    RpcErrorCode::MethodNotFound.as_str(),
                    format!("RPC method '{}' not found", request.rpc_name),
                )
            }
            Some(handler) => match catch_panic(handler(request.payload.clone())).await {
                Ok(payload) => {
                    logger.debug(&format!(
                        "Publishing response for RPC method {} to {}",
                        request.rpc_name, request.reply_to
                    ));
                    RpcResponse::success(&request.correlation_id, payload)
                }
                Err(err) => {
                    logger.error(&format!(
                        "Publishing error response for RPC method {} to {}",
                        request.rpc_name, request.reply_to
                    ));
                    RpcResponse::failure(
                        &request.correlation_id,
                        RpcErrorCode::HandlerError.as_str(),
                        err.to_string(),
                    )
                }
            },
        };

        self.respond(&request.reply_to, &response).await?;
        delivery.ack.ack();
        Ok(())
    }

    async fn on_error(&self, _subscription: &str, error: BrokerError) {
        self.client
            .logger
            .error(&format!("Inbound subscription error: {error}"));
    }
}

/// Access to the RPC capability of a connection built with RPC support
pub trait RpcConnectionExt {
    fn rpc(&self) -> Result<Arc<RpcClient>, RpcError>;
}

impl RpcConnectionExt for Connection {
    fn rpc(&self) -> Result<Arc<RpcClient>, RpcError> {
        self.extension::<RpcClient>().ok_or(RpcError::NotInstalled)
    }
}
