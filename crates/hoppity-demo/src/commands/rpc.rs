//! Initiator service calling a handler service

use super::{base_topology, ServiceLogger};
use anyhow::{Context, Result};
use chrono::Utc;
use hoppity::{with_custom_logger, Broker, Connection, Hoppity, InMemoryBroker, Topology};
use hoppity_rpc::{with_rpc_support, RequestOptions, RpcConnectionExt, RpcOptions};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const HANDLER_SERVICE: &str = "rpc_handler_svc";
const INITIATOR_SERVICE: &str = "rpc_initiator_svc";
const PROCESS_MESSAGE: &str = "rpc_handler_svc.process_message";

#[derive(Debug, Serialize, Deserialize)]
struct ProcessMessage {
    id: u32,
    service: String,
    message: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessedMessage {
    id: u32,
    processed_by: String,
    echo: String,
    handled_at: String,
}

async fn start_service(
    broker: &InMemoryBroker,
    topology: &Topology,
    service: &'static str,
    timeout: Duration,
) -> Result<Connection> {
    Hoppity::with_topology(broker.clone(), topology)
        .use_middleware(with_custom_logger(Arc::new(ServiceLogger::new(service))))
        .use_middleware(with_rpc_support(
            RpcOptions::new(service, "1").default_timeout(timeout),
        )?)
        .build()
        .await
        .with_context(|| format!("Failed to start {service}"))
}

pub async fn execute(
    broker: InMemoryBroker,
    topology: Option<Topology>,
    count: u32,
    timeout_ms: u64,
) -> Result<()> {
    let topology = base_topology(topology);
    let timeout = Duration::from_millis(timeout_ms);

    let handler_service = start_service(&broker, &topology, HANDLER_SERVICE, timeout).await?;
    let initiator_service = start_service(&broker, &topology, INITIATOR_SERVICE, timeout).await?;

    handler_service
        .rpc()?
        .add_rpc_listener(PROCESS_MESSAGE, |request: ProcessMessage| async move {
            info!(id = request.id, from = %request.service, "Handler processing message");
            Ok(ProcessedMessage {
                id: request.id,
                processed_by: HANDLER_SERVICE.to_string(),
                echo: request.message,
                handled_at: Utc::now().to_rfc3339(),
            })
        });

    let rpc = initiator_service.rpc()?;
    for id in 1..=count {
        let request = ProcessMessage {
            id,
            service: "RPC Initiator".to_string(),
            message: format!("Hello from RPC Initiator at {}", Utc::now().to_rfc3339()),
        };
        match rpc.request::<_, ProcessedMessage>(PROCESS_MESSAGE, &request).await {
            Ok(response) => info!(
                id = response.id,
                processed_by = %response.processed_by,
                handled_at = %response.handled_at,
                "RPC response received"
            ),
            Err(err) => error!(id, error = %err, "RPC call failed"),
        }
    }

    let missing = rpc
        .request_with::<_, Value>(
            "rpc_handler_svc.unknown_method",
            &Value::Null,
            RequestOptions::default().timeout(timeout),
        )
        .await;
    if let Err(err) = missing {
        info!(code = err.code().unwrap_or("none"), error = %err, "Unknown method rejected as expected");
    }

    initiator_service.shutdown().await?;
    handler_service.shutdown().await?;
    info!("RPC demo finished");
    Ok(())
}
