//! Request/reply between two services sharing one in-memory broker

use hoppity::topology::VhostConfig;
use hoppity::{Broker, Connection, Hoppity, InMemoryBroker, SilentLogger, Topology};
use hoppity_rpc::{
    with_rpc_support, CorrelationManager, RequestOptions, RpcClient, RpcConnectionExt, RpcError,
    RpcOptions,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize)]
struct AddRequest {
    a: i64,
    b: i64,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct AddResponse {
    sum: i64,
}

fn topology() -> Topology {
    Topology::new().with_vhost("/", VhostConfig::default())
}

async fn service(broker: &InMemoryBroker, name: &str) -> (Connection, Arc<RpcClient>) {
    let options = RpcOptions::new(name, "1").correlation_manager(CorrelationManager::new());
    let connection = Hoppity::with_topology(broker.clone(), &topology())
        .with_logger(Arc::new(SilentLogger))
        .use_middleware(with_rpc_support(options).unwrap())
        .build()
        .await
        .unwrap();
    let rpc = connection.rpc().unwrap();
    (connection, rpc)
}

async fn calculator_and_gateway() -> (InMemoryBroker, Arc<RpcClient>, Arc<RpcClient>, Connection) {
    let broker = InMemoryBroker::new();
    let (_calculator_connection, calculator) = service(&broker, "calculator").await;
    let (gateway_connection, gateway) = service(&broker, "gateway").await;

    calculator.add_rpc_listener("calculator.add", |req: AddRequest| async move {
        Ok(AddResponse { sum: req.a + req.b })
    });

    (broker, calculator, gateway, gateway_connection)
}

#[tokio::test]
async fn request_resolves_with_handler_result() {
    let (_broker, _calculator, gateway, _connection) = calculator_and_gateway().await;

    let response: AddResponse = gateway
        .request("calculator.add", &AddRequest { a: 2, b: 3 })
        .await
        .unwrap();

    assert_eq!(response, AddResponse { sum: 5 });
    assert_eq!(gateway.correlation_manager().pending_count(), 0);
}

#[tokio::test]
async fn request_carries_wire_headers_and_options() {
    let (broker, _calculator, gateway, _connection) = calculator_and_gateway().await;

    let _: AddResponse = gateway
        .request("calculator.add", &AddRequest { a: 1, b: 1 })
        .await
        .unwrap();

    let published = broker.published_to("rpc_request");
    let record = &published[0];
    assert_eq!(record.exchange, "rpc_requests");
    assert_eq!(record.routing_key, "rpc.calculator.add.request");
    assert_eq!(record.options.mandatory, Some(true));
    assert_eq!(record.options.persistent, Some(false));
    assert_eq!(record.content["replyTo"], json!("rpc_gateway_1_reply"));
    assert_eq!(record.content["headers"]["service-name"], json!("gateway"));
    assert_eq!(record.content["headers"]["rpc_name"], json!("calculator.add"));

    let replies = broker.published_to("rpc_reply");
    assert_eq!(replies[0].routing_key, "rpc_gateway_1_reply");
    assert_eq!(replies[0].content["payload"], json!({"sum": 2}));
}

#[tokio::test]
async fn unknown_method_is_reported_as_not_found() {
    let (broker, _calculator, gateway, _connection) = calculator_and_gateway().await;

    let err = gateway
        .request::<_, Value>("calculator.multiply", &json!({}))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("not found"));
    assert_eq!(err.code(), Some("RPC_METHOD_NOT_FOUND"));
    assert!(broker
        .acknowledgements_for("rpc_calculator_1_inbound_subscription")
        .iter()
        .all(|record| record.settlement.is_ack()));
}

#[tokio::test]
async fn handler_failures_become_error_responses() {
    let (_broker, calculator, gateway, _connection) = calculator_and_gateway().await;
    calculator.add_rpc_listener("calculator.divide", |req: AddRequest| async move {
        if req.b == 0 {
            anyhow::bail!("division by zero");
        }
        Ok(req.a / req.b)
    });
    calculator.add_rpc_listener("calculator.crash", |payload: Value| async move {
        if payload.is_null() {
            std::panic::panic_any(7u32);
        }
        Ok(payload)
    });

    let err = gateway
        .request::<_, i64>("calculator.divide", &AddRequest { a: 1, b: 0 })
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "division by zero");
    assert_eq!(err.code(), Some("RPC_HANDLER_ERROR"));

    let err = gateway
        .request::<_, Value>("calculator.crash", &json!(null))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Unknown error");

    let ok: i64 = gateway
        .request("calculator.divide", &AddRequest { a: 9, b: 3 })
        .await
        .unwrap();
    assert_eq!(ok, 3);
}

#[tokio::test]
async fn last_registration_wins() {
    let (_broker, calculator, gateway, _connection) = calculator_and_gateway().await;
    calculator.add_rpc_listener("calculator.add", |_: AddRequest| async move {
        Ok(AddResponse { sum: -1 })
    });

    let response: AddResponse = gateway
        .request("calculator.add", &AddRequest { a: 2, b: 3 })
        .await
        .unwrap();
    assert_eq!(response.sum, -1);
}

#[tokio::test]
async fn concurrent_requests_resolve_independently() {
    let (_broker, _calculator, gateway, _connection) = calculator_and_gateway().await;

    let (first, second, third) = tokio::join!(
        gateway.request::<_, AddResponse>("calculator.add", &AddRequest { a: 1, b: 1 }),
        gateway.request::<_, AddResponse>("calculator.add", &AddRequest { a: 2, b: 2 }),
        gateway.request::<_, AddResponse>("calculator.add", &AddRequest { a: 3, b: 3 }),
    );

    assert_eq!(first.unwrap().sum, 2);
    assert_eq!(second.unwrap().sum, 4);
    assert_eq!(third.unwrap().sum, 6);
}

#[tokio::test]
async fn unroutable_request_fails_without_leaving_pending_entry() {
    let (_broker, _calculator, gateway, _connection) = calculator_and_gateway().await;

    let err = gateway
        .request::<_, Value>("inventory.count", &json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, RpcError::Publish { .. }));
    assert_eq!(gateway.correlation_manager().pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_handler_times_out_and_late_reply_is_ignored() {
    let (broker, calculator, gateway, _connection) = calculator_and_gateway().await;
    calculator.add_rpc_listener("calculator.slow", |_: Value| async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(json!("late"))
    });

    let err = gateway
        .request_with::<_, Value>(
            "calculator.slow",
            &json!({}),
            RequestOptions::default().timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Timeout { timeout_ms: 100 }));

    tokio::time::sleep(Duration::from_secs(11)).await;
    let replies = broker.acknowledgements_for("rpc_gateway_1_reply_subscription");
    assert_eq!(replies.len(), 1);
    assert!(replies[0].settlement.is_ack());
}

#[tokio::test(start_paused = true)]
async fn cancel_and_shutdown_settle_pending_requests() {
    let (_broker, calculator, gateway, connection) = calculator_and_gateway().await;
    calculator.add_rpc_listener("calculator.slow", |_: Value| async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(json!("late"))
    });

    let cancelled = gateway
        .start_request("calculator.slow", &json!({}), RequestOptions::default())
        .await
        .unwrap();
    assert!(gateway.cancel_request(&cancelled.correlation_id));
    assert!(!gateway.cancel_request(&cancelled.correlation_id));
    assert!(matches!(cancelled.response.await, Err(RpcError::Cancelled)));

    let abandoned = gateway
        .start_request("calculator.slow", &json!({}), RequestOptions::default())
        .await
        .unwrap();
    connection.shutdown().await.unwrap();
    assert!(matches!(abandoned.response.await, Err(RpcError::Cleanup)));
}

#[tokio::test(start_paused = true)]
async fn shutting_down_one_connection_keeps_other_requests_pending() {
    let broker = InMemoryBroker::new();
    let connect = |name: &'static str| {
        let broker = broker.clone();
        async move {
            Hoppity::with_topology(broker, &topology())
                .with_logger(Arc::new(SilentLogger))
                .use_middleware(with_rpc_support(RpcOptions::new(name, "1")).unwrap())
                .build()
                .await
                .unwrap()
        }
    };
    let gateway = connect("gateway").await;
    let worker = connect("worker").await;
    worker
        .rpc()
        .unwrap()
        .add_rpc_listener("worker.slow", |_: Value| async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(json!("done"))
        });

    let pending = gateway
        .rpc()
        .unwrap()
        .start_request("worker.slow", &json!({}), RequestOptions::default())
        .await
        .unwrap();

    let bystander = connect("bystander").await;
    assert!(Arc::ptr_eq(
        bystander.rpc().unwrap().correlation_manager(),
        gateway.rpc().unwrap().correlation_manager()
    ));
    bystander.shutdown().await.unwrap();

    assert_eq!(pending.response.await.unwrap(), json!("done"));
}

#[tokio::test]
async fn connection_without_rpc_support_has_no_client() {
    let connection = Hoppity::with_topology(InMemoryBroker::new(), &topology())
        .build()
        .await
        .unwrap();

    assert!(matches!(connection.rpc(), Err(RpcError::NotInstalled)));
}
