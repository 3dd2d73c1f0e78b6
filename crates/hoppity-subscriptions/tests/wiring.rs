//! Handler wiring over the in-memory broker

use hoppity::topology::{PublicationConfig, QueueConfig, SubscriptionConfig, VhostConfig};
use hoppity::{
    from_fn, Broker, BrokerError, BuildError, Hoppity, InMemoryBroker, MiddlewareContext,
    MiddlewareOutput, PublishOverrides, Settlement, SilentLogger, Topology,
};
use hoppity_subscriptions::{with_subscriptions, SubscriptionHandlers, ValidatedSubscriptions};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn topology() -> Topology {
    Topology::new().with_vhost(
        "/",
        VhostConfig::default()
            .with_queue("orders", QueueConfig::new())
            .with_queue("audit", QueueConfig::new())
            .with_publication("orders", PublicationConfig::queue("orders"))
            .with_publication("audit", PublicationConfig::queue("audit"))
            .with_subscription("orders_subscription", SubscriptionConfig::queue("orders")),
    )
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn handler_gets_content_ack_and_connection() {
    let broker = InMemoryBroker::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();

    let handlers = SubscriptionHandlers::new().on(
        "orders_subscription",
        move |message, content, ack, connection| {
            let tx = tx.clone();
            async move {
                assert_eq!(message.queue, "orders");
                connection
                    .publish("audit", json!({"seen": content.clone()}), PublishOverrides::new())
                    .await?;
                let _ = tx.send(content);
                ack.ack();
                anyhow::Ok(())
            }
        },
    );
    let connection = Hoppity::with_topology(broker.clone(), &topology())
        .with_logger(Arc::new(SilentLogger))
        .use_middleware(with_subscriptions(handlers))
        .build()
        .await
        .unwrap();

    connection
        .publish("orders", json!({"id": 1}), PublishOverrides::new())
        .await
        .unwrap();

    assert_eq!(rx.recv().await, Some(json!({"id": 1})));
    settle().await;
    assert_eq!(broker.drain_queue("audit"), vec![json!({"seen": {"id": 1}})]);
    let acks = broker.acknowledgements_for("orders_subscription");
    assert_eq!(acks.len(), 1);
    assert!(acks[0].settlement.is_ack());
}

#[tokio::test]
async fn unknown_handler_aborts_build_before_connecting() {
    let broker = InMemoryBroker::new();
    let handlers = SubscriptionHandlers::new()
        .on("orders_subscription", |_, _, _, _| async { anyhow::Ok(()) })
        .on("refunds_subscription", |_, _, _, _| async { anyhow::Ok(()) });

    let err = Hoppity::with_topology(broker.clone(), &topology())
        .with_logger(Arc::new(SilentLogger))
        .use_middleware(with_subscriptions(handlers))
        .build()
        .await
        .unwrap_err();

    assert!(matches!(err, BuildError::Middleware { position: 1, ref name, .. } if name == "subscriptions"));
    assert_eq!(
        err.to_string(),
        "Middleware 1 (subscriptions) failed: Subscription validation failed: \
         Missing subscriptions: refunds_subscription. Available subscriptions: orders_subscription"
    );
    assert_eq!(broker.connection_count(), 0);
}

#[tokio::test]
async fn validation_sees_subscriptions_added_by_earlier_middleware() {
    let broker = InMemoryBroker::new();
    let add_audit = from_fn(|topology: &Topology, _: &mut MiddlewareContext| {
        let mut next = topology.clone();
        if let Some(vhost) = next.vhosts.get_mut("/") {
            vhost
                .subscriptions
                .insert("audit_subscription".into(), SubscriptionConfig::queue("audit"));
        }
        Ok(MiddlewareOutput::new(next))
    });
    let check_context = from_fn(|topology: &Topology, context: &mut MiddlewareContext| {
        let validated = context.store.get::<ValidatedSubscriptions>();
        assert_eq!(
            validated,
            Some(&ValidatedSubscriptions(vec!["audit_subscription".to_string()]))
        );
        Ok(MiddlewareOutput::new(topology.clone()))
    });

    let connection = Hoppity::with_topology(broker.clone(), &topology())
        .with_logger(Arc::new(SilentLogger))
        .use_middleware(add_audit)
        .use_middleware(with_subscriptions(SubscriptionHandlers::new().on(
            "audit_subscription",
            |_, _, ack, _| async move {
                ack.ack();
                Ok(())
            },
        )))
        .use_middleware(check_context)
        .build()
        .await
        .unwrap();

    connection
        .publish("audit", json!("entry"), PublishOverrides::new())
        .await
        .unwrap();
    settle().await;
    assert_eq!(broker.acknowledgements_for("audit_subscription").len(), 1);
}

#[tokio::test]
async fn failing_handlers_nack_and_the_subscription_keeps_running() {
    let broker = InMemoryBroker::new();
    let handlers = SubscriptionHandlers::new().on(
        "orders_subscription",
        |_, content: Value, ack, _| async move {
            match content.as_str() {
                Some("panic") => panic!("boom"),
                Some("fail") => anyhow::bail!("cannot process order"),
                Some("ack-then-fail") => {
                    ack.ack();
                    anyhow::bail!("too late")
                }
                _ => {
                    ack.ack();
                    Ok(())
                }
            }
        },
    );
    let connection = Hoppity::with_topology(broker.clone(), &topology())
        .with_logger(Arc::new(SilentLogger))
        .use_middleware(with_subscriptions(handlers))
        .build()
        .await
        .unwrap();

    for content in ["panic", "fail", "ack-then-fail", "ok"] {
        connection
            .publish("orders", json!(content), PublishOverrides::new())
            .await
            .unwrap();
    }
    settle().await;

    let settlements: Vec<(Value, Settlement)> = broker
        .acknowledgements_for("orders_subscription")
        .into_iter()
        .map(|record| (record.content, record.settlement))
        .collect();
    assert_eq!(
        settlements,
        vec![
            (json!("panic"), Settlement::Nack { reason: "boom".into() }),
            (
                json!("fail"),
                Settlement::Nack {
                    reason: "cannot process order".into()
                }
            ),
            (json!("ack-then-fail"), Settlement::Ack),
            (json!("ok"), Settlement::Ack),
        ]
    );
}

#[tokio::test]
async fn error_events_are_swallowed() {
    let broker = InMemoryBroker::new();
    let handlers = SubscriptionHandlers::new().on(
        "orders_subscription",
        |_, _, ack, _| async move {
            ack.ack();
            Ok(())
        },
    );
    let connection = Hoppity::with_topology(broker.clone(), &topology())
        .with_logger(Arc::new(SilentLogger))
        .use_middleware(with_subscriptions(handlers))
        .build()
        .await
        .unwrap();

    broker.inject_error(
        "orders_subscription",
        BrokerError::Subscription("channel closed".into()),
    );
    broker.inject_invalid_content("orders_subscription", "not json");
    connection
        .publish("orders", json!(1), PublishOverrides::new())
        .await
        .unwrap();
    settle().await;

    assert_eq!(broker.acknowledgements_for("orders_subscription").len(), 1);
}
