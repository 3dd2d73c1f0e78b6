//! Publisher and subscriber sharing one broker

use super::{base_topology, ServiceLogger, VHOST};
use anyhow::{Context, Result};
use chrono::Utc;
use hoppity::topology::{
    BindingConfig, ExchangeConfig, ExchangeType, PublicationConfig, QueueConfig,
    SubscriptionConfig,
};
use hoppity::{with_custom_logger, Broker, Hoppity, InMemoryBroker, PublishOverrides, Topology};
use hoppity_subscriptions::{with_subscriptions, SubscriptionHandlers};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

const RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct PubsubArgs {
    pub count: u32,
    pub interval_ms: u64,
    pub publication: String,
    pub subscription: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Event {
    id: u32,
    text: String,
    timestamp: String,
}

fn default_topology() -> Topology {
    let mut topology = base_topology(None);
    if let Some(vhost) = topology.vhosts.get_mut(VHOST) {
        vhost
            .exchanges
            .insert("events".into(), ExchangeConfig::new(ExchangeType::Topic).durable(true));
        vhost
            .queues
            .insert("event_log".into(), QueueConfig::new().durable(true));
        vhost.bindings.insert(
            "event_log_binding".into(),
            BindingConfig::queue("events", "event_log", "event.#"),
        );
        vhost.publications.insert(
            "send_event".into(),
            PublicationConfig::exchange("events").routing_key("event.created"),
        );
        vhost.subscriptions.insert(
            "event_log_subscription".into(),
            SubscriptionConfig::queue("event_log"),
        );
    }
    topology
}

pub async fn execute(broker: InMemoryBroker, topology: Option<Topology>, args: PubsubArgs) -> Result<()> {
    let topology = topology.unwrap_or_else(default_topology);
    let (received_tx, mut received_rx) = mpsc::unbounded_channel::<Event>();

    let handlers = SubscriptionHandlers::new().on(
        args.subscription.clone(),
        move |_message, content, ack, _connection| {
            let received_tx = received_tx.clone();
            async move {
                let event: Event = serde_json::from_value(content)?;
                info!(id = event.id, text = %event.text, sent_at = %event.timestamp, "Subscriber received event");
                ack.ack();
                let _ = received_tx.send(event);
                anyhow::Ok(())
            }
        },
    );
    let subscriber = Hoppity::with_topology(broker.clone(), &topology)
        .use_middleware(with_custom_logger(Arc::new(ServiceLogger::new("subscriber"))))
        .use_middleware(with_subscriptions(handlers))
        .build()
        .await
        .context("Failed to start subscriber")?;

    let publisher = Hoppity::with_topology(broker.clone(), &topology)
        .use_middleware(with_custom_logger(Arc::new(ServiceLogger::new("publisher"))))
        .build()
        .await
        .context("Failed to start publisher")?;

    for id in 1..=args.count {
        let event = Event {
            id,
            text: format!("Hello from publisher (#{id})"),
            timestamp: Utc::now().to_rfc3339(),
        };
        match publisher
            .publish(&args.publication, serde_json::to_value(&event)?, PublishOverrides::new())
            .await
        {
            Ok(()) => info!(id, "Publisher sent event"),
            Err(err) => error!(id, error = %err, "Publisher failed to publish"),
        }
        tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
    }

    let mut received = 0;
    while received < args.count {
        match tokio::time::timeout(RECEIVE_TIMEOUT, received_rx.recv()).await {
            Ok(Some(_)) => received += 1,
            _ => break,
        }
    }
    info!(published = args.count, received, "Pub/sub demo finished");

    publisher.shutdown().await?;
    subscriber.shutdown().await?;
    Ok(())
}
