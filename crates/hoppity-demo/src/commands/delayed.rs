//! Scheduler service publishing delayed messages to a processor service

use super::{base_topology, ServiceLogger, VHOST};
use anyhow::{Context, Result};
use chrono::Utc;
use hoppity::topology::{PublicationConfig, QueueConfig, SubscriptionConfig};
use hoppity::{with_custom_logger, Broker, Hoppity, InMemoryBroker, Topology};
use hoppity_delayed_publish::{
    with_delayed_publish, DelayedPublishConnectionExt, DelayedPublishOptions,
};
use hoppity_subscriptions::{with_subscriptions, SubscriptionHandlers};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

const INBOX: &str = "processor_inbox";
const INBOX_SUBSCRIPTION: &str = "processor_inbox_subscription";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduledMessage {
    id: u32,
    message: String,
    /// Epoch milliseconds
    scheduled_at: i64,
    requested_delay: u64,
}

fn with_inbox(topology: Topology) -> Topology {
    let mut topology = topology;
    if let Some(vhost) = topology.vhosts.get_mut(VHOST) {
        vhost.queues.entry(INBOX.into()).or_insert_with(QueueConfig::new);
        vhost
            .publications
            .entry(INBOX.into())
            .or_insert_with(|| PublicationConfig::queue(INBOX));
        vhost
            .subscriptions
            .entry(INBOX_SUBSCRIPTION.into())
            .or_insert_with(|| SubscriptionConfig::queue(INBOX));
    }
    topology
}

pub async fn execute(
    broker: InMemoryBroker,
    topology: Option<Topology>,
    count: u32,
    delay_ms: u64,
) -> Result<()> {
    let topology = with_inbox(base_topology(topology));
    let delay = Duration::from_millis(delay_ms);
    let (received_tx, mut received_rx) = mpsc::unbounded_channel::<ScheduledMessage>();

    let handlers = SubscriptionHandlers::new().on(
        INBOX_SUBSCRIPTION,
        move |_message, content, ack, _connection| {
            let received_tx = received_tx.clone();
            async move {
                let message: ScheduledMessage = serde_json::from_value(content)?;
                let waited = Utc::now().timestamp_millis() - message.scheduled_at;
                info!(
                    id = message.id,
                    requested_delay_ms = message.requested_delay,
                    waited_ms = waited,
                    "Processor received delayed message"
                );
                ack.ack();
                let _ = received_tx.send(message);
                anyhow::Ok(())
            }
        },
    );
    let processor = Hoppity::with_topology(broker.clone(), &topology)
        .use_middleware(with_custom_logger(Arc::new(ServiceLogger::new(
            "delayed_processor_svc",
        ))))
        .use_middleware(with_subscriptions(handlers))
        .build()
        .await
        .context("Failed to start processor service")?;

    let scheduler = Hoppity::with_topology(broker.clone(), &topology)
        .use_middleware(with_custom_logger(Arc::new(ServiceLogger::new(
            "delayed_scheduler_svc",
        ))))
        .use_middleware(with_delayed_publish(
            DelayedPublishOptions::new("delayed_scheduler_svc").default_delay(delay),
        )?)
        .build()
        .await
        .context("Failed to start scheduler service")?;

    let publisher = scheduler.delayed_publisher()?;
    for id in 1..=count {
        let message = ScheduledMessage {
            id,
            message: format!("Delayed message #{id} from Delayed Scheduler"),
            scheduled_at: Utc::now().timestamp_millis(),
            requested_delay: delay_ms,
        };
        publisher.delayed_publish(INBOX, &message, None, None).await?;
        info!(id, delay_ms, "Scheduled delayed message");
    }

    let deadline = delay + Duration::from_secs(5);
    let mut received = 0;
    while received < count {
        match tokio::time::timeout(deadline, received_rx.recv()).await {
            Ok(Some(_)) => received += 1,
            _ => break,
        }
    }
    info!(scheduled = count, received, "Delayed publish demo finished");

    scheduler.shutdown().await?;
    processor.shutdown().await?;
    Ok(())
}
