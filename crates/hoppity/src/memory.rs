//! In-memory reference broker
//!
//! `InMemoryBroker` implements [`BrokerProvider`] without any network. It is the test
//! double for everything above the broker boundary and the transport behind the demo
//! applications, so it models the parts of broker behavior hoppity relies on:
//!
//! - direct, topic and fanout exchanges, exchange-to-exchange bindings and the default
//!   exchange (`""`, routing key = queue name)
//! - per-message expiration and `x-message-ttl`, with dead-lettering through
//!   `x-dead-letter-exchange` / `x-dead-letter-routing-key`
//! - nack as reject-without-requeue (dead-lettered when the queue has a target)
//! - `mandatory` publishing: a message that routes nowhere is an error
//! - exclusive queues owned by one connection, auto-delete queues removed on shutdown
//!
//! Headers exchanges route like fanout. Consumers of one queue are served round-robin;
//! messages published while a queue has no consumer wait in the queue.
//!
//! Several connections can share one broker by cloning it. Failure injection and
//! recorded publishes/acknowledgements are available for assertions.

use crate::broker::{
    AckHandler, AckOrNack, Broker, BrokerHandle, BrokerProvider, Delivery, MessageEnvelope,
    Settlement, Subscription, SubscriptionEvent,
};
use crate::error::BrokerError;
use crate::topology::{
    DestinationType, ExchangeType, PublicationConfig, PublishOptions, PublishOverrides,
    QueueOptions, SubscriptionConfig, Topology, VhostConfig, DEFAULT_EXCHANGE,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

const MESSAGE_TTL: &str = "x-message-ttl";

/// How an injected publish failure behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishFailure {
    Always,
    /// Fail the next `n` publishes, then succeed
    Times(usize),
}

/// One publish attempt, successful or not
#[derive(Debug, Clone)]
pub struct PublishedRecord {
    pub publication: String,
    pub exchange: String,
    pub routing_key: String,
    pub content: Value,
    pub options: PublishOptions,
    pub succeeded: bool,
    pub at: Instant,
}

/// One settled delivery
#[derive(Debug, Clone)]
pub struct AckRecord {
    pub subscription: String,
    pub queue: String,
    pub message_id: String,
    pub content: Value,
    pub settlement: Settlement,
}

#[derive(Clone)]
struct StoredMessage {
    envelope: MessageEnvelope,
    content: Value,
    expiration: Option<u64>,
}

struct Consumer {
    connection_id: u64,
    subscription: String,
    tx: mpsc::UnboundedSender<SubscriptionEvent>,
}

struct QueueState {
    options: QueueOptions,
    owner: Option<u64>,
    messages: VecDeque<StoredMessage>,
    consumers: Vec<Consumer>,
    next_consumer: usize,
    had_consumers: bool,
}

impl QueueState {
    fn new(options: QueueOptions, owner: Option<u64>) -> Self {
        Self {
            options,
            owner,
            messages: VecDeque::new(),
            consumers: Vec::new(),
            next_consumer: 0,
            had_consumers: false,
        }
    }

    fn message_ttl(&self) -> Option<u64> {
        self.options.arguments.get(MESSAGE_TTL).and_then(Value::as_u64)
    }
}

#[derive(Clone, PartialEq)]
struct BindingState {
    source: String,
    destination: String,
    destination_type: DestinationType,
    binding_key: String,
}

#[derive(Default)]
struct VhostState {
    exchanges: HashMap<String, ExchangeType>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<BindingState>,
}

impl VhostState {
    fn has_exchange(&self, name: &str, declared: &VhostConfig) -> bool {
        name == DEFAULT_EXCHANGE
            || self.exchanges.contains_key(name)
            || declared.exchanges.contains_key(name)
    }

    fn has_queue(&self, name: &str, declared: &VhostConfig) -> bool {
        self.queues.contains_key(name) || declared.queues.contains_key(name)
    }

    /// Queues a message published to `exchange` with `routing_key` lands in
    fn route(&self, exchange: &str, routing_key: &str) -> Vec<String> {
        let mut queues = Vec::new();
        let mut visited = HashSet::new();
        self.route_into(exchange, routing_key, &mut visited, &mut queues);
        queues
    }

    fn route_into(
        &self,
        exchange: &str,
        routing_key: &str,
        visited: &mut HashSet<String>,
        queues: &mut Vec<String>,
    ) {
        if exchange == DEFAULT_EXCHANGE {
            if self.queues.contains_key(routing_key) && !queues.iter().any(|q| q == routing_key) {
                queues.push(routing_key.to_string());
            }
            return;
        }
        if !visited.insert(exchange.to_string()) {
            return;
        }
        let Some(exchange_type) = self.exchanges.get(exchange) else {
            return;
        };

        for binding in self.bindings.iter().filter(|b| b.source == exchange) {
            let matched = match exchange_type {
                ExchangeType::Direct => binding.binding_key == routing_key,
                ExchangeType::Topic => topic_matches(&binding.binding_key, routing_key),
                ExchangeType::Fanout | ExchangeType::Headers => true,
            };
            if !matched {
                continue;
            }
            match binding.destination_type {
                DestinationType::Queue => {
                    if self.queues.contains_key(&binding.destination)
                        && !queues.contains(&binding.destination)
                    {
                        queues.push(binding.destination.clone());
                    }
                }
                DestinationType::Exchange => {
                    self.route_into(&binding.destination, routing_key, visited, queues)
                }
            }
        }
    }
}

#[derive(Default)]
struct ServerState {
    vhosts: HashMap<String, VhostState>,
    failures: HashMap<String, PublishFailure>,
    refuse_connections: Option<String>,
    fail_shutdowns: Option<String>,
    published: Vec<PublishedRecord>,
    acknowledgements: Vec<AckRecord>,
    next_connection_id: u64,
    connections: usize,
    shutdowns: usize,
}

impl ServerState {
    fn take_failure(&mut self, publication: &str) -> Option<String> {
        match self.failures.get(publication).copied()? {
            PublishFailure::Always => Some("injected publish failure".to_string()),
            PublishFailure::Times(0) => {
                self.failures.remove(publication);
                None
            }
            PublishFailure::Times(remaining) => {
                self.failures
                    .insert(publication.to_string(), PublishFailure::Times(remaining - 1));
                Some("injected publish failure".to_string())
            }
        }
    }

    fn validate_vhost(
        &self,
        connection_id: u64,
        name: &str,
        declared: &VhostConfig,
    ) -> Result<(), BrokerError> {
        let empty = VhostState::default();
        let existing = self.vhosts.get(name).unwrap_or(&empty);

        for (exchange, config) in &declared.exchanges {
            if exchange.is_empty() {
                return Err(BrokerError::Connection(
                    "The default exchange cannot be redeclared".to_string(),
                ));
            }
            if let Some(current) = existing.exchanges.get(exchange) {
                if *current != config.exchange_type {
                    return Err(BrokerError::Connection(format!(
                        "Exchange '{exchange}' already exists with type {current:?}"
                    )));
                }
            }
        }

        for queue in declared.queues.keys() {
            if let Some(QueueState {
                owner: Some(owner), ..
            }) = existing.queues.get(queue)
            {
                if *owner != connection_id {
                    return Err(BrokerError::Connection(format!(
                        "Exclusive queue '{queue}' is locked by another connection"
                    )));
                }
            }
        }

        for (binding_name, binding) in &declared.bindings {
            if binding.source.is_empty() || !existing.has_exchange(&binding.source, declared) {
                return Err(BrokerError::Connection(format!(
                    "Binding '{binding_name}' refers to unknown exchange '{}'",
                    binding.source
                )));
            }
            let known = match binding.destination_type {
                DestinationType::Queue => existing.has_queue(&binding.destination, declared),
                DestinationType::Exchange => existing.has_exchange(&binding.destination, declared),
            };
            if !known {
                return Err(BrokerError::Connection(format!(
                    "Binding '{binding_name}' refers to unknown destination '{}'",
                    binding.destination
                )));
            }
        }

        for (publication, config) in &declared.publications {
            match (&config.exchange, &config.queue) {
                (Some(exchange), _) if !existing.has_exchange(exchange, declared) => {
                    return Err(BrokerError::Connection(format!(
                        "Publication '{publication}' refers to unknown exchange '{exchange}'"
                    )));
                }
                (None, Some(queue)) if !existing.has_queue(queue, declared) => {
                    return Err(BrokerError::Connection(format!(
                        "Publication '{publication}' refers to unknown queue '{queue}'"
                    )));
                }
                (None, None) => {
                    return Err(BrokerError::Connection(format!(
                        "Publication '{publication}' must name an exchange or a queue"
                    )));
                }
                _ => {}
            }
        }

        for (subscription, config) in &declared.subscriptions {
            if !existing.has_queue(&config.queue, declared) {
                return Err(BrokerError::Connection(format!(
                    "Subscription '{subscription}' refers to unknown queue '{}'",
                    config.queue
                )));
            }
        }

        Ok(())
    }

    fn declare_vhost(&mut self, connection_id: u64, name: &str, declared: &VhostConfig) {
        let vhost = self.vhosts.entry(name.to_string()).or_default();

        for (exchange, config) in &declared.exchanges {
            vhost
                .exchanges
                .entry(exchange.clone())
                .or_insert(config.exchange_type);
        }

        for (queue, config) in &declared.queues {
            vhost.queues.entry(queue.clone()).or_insert_with(|| {
                let owner = config
                    .options
                    .exclusive
                    .unwrap_or(false)
                    .then_some(connection_id);
                QueueState::new(config.options.clone(), owner)
            });
        }

        for binding in declared.bindings.values() {
            let state = BindingState {
                source: binding.source.clone(),
                destination: binding.destination.clone(),
                destination_type: binding.destination_type,
                binding_key: binding.binding_key.clone().unwrap_or_default(),
            };
            if !vhost.bindings.contains(&state) {
                vhost.bindings.push(state);
            }
        }
    }
}

/// Offer `message` to the queue's consumers. Gives it back if nobody took it.
fn dispatch(
    shared: &Arc<Mutex<ServerState>>,
    vhost: &str,
    queue_name: &str,
    queue: &mut QueueState,
    message: StoredMessage,
) -> Option<StoredMessage> {
    while !queue.consumers.is_empty() {
        let index = queue.next_consumer % queue.consumers.len();
        let consumer = &queue.consumers[index];
        let ack = AckOrNack::new(MemoryAck {
            state: Arc::downgrade(shared),
            vhost: vhost.to_string(),
            queue: queue_name.to_string(),
            subscription: consumer.subscription.clone(),
            message: message.clone(),
        });
        let delivery = Delivery {
            message: message.envelope.clone(),
            content: message.content.clone(),
            ack,
        };

        if consumer.tx.send(SubscriptionEvent::Message(delivery)).is_ok() {
            trace!(queue = %queue_name, subscription = %consumer.subscription, "Delivered message");
            queue.next_consumer = index + 1;
            return None;
        }
        queue.consumers.remove(index);
    }
    Some(message)
}

fn enqueue(
    shared: &Arc<Mutex<ServerState>>,
    state: &mut ServerState,
    vhost: &str,
    queue_name: &str,
    mut message: StoredMessage,
) {
    let Some(queue) = state
        .vhosts
        .get_mut(vhost)
        .and_then(|v| v.queues.get_mut(queue_name))
    else {
        return;
    };
    message.envelope.queue = queue_name.to_string();

    let Some(message) = dispatch(shared, vhost, queue_name, queue, message) else {
        return;
    };

    let ttl = match (message.expiration, queue.message_ttl()) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    let message_id = message.envelope.message_id.clone();
    queue.messages.push_back(message);

    if let Some(ttl) = ttl {
        let shared = shared.clone();
        let vhost = vhost.to_string();
        let queue_name = queue_name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ttl)).await;
            let mut state = shared.lock();
            expire(&shared, &mut state, &vhost, &queue_name, &message_id);
        });
    }
}

fn expire(
    shared: &Arc<Mutex<ServerState>>,
    state: &mut ServerState,
    vhost: &str,
    queue_name: &str,
    message_id: &str,
) {
    let Some(queue) = state
        .vhosts
        .get_mut(vhost)
        .and_then(|v| v.queues.get_mut(queue_name))
    else {
        return;
    };
    let Some(position) = queue
        .messages
        .iter()
        .position(|m| m.envelope.message_id == message_id)
    else {
        return;
    };
    if let Some(message) = queue.messages.remove(position) {
        trace!(queue = %queue_name, message_id = %message_id, "Message expired");
        dead_letter(shared, state, vhost, queue_name, message, "expired");
    }
}

fn dead_letter(
    shared: &Arc<Mutex<ServerState>>,
    state: &mut ServerState,
    vhost: &str,
    queue_name: &str,
    mut message: StoredMessage,
    reason: &str,
) {
    let Some(vhost_state) = state.vhosts.get(vhost) else {
        return;
    };
    let Some((exchange, routing_key)) = vhost_state
        .queues
        .get(queue_name)
        .and_then(|q| q.options.dead_letter_target())
    else {
        debug!(queue = %queue_name, reason, "Dropping message without dead-letter target");
        return;
    };

    let routing_key = routing_key.unwrap_or_else(|| message.envelope.routing_key.clone());
    let targets = vhost_state.route(&exchange, &routing_key);

    message.expiration = None;
    message.envelope.exchange = exchange;
    message.envelope.routing_key = routing_key;
    message
        .envelope
        .headers
        .insert("x-first-death-queue".to_string(), Value::from(queue_name));
    message
        .envelope
        .headers
        .insert("x-first-death-reason".to_string(), Value::from(reason));

    for target in targets {
        enqueue(shared, state, vhost, &target, message.clone());
    }
}

struct MemoryAck {
    state: Weak<Mutex<ServerState>>,
    vhost: String,
    queue: String,
    subscription: String,
    message: StoredMessage,
}

impl AckHandler for MemoryAck {
    fn settle(&self, settlement: &Settlement) {
        let Some(shared) = self.state.upgrade() else {
            return;
        };
        let mut state = shared.lock();
        state.acknowledgements.push(AckRecord {
            subscription: self.subscription.clone(),
            queue: self.queue.clone(),
            message_id: self.message.envelope.message_id.clone(),
            content: self.message.content.clone(),
            settlement: settlement.clone(),
        });
        if !settlement.is_ack() {
            dead_letter(
                &shared,
                &mut state,
                &self.vhost,
                &self.queue,
                self.message.clone(),
                "rejected",
            );
        }
    }
}

/// Shared in-process broker
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<ServerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make publishes through `publication` fail
    pub fn fail_publication(&self, publication: impl Into<String>, failure: PublishFailure) {
        self.state.lock().failures.insert(publication.into(), failure);
    }

    pub fn clear_publication_failure(&self, publication: &str) {
        self.state.lock().failures.remove(publication);
    }

    /// Make `connect` fail with `reason` until [`accept_connections`](Self::accept_connections)
    pub fn refuse_connections(&self, reason: impl Into<String>) {
        self.state.lock().refuse_connections = Some(reason.into());
    }

    pub fn accept_connections(&self) {
        self.state.lock().refuse_connections = None;
    }

    /// Make every connection's `shutdown` fail with `reason`
    pub fn fail_shutdowns(&self, reason: impl Into<String>) {
        self.state.lock().fail_shutdowns = Some(reason.into());
    }

    pub fn published(&self) -> Vec<PublishedRecord> {
        self.state.lock().published.clone()
    }

    pub fn published_to(&self, publication: &str) -> Vec<PublishedRecord> {
        self.state
            .lock()
            .published
            .iter()
            .filter(|record| record.publication == publication)
            .cloned()
            .collect()
    }

    pub fn acknowledgements(&self) -> Vec<AckRecord> {
        self.state.lock().acknowledgements.clone()
    }

    pub fn acknowledgements_for(&self, subscription: &str) -> Vec<AckRecord> {
        self.state
            .lock()
            .acknowledgements
            .iter()
            .filter(|record| record.subscription == subscription)
            .cloned()
            .collect()
    }

    pub fn queue_exists(&self, queue: &str) -> bool {
        self.state
            .lock()
            .vhosts
            .values()
            .any(|v| v.queues.contains_key(queue))
    }

    /// Messages waiting in `queue` (in any vhost)
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.state
            .lock()
            .vhosts
            .values()
            .filter_map(|v| v.queues.get(queue))
            .map(|q| q.messages.len())
            .sum()
    }

    /// Remove and return the contents of the messages waiting in `queue`
    pub fn drain_queue(&self, queue: &str) -> Vec<Value> {
        self.state
            .lock()
            .vhosts
            .values_mut()
            .filter_map(|v| v.queues.get_mut(queue))
            .flat_map(|q| q.messages.drain(..).map(|m| m.content).collect::<Vec<_>>())
            .collect()
    }

    /// Emit an error event on every consumer of `subscription`
    pub fn inject_error(&self, subscription: &str, error: BrokerError) {
        self.emit(subscription, || SubscriptionEvent::Error(error.clone()));
    }

    /// Emit an invalid-content event on every consumer of `subscription`
    pub fn inject_invalid_content(&self, subscription: &str, reason: &str) {
        self.emit(subscription, || {
            SubscriptionEvent::InvalidContent(BrokerError::InvalidContent(reason.to_string()))
        });
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections
    }

    pub fn shutdown_count(&self) -> usize {
        self.state.lock().shutdowns
    }

    fn emit(&self, subscription: &str, event: impl Fn() -> SubscriptionEvent) {
        let state = self.state.lock();
        for queue in state.vhosts.values().flat_map(|v| v.queues.values()) {
            for consumer in queue.consumers.iter().filter(|c| c.subscription == subscription) {
                let _ = consumer.tx.send(event());
            }
        }
    }
}

#[async_trait]
impl BrokerProvider for InMemoryBroker {
    async fn connect(&self, topology: &Topology) -> Result<BrokerHandle, BrokerError> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.refuse_connections {
            return Err(BrokerError::Connection(reason.clone()));
        }

        let connection_id = state.next_connection_id + 1;
        for (name, vhost) in &topology.vhosts {
            state.validate_vhost(connection_id, name, vhost)?;
        }

        state.next_connection_id = connection_id;
        state.connections += 1;

        let mut publications = HashMap::new();
        let mut subscriptions = HashMap::new();
        for (name, vhost) in &topology.vhosts {
            state.declare_vhost(connection_id, name, vhost);
            for (publication, config) in &vhost.publications {
                publications.insert(publication.clone(), (name.clone(), config.clone()));
            }
            for (subscription, config) in &vhost.subscriptions {
                subscriptions.insert(subscription.clone(), (name.clone(), config.clone()));
            }
        }

        debug!(
            connection_id,
            publications = publications.len(),
            subscriptions = subscriptions.len(),
            "In-memory broker connected"
        );

        Ok(Arc::new(MemoryConnection {
            connection_id,
            state: self.state.clone(),
            publications,
            subscriptions,
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryConnection {
    connection_id: u64,
    state: Arc<Mutex<ServerState>>,
    publications: HashMap<String, (String, PublicationConfig)>,
    subscriptions: HashMap<String, (String, SubscriptionConfig)>,
    closed: AtomicBool,
}

#[async_trait]
impl Broker for MemoryConnection {
    async fn publish(
        &self,
        publication: &str,
        content: Value,
        overrides: PublishOverrides,
    ) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        let (vhost, config) = self
            .publications
            .get(publication)
            .ok_or_else(|| BrokerError::UnknownPublication(publication.to_string()))?;

        let (exchange, routing_key) = match (&overrides.exchange, &config.queue) {
            (None, Some(queue)) if config.exchange.is_none() => {
                (DEFAULT_EXCHANGE.to_string(), queue.clone())
            }
            _ => (
                overrides
                    .exchange
                    .clone()
                    .or_else(|| config.exchange.clone())
                    .unwrap_or_default(),
                overrides
                    .routing_key
                    .clone()
                    .or_else(|| config.routing_key.clone())
                    .unwrap_or_default(),
            ),
        };
        let options = config.options.merged(&overrides.options);

        let mut state = self.state.lock();
        let mut record = PublishedRecord {
            publication: publication.to_string(),
            exchange: exchange.clone(),
            routing_key: routing_key.clone(),
            content: content.clone(),
            options: options.clone(),
            succeeded: false,
            at: Instant::now(),
        };

        if let Some(message) = state.take_failure(publication) {
            state.published.push(record);
            return Err(BrokerError::Publish {
                publication: publication.to_string(),
                message,
            });
        }

        let targets = state
            .vhosts
            .get(vhost)
            .map(|v| v.route(&exchange, &routing_key))
            .unwrap_or_default();

        if targets.is_empty() && options.mandatory.unwrap_or(false) {
            state.published.push(record);
            return Err(BrokerError::Unroutable {
                publication: publication.to_string(),
                routing_key,
            });
        }

        record.succeeded = true;
        state.published.push(record);
        trace!(publication = %publication, routing_key = %routing_key, queues = targets.len(), "Published message");

        let message = StoredMessage {
            envelope: MessageEnvelope {
                message_id: Uuid::new_v4().to_string(),
                publication: publication.to_string(),
                exchange,
                routing_key,
                queue: String::new(),
                headers: options.headers.clone(),
                persistent: options.persistent.unwrap_or(false),
                redelivered: false,
                timestamp: Utc::now(),
            },
            content,
            expiration: options.expiration,
        };
        for target in targets {
            enqueue(&self.state, &mut state, vhost, &target, message.clone());
        }
        Ok(())
    }

    async fn subscribe(&self, subscription: &str) -> Result<Subscription, BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        let (vhost, config) = self
            .subscriptions
            .get(subscription)
            .ok_or_else(|| BrokerError::UnknownSubscription(subscription.to_string()))?;

        let (tx, stream) = Subscription::channel(subscription);
        let mut state = self.state.lock();
        let queue = state
            .vhosts
            .get_mut(vhost)
            .and_then(|v| v.queues.get_mut(&config.queue))
            .ok_or_else(|| {
                BrokerError::Subscription(format!("Queue '{}' no longer exists", config.queue))
            })?;

        queue.consumers.push(Consumer {
            connection_id: self.connection_id,
            subscription: subscription.to_string(),
            tx,
        });
        queue.had_consumers = true;

        let backlog: Vec<StoredMessage> = queue.messages.drain(..).collect();
        for message in backlog {
            if let Some(message) = dispatch(&self.state, vhost, &config.queue, queue, message) {
                queue.messages.push_back(message);
            }
        }

        debug!(subscription = %subscription, queue = %config.queue, "Subscribed");
        Ok(stream)
    }

    async fn shutdown(&self) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        state.shutdowns += 1;
        if let Some(reason) = &state.fail_shutdowns {
            return Err(BrokerError::Shutdown(reason.clone()));
        }
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let connection_id = self.connection_id;
        for vhost in state.vhosts.values_mut() {
            let mut removed = Vec::new();
            for (name, queue) in vhost.queues.iter_mut() {
                queue.consumers.retain(|c| c.connection_id != connection_id);
                let auto_deleted = queue.options.auto_delete.unwrap_or(false)
                    && queue.had_consumers
                    && queue.consumers.is_empty();
                if queue.owner == Some(connection_id) || auto_deleted {
                    removed.push(name.clone());
                }
            }
            for name in &removed {
                vhost.queues.remove(name);
            }
            vhost.bindings.retain(|b| {
                b.destination_type != DestinationType::Queue || !removed.contains(&b.destination)
            });
        }

        debug!(connection_id, "In-memory broker connection closed");
        Ok(())
    }
}

/// AMQP topic matching: `*` matches one word, `#` matches zero or more
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    words_match(&pattern, &key)
}

fn words_match(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| words_match(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && words_match(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && words_match(rest, &key[1..]),
    }
}
