//! Declarative broker topology
//!
//! A [`Topology`] describes everything the broker client needs to know before a
//! connection exists: connection parameters plus named exchanges, queues, bindings,
//! publications and subscriptions, grouped by virtual host.
//!
//! Field names follow the broker client's configuration shape (camelCase), so the same
//! document can be loaded from JSON, YAML or TOML:
//!
//! ```yaml
//! vhosts:
//!   /:
//!     connection:
//!       url: amqp://localhost:5672
//!     queues:
//!       orders:
//!         options:
//!           durable: true
//!     publications:
//!       order_created:
//!         queue: orders
//! ```
//!
//! Middleware treats a topology as read-only input and returns a new value; nothing in
//! this module mutates a topology behind the caller's back.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Queue argument naming the exchange that receives dead-lettered messages.
pub const DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";

/// Queue argument naming the routing key used when dead-lettering.
pub const DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";

/// The broker's default direct exchange.
pub const DEFAULT_EXCHANGE: &str = "";

/// Errors raised while loading a topology document
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("Failed to read topology file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON topology: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid YAML topology: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid TOML topology: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Unsupported topology format: {0}")]
    UnsupportedFormat(String),
}

/// Broker topology, keyed by virtual host name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    #[serde(default)]
    pub vhosts: BTreeMap<String, VhostConfig>,
}

impl Topology {
    /// An empty topology with no virtual hosts
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a virtual host
    pub fn with_vhost(mut self, name: impl Into<String>, vhost: VhostConfig) -> Self {
        self.vhosts.insert(name.into(), vhost);
        self
    }

    pub fn vhost(&self, name: &str) -> Option<&VhostConfig> {
        self.vhosts.get(name)
    }

    /// Names of all subscriptions declared across every virtual host
    pub fn subscription_names(&self) -> Vec<String> {
        self.vhosts
            .values()
            .flat_map(|vhost| vhost.subscriptions.keys().cloned())
            .collect()
    }

    /// Names of all publications declared across every virtual host
    pub fn publication_names(&self) -> Vec<String> {
        self.vhosts
            .values()
            .flat_map(|vhost| vhost.publications.keys().cloned())
            .collect()
    }

    pub fn from_json_str(input: &str) -> Result<Self, TopologyError> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn from_yaml_str(input: &str) -> Result<Self, TopologyError> {
        Ok(serde_yaml::from_str(input)?)
    }

    pub fn from_toml_str(input: &str) -> Result<Self, TopologyError> {
        Ok(toml::from_str(input)?)
    }

    /// Load a topology file, choosing the format from its extension
    /// (`.json`, `.yaml`/`.yml` or `.toml`)
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| TopologyError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        match extension.as_str() {
            "json" => Self::from_json_str(&contents),
            "yaml" | "yml" => Self::from_yaml_str(&contents),
            "toml" => Self::from_toml_str(&contents),
            other => Err(TopologyError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Everything declared inside one virtual host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VhostConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionConfig>,
    #[serde(default)]
    pub exchanges: BTreeMap<String, ExchangeConfig>,
    #[serde(default)]
    pub queues: BTreeMap<String, QueueConfig>,
    #[serde(default)]
    pub bindings: BTreeMap<String, BindingConfig>,
    #[serde(default)]
    pub publications: BTreeMap<String, PublicationConfig>,
    #[serde(default)]
    pub subscriptions: BTreeMap<String, SubscriptionConfig>,
}

impl VhostConfig {
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn with_exchange(mut self, name: impl Into<String>, exchange: ExchangeConfig) -> Self {
        self.exchanges.insert(name.into(), exchange);
        self
    }

    pub fn with_queue(mut self, name: impl Into<String>, queue: QueueConfig) -> Self {
        self.queues.insert(name.into(), queue);
        self
    }

    pub fn with_binding(mut self, name: impl Into<String>, binding: BindingConfig) -> Self {
        self.bindings.insert(name.into(), binding);
        self
    }

    pub fn with_publication(
        mut self,
        name: impl Into<String>,
        publication: PublicationConfig,
    ) -> Self {
        self.publications.insert(name.into(), publication);
        self
    }

    pub fn with_subscription(
        mut self,
        name: impl Into<String>,
        subscription: SubscriptionConfig,
    ) -> Self {
        self.subscriptions.insert(name.into(), subscription);
        self
    }
}

/// Connection parameters, passed through to the broker client untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ConnectionConfig {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeType {
    Direct,
    #[default]
    Topic,
    Fanout,
    Headers,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeConfig {
    #[serde(default, rename = "type")]
    pub exchange_type: ExchangeType,
    #[serde(default)]
    pub options: ExchangeOptions,
}

impl ExchangeConfig {
    pub fn new(exchange_type: ExchangeType) -> Self {
        Self {
            exchange_type,
            options: ExchangeOptions::default(),
        }
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.options.durable = Some(durable);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_delete: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arguments: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    #[serde(default)]
    pub options: QueueOptions,
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.options.durable = Some(durable);
        self
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.options.exclusive = Some(exclusive);
        self
    }

    pub fn auto_delete(mut self, auto_delete: bool) -> Self {
        self.options.auto_delete = Some(auto_delete);
        self
    }

    pub fn argument(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.arguments.insert(key.into(), value.into());
        self
    }

    /// Route expired or rejected messages to `exchange` with `routing_key`
    pub fn dead_letter_to(self, exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        self.argument(DEAD_LETTER_EXCHANGE, exchange.into())
            .argument(DEAD_LETTER_ROUTING_KEY, routing_key.into())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_delete: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arguments: BTreeMap<String, Value>,
}

impl QueueOptions {
    /// The dead-letter exchange and optional routing key, if configured
    pub fn dead_letter_target(&self) -> Option<(String, Option<String>)> {
        let exchange = self.arguments.get(DEAD_LETTER_EXCHANGE)?.as_str()?.to_string();
        let routing_key = self
            .arguments
            .get(DEAD_LETTER_ROUTING_KEY)
            .and_then(Value::as_str)
            .map(str::to_string);
        Some((exchange, routing_key))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationType {
    #[default]
    Queue,
    Exchange,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingConfig {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub destination_type: DestinationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding_key: Option<String>,
}

impl BindingConfig {
    pub fn queue(
        source: impl Into<String>,
        destination: impl Into<String>,
        binding_key: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            destination_type: DestinationType::Queue,
            binding_key: Some(binding_key.into()),
        }
    }
}

/// A named way of publishing: either to an exchange or straight to a queue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,
    #[serde(default)]
    pub options: PublishOptions,
}

impl PublicationConfig {
    pub fn exchange(exchange: impl Into<String>) -> Self {
        Self {
            exchange: Some(exchange.into()),
            ..Self::default()
        }
    }

    pub fn queue(queue: impl Into<String>) -> Self {
        Self {
            queue: Some(queue.into()),
            ..Self::default()
        }
    }

    pub fn routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.options.persistent = Some(persistent);
        self
    }
}

/// Per-message publish options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mandatory: Option<bool>,
    /// Per-message TTL in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, Value>,
}

impl PublishOptions {
    /// Layer `other` on top of `self`; set fields in `other` win, headers are unioned
    pub fn merged(&self, other: &PublishOptions) -> PublishOptions {
        let mut headers = self.headers.clone();
        headers.extend(other.headers.clone());
        PublishOptions {
            persistent: other.persistent.or(self.persistent),
            mandatory: other.mandatory.or(self.mandatory),
            expiration: other.expiration.or(self.expiration),
            headers,
        }
    }
}

/// Call-site overrides applied on top of a declared publication
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,
    #[serde(default)]
    pub options: PublishOptions,
}

impl PublishOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    pub fn mandatory(mut self, mandatory: bool) -> Self {
        self.options.mandatory = Some(mandatory);
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.options.persistent = Some(persistent);
        self
    }

    pub fn expiration(mut self, expiration_ms: u64) -> Self {
        self.options.expiration = Some(expiration_ms);
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.headers.insert(key.into(), value.into());
        self
    }

    /// Layer `other` on top of `self`
    pub fn merged(&self, other: &PublishOverrides) -> PublishOverrides {
        PublishOverrides {
            exchange: other.exchange.clone().or_else(|| self.exchange.clone()),
            routing_key: other.routing_key.clone().or_else(|| self.routing_key.clone()),
            options: self.options.merged(&other.options),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionConfig {
    pub queue: String,
    #[serde(default)]
    pub options: SubscriptionOptions,
}

impl SubscriptionConfig {
    pub fn queue(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            options: SubscriptionOptions::default(),
        }
    }

    pub fn prefetch(mut self, prefetch: u16) -> Self {
        self.options.prefetch = Some(prefetch);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefetch: Option<u16>,
}
