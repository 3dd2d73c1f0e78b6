pub mod delayed;
pub mod pubsub;
pub mod rpc;

use hoppity::topology::VhostConfig;
use hoppity::{LogLevel, Logger, Topology};

pub const VHOST: &str = "/";

/// `topology` when one was loaded, otherwise a single empty vhost
pub fn base_topology(topology: Option<Topology>) -> Topology {
    topology.unwrap_or_else(|| Topology::new().with_vhost(VHOST, VhostConfig::default()))
}

/// Tags every pipeline log line with the service that emitted it
pub struct ServiceLogger {
    service: &'static str,
}

impl ServiceLogger {
    pub fn new(service: &'static str) -> Self {
        Self { service }
    }
}

impl Logger for ServiceLogger {
    fn log(&self, level: LogLevel, message: &str) {
        let service = self.service;
        match level {
            LogLevel::Silly => tracing::trace!(service, "{}", message),
            LogLevel::Debug => tracing::debug!(service, "{}", message),
            LogLevel::Info => tracing::info!(service, "{}", message),
            LogLevel::Warn => tracing::warn!(service, "{}", message),
            LogLevel::Error => tracing::error!(service, "{}", message),
            LogLevel::Critical => tracing::error!(service, critical = true, "{}", message),
        }
    }
}
