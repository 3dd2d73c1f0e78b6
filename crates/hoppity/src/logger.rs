//! Logger boundary carried in the middleware context
//!
//! Middleware and plugins log through an `Arc<dyn Logger>` so an application can route
//! pipeline diagnostics wherever it likes. The default forwards to `tracing`.

use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Silly,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Silly => "silly",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// A best-effort log sink. Implementations must never panic.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);

    fn silly(&self, message: &str) {
        self.log(LogLevel::Silly, message);
    }

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    fn critical(&self, message: &str) {
        self.log(LogLevel::Critical, message);
    }
}

/// Forwards to `tracing` under the `hoppity` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Silly => tracing::trace!(target: "hoppity", "{}", message),
            LogLevel::Debug => tracing::debug!(target: "hoppity", "{}", message),
            LogLevel::Info => tracing::info!(target: "hoppity", "{}", message),
            LogLevel::Warn => tracing::warn!(target: "hoppity", "{}", message),
            LogLevel::Error => tracing::error!(target: "hoppity", "{}", message),
            LogLevel::Critical => tracing::error!(target: "hoppity", critical = true, "{}", message),
        }
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentLogger;

impl Logger for SilentLogger {
    fn log(&self, _level: LogLevel, _message: &str) {}
}

pub fn default_logger() -> Arc<dyn Logger> {
    Arc::new(TracingLogger)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Captures log lines for assertions
    #[derive(Default)]
    pub struct RecordingLogger {
        pub lines: Mutex<Vec<(LogLevel, String)>>,
    }

    impl Logger for RecordingLogger {
        fn log(&self, level: LogLevel, message: &str) {
            self.lines.lock().push((level, message.to_string()));
        }
    }

    #[test]
    fn convenience_methods_forward_their_level() {
        let logger = RecordingLogger::default();
        logger.silly("a");
        logger.critical("b");

        let lines = logger.lines.lock();
        assert_eq!(lines[0], (LogLevel::Silly, "a".to_string()));
        assert_eq!(lines[1], (LogLevel::Critical, "b".to_string()));
    }

    #[test]
    fn silent_logger_accepts_every_level() {
        let logger = SilentLogger;
        logger.warn("ignored");
        logger.error("ignored");
    }
}
