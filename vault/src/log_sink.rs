//! Run-visible log output.
//!
//! Messages meant for the person watching the run (renewal confirmations,
//! missing-secret warnings, revoke failures) go through a [`LogSink`] that the
//! caller hands in. Diagnostics for operators keep using `tracing` directly.

use std::fmt;

/// Severity of a run log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warning level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Convert to string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for run log lines.
pub trait LogSink: Send + Sync {
    /// Write one line.
    fn write(&self, level: LogLevel, message: &str);

    /// Write an info line.
    fn info(&self, message: &str) {
        self.write(LogLevel::Info, message);
    }

    /// Write a warning line.
    fn warn(&self, message: &str) {
        self.write(LogLevel::Warn, message);
    }

    /// Write an error line.
    fn error(&self, message: &str) {
        self.write(LogLevel::Error, message);
    }
}

/// Forwards run log lines to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn write(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "pipeline_vault::run", "{message}"),
            LogLevel::Info => tracing::info!(target: "pipeline_vault::run", "{message}"),
            LogLevel::Warn => tracing::warn!(target: "pipeline_vault::run", "{message}"),
            LogLevel::Error => tracing::error!(target: "pipeline_vault::run", "{message}"),
        }
    }
}
