//! Collaborator interfaces implemented by the host that embeds a job.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{error, info, warn};

use crate::record::HistoryRecord;
use crate::value::TypedValue;
use crate::Result;

/// Component log sink.
///
/// Lines written here are user-visible, as opposed to the `tracing` diagnostics
/// the crates emit internally.
pub trait ComponentLog: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);

    /// A line the tool wrote to stdout.
    fn tool_stdout(&self, line: &str) {
        self.info(line);
    }

    /// A line the tool wrote to stderr.
    fn tool_stderr(&self, line: &str) {
        self.warn(line);
    }

    /// References to persisted logs, stored with the history record.
    fn log_references(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Log sink that forwards to `tracing` under the `tool` target.
#[derive(Debug, Clone)]
pub struct TracingLog {
    component: String,
}

impl TracingLog {
    pub fn new<S: Into<String>>(component: S) -> Self {
        Self {
            component: component.into(),
        }
    }
}

impl ComponentLog for TracingLog {
    fn info(&self, message: &str) {
        info!(target: "tool", component = %self.component, "{}", message);
    }

    fn warn(&self, message: &str) {
        warn!(target: "tool", component = %self.component, "{}", message);
    }

    fn error(&self, message: &str) {
        error!(target: "tool", component = %self.component, "{}", message);
    }
}

/// Typed input/output binding surface of the surrounding workflow.
pub trait EndpointChannel: Send + Sync {
    /// Values currently bound to the job's inputs, keyed by input name.
    fn input_values(&self) -> Result<BTreeMap<String, TypedValue>>;

    /// Publish a value on an output.
    ///
    /// File and directory values point into the sandbox; implementations that
    /// outlive the sandbox must ingest them before returning.
    fn write_output(&self, name: &str, value: TypedValue) -> Result<()>;

    /// Signal that no further values follow on an output.
    fn close_output(&self, name: &str) -> Result<()>;
}

/// Receiver of finished-run records.
pub trait HistorySink: Send + Sync {
    fn append(&self, record: &HistoryRecord) -> Result<()>;
}

/// Transport for output-approval announcements.
#[async_trait]
pub trait ApprovalMailer: Send + Sync {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<()>;
}

/// Host operating system family, selects the command dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Windows,
    Unix,
}

impl OsFamily {
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Unix
        }
    }
}

impl std::fmt::Display for OsFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Windows => f.write_str("Windows"),
            Self::Unix => f.write_str("Linux"),
        }
    }
}
