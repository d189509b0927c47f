//! In-memory collaborators for unit and integration tests.
//!
//! These fakes record everything a job hands to its host so tests can assert on
//! log lines, published outputs, history records and sent mails.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::host::{ApprovalMailer, ComponentLog, EndpointChannel, HistorySink};
use crate::record::HistoryRecord;
use crate::value::TypedValue;
use crate::{Error, Result};

/// Severity of a recorded log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Stdout,
    Stderr,
}

/// Log sink that keeps every line in memory.
#[derive(Debug, Default)]
pub struct RecordingLog {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl RecordingLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Whether any line of `level` contains `needle`.
    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.lines().iter().any(|(l, m)| *l == level && m.contains(needle))
    }

    fn push(&self, level: LogLevel, message: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push((level, message.to_string()));
        }
    }
}

impl ComponentLog for RecordingLog {
    fn info(&self, message: &str) {
        self.push(LogLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.push(LogLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.push(LogLevel::Error, message);
    }

    fn tool_stdout(&self, line: &str) {
        self.push(LogLevel::Stdout, line);
    }

    fn tool_stderr(&self, line: &str) {
        self.push(LogLevel::Stderr, line);
    }

    fn log_references(&self) -> Vec<String> {
        vec!["memory".to_string()]
    }
}

/// Endpoint channel backed by maps.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    inputs: Mutex<BTreeMap<String, TypedValue>>,
    outputs: Mutex<Vec<(String, TypedValue)>>,
    closed: Mutex<Vec<String>>,
}

impl MemoryChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Bind (or rebind) an input value for the next run.
    pub fn set_input<S: Into<String>>(&self, name: S, value: TypedValue) {
        if let Ok(mut inputs) = self.inputs.lock() {
            inputs.insert(name.into(), value);
        }
    }

    /// Every value published so far, in order.
    pub fn outputs(&self) -> Vec<(String, TypedValue)> {
        self.outputs.lock().map(|o| o.clone()).unwrap_or_default()
    }

    /// Values published on a single output.
    pub fn outputs_named(&self, name: &str) -> Vec<TypedValue> {
        self.outputs()
            .into_iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v)
            .collect()
    }

    pub fn clear_outputs(&self) {
        if let Ok(mut outputs) = self.outputs.lock() {
            outputs.clear();
        }
    }

    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl EndpointChannel for MemoryChannel {
    fn input_values(&self) -> Result<BTreeMap<String, TypedValue>> {
        self.inputs
            .lock()
            .map(|i| i.clone())
            .map_err(|_| Error::endpoint("input map poisoned"))
    }

    fn write_output(&self, name: &str, value: TypedValue) -> Result<()> {
        self.outputs
            .lock()
            .map_err(|_| Error::endpoint("output list poisoned"))?
            .push((name.to_string(), value));
        Ok(())
    }

    fn close_output(&self, name: &str) -> Result<()> {
        self.closed
            .lock()
            .map_err(|_| Error::endpoint("closed list poisoned"))?
            .push(name.to_string());
        Ok(())
    }
}

/// History sink that keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    records: Mutex<Vec<HistoryRecord>>,
}

impl MemoryHistory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<HistoryRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl HistorySink for MemoryHistory {
    fn append(&self, record: &HistoryRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| Error::endpoint("history poisoned"))?
            .push(record.clone());
        Ok(())
    }
}

/// A mail captured by [`RecordingMailer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Mailer that records mails, or fails every send when built with [`RecordingMailer::failing`].
#[derive(Debug, Default)]
pub struct RecordingMailer {
    fail: bool,
    sent: Mutex<Vec<SentMail>>,
}

impl RecordingMailer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ApprovalMailer for RecordingMailer {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<()> {
        if self.fail {
            return Err(Error::approval_dispatch("mail transport unavailable"));
        }
        self.sent
            .lock()
            .map_err(|_| Error::approval_dispatch("mail log poisoned"))?
            .push(SentMail {
                recipients: recipients.to_vec(),
                subject: subject.to_string(),
                body: body.to_string(),
            });
        Ok(())
    }
}
