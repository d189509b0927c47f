//! Host collaborators backing a command-line run.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use ti_core::{EndpointChannel, Error, HistoryRecord, HistorySink, Result, ToolConfig, TypedValue};
use tracing::{debug, info};

/// Endpoint channel with inputs fixed on the command line.
///
/// Published values are kept in memory; the run command prints them with the
/// run report.
#[derive(Debug, Default)]
pub struct CliChannel {
    inputs: BTreeMap<String, TypedValue>,
    published: Mutex<Vec<(String, TypedValue)>>,
}

impl CliChannel {
    pub fn new(inputs: BTreeMap<String, TypedValue>) -> Self {
        Self {
            inputs,
            published: Mutex::new(Vec::new()),
        }
    }

    /// Values published since the last call.
    pub fn take_published(&self) -> Vec<(String, TypedValue)> {
        self.published
            .lock()
            .map(|mut p| std::mem::take(&mut *p))
            .unwrap_or_default()
    }
}

impl EndpointChannel for CliChannel {
    fn input_values(&self) -> Result<BTreeMap<String, TypedValue>> {
        Ok(self.inputs.clone())
    }

    fn write_output(&self, name: &str, value: TypedValue) -> Result<()> {
        info!("Output '{}' = {}", name, value);
        self.published
            .lock()
            .map_err(|_| Error::endpoint("Output buffer is poisoned"))?
            .push((name.to_string(), value));
        Ok(())
    }

    fn close_output(&self, name: &str) -> Result<()> {
        debug!("Output '{}' closed", name);
        Ok(())
    }
}

/// Parse `NAME=VALUE` assignments against the declared inputs of `config`.
pub fn parse_inputs(config: &ToolConfig, raw: &[String]) -> Result<BTreeMap<String, TypedValue>> {
    let mut values = BTreeMap::new();
    for assignment in raw {
        let (name, value) = assignment.split_once('=').ok_or_else(|| {
            Error::endpoint(format!("Expected NAME=VALUE, got '{assignment}'"))
        })?;
        let decl = config
            .input(name.trim())
            .ok_or_else(|| Error::endpoint(format!("Input '{}' is not declared", name.trim())))?;
        values.insert(decl.name.clone(), TypedValue::parse(decl.data_type, value)?);
    }
    Ok(values)
}

/// History sink appending one JSON document per line.
#[derive(Debug)]
pub struct JsonLinesHistory {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonLinesHistory {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }
}

impl HistorySink for JsonLinesHistory {
    fn append(&self, record: &HistoryRecord) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| Error::configuration("History file lock is poisoned"))?;
        let line = serde_json::to_string(record)
            .map_err(|e| Error::configuration(format!("Failed to encode history record: {e}")))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::sandbox_io("append history record", &self.path, e))?;
        writeln!(file, "{line}")
            .map_err(|e| Error::sandbox_io("append history record", &self.path, e))
    }
}
