//! Hand-off of finished-run records to the history sink.

use std::sync::Arc;
use tracing::debug;

use ti_core::{ComponentLog, HistoryRecord, HistorySink};

/// Hands finished-run records to the host's history sink.
#[derive(Clone)]
pub struct HistoryRecorder {
    sink: Option<Arc<dyn HistorySink>>,
    enabled: bool,
}

impl HistoryRecorder {
    /// `enabled` mirrors the tool's "store data item" switch.
    pub fn new(sink: Option<Arc<dyn HistorySink>>, enabled: bool) -> Self {
        Self { sink, enabled }
    }

    /// Append `record`. A failing sink is reported on `log` and otherwise ignored.
    pub fn record(&self, record: &HistoryRecord, log: &dyn ComponentLog) {
        let Some(sink) = self.sink.as_ref().filter(|_| self.enabled) else {
            debug!("History record for run {} not stored", record.run_count);
            return;
        };
        if let Err(e) = sink.append(record) {
            log.error(&format!("Failed to store history record: {e}"));
        }
    }
}
