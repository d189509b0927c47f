//! Finished-run history record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::state::JobState;

/// One record per finished run, whatever its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub component: String,
    pub working_directory: PathBuf,
    /// Exit code of the command, `None` when no command ran.
    pub exit_code: Option<i32>,
    pub state: JobState,
    pub run_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub log_references: Vec<String>,
    pub finished_at: DateTime<Utc>,
}
