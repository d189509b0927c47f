//! Job lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sub-phase of [`JobState::Running`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunPhase {
    PreScript,
    Command,
    PostScript,
    /// Mock script replacing the three regular phases.
    Imitation,
}

impl RunPhase {
    /// Name used in log lines and script errors.
    pub fn label(self) -> &'static str {
        match self {
            Self::PreScript => "pre execution",
            Self::Command => "command",
            Self::PostScript => "post execution",
            Self::Imitation => "tool run imitation",
        }
    }
}

/// State of a job.
///
/// Transitions are linear:
/// `Init → PreparingSandbox → MaterializingInputs → WritingConfigFiles → DecidingRun →
/// {Running | Skipped} → ApprovalPending? → Finalizing → {Done | Failed | Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobState {
    Init,
    PreparingSandbox,
    MaterializingInputs,
    WritingConfigFiles,
    DecidingRun,
    Running(RunPhase),
    Skipped,
    ApprovalPending,
    Finalizing,
    Done,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("INIT"),
            Self::PreparingSandbox => f.write_str("PREPARING_SANDBOX"),
            Self::MaterializingInputs => f.write_str("MATERIALIZING_INPUTS"),
            Self::WritingConfigFiles => f.write_str("WRITING_CONFIG_FILES"),
            Self::DecidingRun => f.write_str("DECIDING_RUN"),
            Self::Running(phase) => write!(f, "RUNNING({})", phase.label()),
            Self::Skipped => f.write_str("SKIPPED"),
            Self::ApprovalPending => f.write_str("APPROVAL_PENDING"),
            Self::Finalizing => f.write_str("FINALIZING"),
            Self::Done => f.write_str("DONE"),
            Self::Failed => f.write_str("FAILED"),
            Self::Cancelled => f.write_str("CANCELLED"),
        }
    }
}
