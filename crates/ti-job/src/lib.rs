//! Orchestration of integrated tool runs.
//!
//! A [`Job`] ties the sandbox, placeholder and runner crates together into the
//! run state machine. It skips runs whose static inputs did not change, routes
//! outputs through the [`ApprovalGate`] when the tool requires approval and
//! reports every finished run to the [`HistoryRecorder`].

pub mod approval;
pub mod history;
pub mod job;
pub mod memo;
pub mod services;

/// Output approval
pub use approval::{
    ApprovalDecision, ApprovalGate, ApprovalHandle, TokenDetails, VerificationToken,
    VERIFICATION_FILE_NAME,
};
/// Run history
pub use history::HistoryRecorder;
/// The state machine
pub use job::{Flow, Job, JobReport};
/// Skip-if-unchanged memoization
pub use memo::{CachedRunState, StaticInput, StaticInputs};
/// Collaborators
pub use services::JobServices;
