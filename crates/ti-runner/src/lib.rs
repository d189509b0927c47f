//! Execution of tool commands and embedded scripts.
//!
//! Commands run as native processes through [`CommandExecutor`]; pre, post and
//! mock scripts run in an embedded engine through [`ScriptRunner`]. Both honour
//! a cancellation token instead of failing when a job is stopped.

pub mod adapter;
pub mod command;
pub mod script;
pub mod state;

/// Command execution
pub use command::{select_command, CommandExecutor, CommandOutcome, CommandRequest, LocalShellExecutor};
/// Script evaluation
pub use script::{
    output_slots, OutputSlot, ScriptEnvironment, ScriptOutcome, ScriptRequest, ScriptResult,
    ScriptRunner,
};
/// State shared between script runs
pub use state::PersistedScriptState;
