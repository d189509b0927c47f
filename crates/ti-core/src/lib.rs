//! Core model shared by the tool integration crates.
//!
//! This crate holds the error taxonomy, the typed values bound to tool inputs and
//! outputs, the tool configuration snapshot, the collaborator traits a host
//! implements (log sink, endpoint channel, history sink, approval mailer) and the
//! [`ConcurrencyGate`] that every job shares.

pub mod config;
pub mod error;
pub mod gate;
pub mod host;
pub mod record;
pub mod state;
pub mod test_support;
pub mod value;

/// Result type used throughout the tool integration crates.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for tool integration operations.
pub use error::Error;

/// Tool configuration snapshot and its declarations.
pub use config::{
    ConfigReader, CopyToolBehaviour, DeleteBehaviour, InputDecl, OutputDecl, PropertyValue,
    ToolConfig,
};

/// Shared copy semaphore and script mutex.
pub use gate::ConcurrencyGate;

/// Collaborator interfaces provided by the host.
pub use host::{ApprovalMailer, ComponentLog, EndpointChannel, HistorySink, OsFamily, TracingLog};

/// Finished-run record handed to the history sink.
pub use record::HistoryRecord;

/// Job lifecycle states.
pub use state::{JobState, RunPhase};

/// Typed values.
pub use value::{DataType, TypedValue};
