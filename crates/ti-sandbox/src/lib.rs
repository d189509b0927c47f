//! Working directory management for integrated tool runs.
//!
//! A job owns one [`SandboxManager`]. It creates the base working directory,
//! hands out a [`SandboxSession`] per run (a numbered iteration directory or the
//! base itself), copies the tool and file inputs into it, writes config files
//! and finally disposes of everything according to the resolved
//! [`DirectoryPolicy`].

pub mod cleanup;
mod fs;
pub mod manager;
pub mod policy;
pub mod session;

pub use cleanup::DeferredCleanup;
pub use manager::{SandboxManager, MEMO_DIR, WORKFLOW_INFO_FILE};
pub use policy::DirectoryPolicy;
pub use session::{SandboxSession, CONFIG_DIR, INPUT_DIR, OUTPUT_DIR};
