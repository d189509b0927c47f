//! Paths of a prepared working directory.

use std::path::{Path, PathBuf};

pub const INPUT_DIR: &str = "Input";
pub const OUTPUT_DIR: &str = "Output";
pub const CONFIG_DIR: &str = "Config";

/// Paths of one prepared working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSession {
    /// Base working directory of the job.
    pub base: PathBuf,
    /// Directory the run works in: an iteration directory or the base itself.
    pub directory: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
    pub config: PathBuf,
    /// Directory the tool is executed from.
    pub tool: PathBuf,
}

impl SandboxSession {
    pub(crate) fn layout(base: &Path, directory: &Path, tool: PathBuf) -> Self {
        Self {
            base: base.to_path_buf(),
            directory: directory.to_path_buf(),
            input: directory.join(INPUT_DIR),
            output: directory.join(OUTPUT_DIR),
            config: directory.join(CONFIG_DIR),
            tool,
        }
    }

    /// Whether the run has a directory of its own below the base.
    pub fn is_iteration(&self) -> bool {
        self.directory != self.base
    }
}
