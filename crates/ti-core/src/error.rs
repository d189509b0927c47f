//! Error taxonomy shared by every tool integration crate.

use std::path::{Path, PathBuf};

/// Error type for tool integration operations.
///
/// Cancellation is deliberately absent: a cancelled job is reported through
/// [`crate::JobState::Cancelled`], never through an `Err`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid policy combination or missing OS-specific command.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Directory creation, copy or deletion failed.
    #[error("Failed to {operation} '{}': {source}", .path.display())]
    SandboxIo {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A value is not safe for the target substitution context.
    #[error(
        "{origin} can not be substituted in the {context} text, because it contains the unsecure character {offending:?}"
    )]
    SubstitutionSecurity {
        value: String,
        origin: String,
        context: String,
        offending: char,
    },

    /// Engine evaluation failure or abnormal script exit.
    #[error("Execution of {phase} script failed: {message}")]
    ScriptExecution { phase: String, message: String },

    /// The command could not be run or exited with a non-tolerated code.
    #[error("Command(s) execution failed: {message}")]
    ProcessExecution {
        exit_code: Option<i32>,
        message: String,
    },

    /// Neither the token file nor the email announcement succeeded.
    #[error("Failed to announce verification key: {message}")]
    ApprovalDispatch { message: String },

    /// The approver declined the outputs of the run.
    #[error("Output approval rejected: {message}")]
    ApprovalRejected { message: String },

    /// An input/output binding or history collaborator failed.
    #[error("Endpoint error: {message}")]
    Endpoint { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    /// Create a new configuration error.
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Wrap an I/O failure on a sandbox path.
    pub fn sandbox_io<S: Into<String>>(operation: S, path: &Path, source: std::io::Error) -> Self {
        Self::SandboxIo {
            operation: operation.into(),
            path: path.to_path_buf(),
            source,
        }
    }

    /// Create a new script execution error for the given phase.
    pub fn script<P: Into<String>, S: Into<String>>(phase: P, message: S) -> Self {
        Self::ScriptExecution {
            phase: phase.into(),
            message: message.into(),
        }
    }

    /// Create a process error for a command that exited with `exit_code`.
    pub fn exit_code(exit_code: i32) -> Self {
        Self::ProcessExecution {
            exit_code: Some(exit_code),
            message: format!("terminated abnormally with exit code: {exit_code}"),
        }
    }

    /// Create a process error for a command that could not be run at all.
    pub fn process<S: Into<String>>(message: S) -> Self {
        Self::ProcessExecution {
            exit_code: None,
            message: message.into(),
        }
    }

    /// Create a new approval dispatch error.
    pub fn approval_dispatch<S: Into<String>>(message: S) -> Self {
        Self::ApprovalDispatch {
            message: message.into(),
        }
    }

    /// Create a new endpoint error.
    pub fn endpoint<S: Into<String>>(message: S) -> Self {
        Self::Endpoint {
            message: message.into(),
        }
    }

    /// Short taxonomy name used in log lines and history records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "ConfigurationError",
            Self::SandboxIo { .. } | Self::Io(_) => "SandboxIOError",
            Self::SubstitutionSecurity { .. } => "SubstitutionSecurityError",
            Self::ScriptExecution { .. } => "ScriptExecutionError",
            Self::ProcessExecution { .. } => "ProcessExecutionError",
            Self::ApprovalDispatch { .. } => "ApprovalDispatchError",
            Self::ApprovalRejected { .. } => "ApprovalRejected",
            Self::Endpoint { .. } | Self::Serde(_) => "EndpointError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_error_carries_code() {
        let err = Error::exit_code(3);
        match &err {
            Error::ProcessExecution { exit_code, .. } => assert_eq!(*exit_code, Some(3)),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("exit code: 3"));
        assert_eq!(err.kind(), "ProcessExecutionError");
    }

    #[test]
    fn test_sandbox_io_display_names_path() {
        let err = Error::sandbox_io(
            "create directory",
            Path::new("/tmp/tool/Input"),
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("create directory"));
        assert!(msg.contains("/tmp/tool/Input"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_substitution_error_names_origin() {
        let err = Error::SubstitutionSecurity {
            value: "bob; rm -rf /".to_string(),
            origin: "Value 'bob; rm -rf /' from input 'username'".to_string(),
            context: "POSIX shell".to_string(),
            offending: ';',
        };
        let msg = err.to_string();
        assert!(msg.contains("input 'username'"));
        assert!(msg.contains("';'"));
    }
}
