//! Copy and deletion policy resolution.

use tracing::debug;

use ti_core::{ComponentLog, CopyToolBehaviour, DeleteBehaviour, Error, Result, ToolConfig};

/// Resolved directory policy of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryPolicy {
    pub use_iteration_directories: bool,
    pub copy_tool: CopyToolBehaviour,
    pub delete: DeleteBehaviour,
    /// Keep directories of failed or cancelled runs.
    pub keep_on_failure: bool,
}

impl DirectoryPolicy {
    /// Resolve the policy of `config`, reporting adjustments on `log`.
    ///
    /// Fails when the tool is copied or deleted per run while runs share one
    /// directory. Nothing touches the filesystem here.
    pub fn resolve(config: &ToolConfig, log: &dyn ComponentLog) -> Result<Self> {
        let delete = resolve_delete(config, log);
        let keep_on_failure = resolve_keep_on_failure(config, delete, log);

        let policy = Self {
            use_iteration_directories: config.use_iteration_directories,
            copy_tool: config.copy_tool_behaviour,
            delete,
            keep_on_failure,
        };
        policy.validate()?;
        debug!("Resolved directory policy: {:?}", policy);
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        let per_run = self.copy_tool == CopyToolBehaviour::Always
            || self.delete == DeleteBehaviour::Always;
        if per_run && !self.use_iteration_directories {
            return Err(Error::configuration(
                "Tool shall be copied or deleted after every run but the working directory is not new for each run. \
                 Enable iteration directories or choose another copy/delete behaviour.",
            ));
        }
        Ok(())
    }

    /// Whether the base directory is kept when the job ends.
    pub fn keep_base(&self, success: bool) -> bool {
        match self.delete {
            DeleteBehaviour::Never => true,
            DeleteBehaviour::Once | DeleteBehaviour::Always => self.keep_on_failure && !success,
        }
    }

    /// Whether an iteration directory is deleted right after a successful run.
    pub fn delete_iteration_after_run(&self) -> bool {
        self.use_iteration_directories && self.delete == DeleteBehaviour::Always
    }
}

fn enabled(config: &ToolConfig, behaviour: DeleteBehaviour) -> bool {
    match behaviour {
        DeleteBehaviour::Always => config.delete_working_directories_always,
        DeleteBehaviour::Once => config.delete_working_directories_once,
        DeleteBehaviour::Never => config.delete_working_directories_never,
    }
}

/// Fallback choice: once, then never, then always.
fn fallback_delete(config: &ToolConfig) -> DeleteBehaviour {
    if config.delete_working_directories_once {
        DeleteBehaviour::Once
    } else if config.delete_working_directories_never {
        DeleteBehaviour::Never
    } else {
        DeleteBehaviour::Always
    }
}

fn describe(behaviour: DeleteBehaviour) -> &'static str {
    match behaviour {
        DeleteBehaviour::Always => "\"Delete after every run\"",
        DeleteBehaviour::Once => "\"Delete after workflow execution\"",
        DeleteBehaviour::Never => "\"Do not delete\"",
    }
}

fn resolve_delete(config: &ToolConfig, log: &dyn ComponentLog) -> DeleteBehaviour {
    let chosen = config
        .chosen_delete_temp_dir_behavior
        .unwrap_or_else(|| fallback_delete(config));
    if enabled(config, chosen) {
        return chosen;
    }
    let valid = fallback_delete(config);
    log.warn(&format!(
        "Chosen working directory deletion behavior not supported for tool {}. Valid one is automatically chosen: {}",
        config.display_name(),
        describe(valid)
    ));
    valid
}

fn resolve_keep_on_failure(
    config: &ToolConfig,
    delete: DeleteBehaviour,
    log: &dyn ComponentLog,
) -> bool {
    if !config.keep_on_failure {
        return false;
    }
    let supported = match delete {
        DeleteBehaviour::Never => false,
        DeleteBehaviour::Always => config.delete_working_directories_keep_on_error_iteration,
        DeleteBehaviour::Once => config.delete_working_directories_keep_on_error_once,
    };
    if !supported {
        log.warn(
            "\"Keep working directory(ies) in case of failure\" was active but is not supported by the tool, so it was deactivated.",
        );
    }
    supported
}

#[cfg(test)]
mod tests {
    use super::*;
    use ti_core::test_support::{LogLevel, RecordingLog};

    fn config() -> ToolConfig {
        ToolConfig {
            tool_name: "solver".into(),
            ..ToolConfig::default()
        }
    }

    #[test]
    fn test_default_resolves_to_once() {
        let log = RecordingLog::new();
        let policy = DirectoryPolicy::resolve(&config(), log.as_ref()).unwrap();
        assert_eq!(policy.delete, DeleteBehaviour::Once);
        assert!(log.lines().is_empty());
    }

    #[test]
    fn test_chosen_behaviour_not_enabled_falls_back_with_warning() {
        let log = RecordingLog::new();
        let mut cfg = config();
        cfg.delete_working_directories_once = false;
        cfg.delete_working_directories_never = true;
        cfg.chosen_delete_temp_dir_behavior = Some(DeleteBehaviour::Always);

        let policy = DirectoryPolicy::resolve(&cfg, log.as_ref()).unwrap();
        assert_eq!(policy.delete, DeleteBehaviour::Never);
        assert!(log.contains(LogLevel::Warn, "\"Do not delete\""));
    }

    #[test]
    fn test_fallback_precedence() {
        let log = RecordingLog::new();
        let mut cfg = config();
        cfg.delete_working_directories_once = true;
        cfg.delete_working_directories_never = true;
        cfg.delete_working_directories_always = true;
        assert_eq!(resolve_delete(&cfg, log.as_ref()), DeleteBehaviour::Once);

        cfg.delete_working_directories_once = false;
        assert_eq!(resolve_delete(&cfg, log.as_ref()), DeleteBehaviour::Never);

        cfg.delete_working_directories_never = false;
        assert_eq!(resolve_delete(&cfg, log.as_ref()), DeleteBehaviour::Always);
    }

    #[test]
    fn test_keep_on_failure_requires_tool_support() {
        let log = RecordingLog::new();
        let mut cfg = config();
        cfg.keep_on_failure = true;

        let policy = DirectoryPolicy::resolve(&cfg, log.as_ref()).unwrap();
        assert!(!policy.keep_on_failure);
        assert!(log.contains(LogLevel::Warn, "deactivated"));

        cfg.delete_working_directories_keep_on_error_once = true;
        let policy = DirectoryPolicy::resolve(&cfg, log.as_ref()).unwrap();
        assert!(policy.keep_on_failure);
        assert!(policy.keep_base(false));
        assert!(!policy.keep_base(true));
    }

    #[test]
    fn test_per_run_policies_need_iteration_directories() {
        let log = RecordingLog::new();
        let mut cfg = config();
        cfg.copy_tool_behaviour = CopyToolBehaviour::Always;
        cfg.delete_working_directories_always = true;
        cfg.chosen_delete_temp_dir_behavior = Some(DeleteBehaviour::Always);
        cfg.use_iteration_directories = false;

        let err = DirectoryPolicy::resolve(&cfg, log.as_ref()).unwrap_err();
        assert_eq!(err.kind(), "ConfigurationError");

        cfg.use_iteration_directories = true;
        let policy = DirectoryPolicy::resolve(&cfg, log.as_ref()).unwrap();
        assert!(policy.delete_iteration_after_run());
    }

    #[test]
    fn test_never_keeps_base() {
        let policy = DirectoryPolicy {
            use_iteration_directories: false,
            copy_tool: CopyToolBehaviour::Never,
            delete: DeleteBehaviour::Never,
            keep_on_failure: false,
        };
        assert!(policy.keep_base(true));
        assert!(policy.keep_base(false));
    }
}
