//! Creation, population and disposal of working directories.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use ti_core::{
    ComponentLog, ConcurrencyGate, CopyToolBehaviour, Error, Result, ToolConfig, TypedValue,
};

use crate::cleanup::{remove_tree, DeferredCleanup};
use crate::fs::{copy_tree, remove_existing};
use crate::policy::DirectoryPolicy;
use crate::session::SandboxSession;

pub const WORKFLOW_INFO_FILE: &str = "workflow-info.txt";

/// Folder below the base directory keeping static outputs for replay.
pub const MEMO_DIR: &str = ".memo";

/// Manages the working directories of one job.
pub struct SandboxManager {
    policy: DirectoryPolicy,
    tool_name: String,
    source_tool_dir: PathBuf,
    root: Option<PathBuf>,
    gate: ConcurrencyGate,
    cleanup: Arc<DeferredCleanup>,
    log: Arc<dyn ComponentLog>,
    base: Option<PathBuf>,
    base_session: Option<SandboxSession>,
    tool_copy: Option<PathBuf>,
    iterations: u64,
}

impl SandboxManager {
    pub fn new(
        config: &ToolConfig,
        policy: DirectoryPolicy,
        gate: ConcurrencyGate,
        cleanup: Arc<DeferredCleanup>,
        log: Arc<dyn ComponentLog>,
    ) -> Self {
        Self {
            policy,
            tool_name: config.tool_name.clone(),
            source_tool_dir: config.tool_directory.clone(),
            root: config.root_working_directory.clone().filter(|r| !r.as_os_str().is_empty()),
            gate,
            cleanup,
            log,
            base: None,
            base_session: None,
            tool_copy: None,
            iterations: 0,
        }
    }

    pub fn policy(&self) -> &DirectoryPolicy {
        &self.policy
    }

    pub fn base_dir(&self) -> Option<&Path> {
        self.base.as_deref()
    }

    /// Create the base working directory and whatever lives directly in it.
    ///
    /// Without iteration directories the base is prepared as the only session.
    /// With copy behaviour "once" the tool is copied here. Calling this again
    /// returns the existing base.
    pub async fn create_base(&mut self, workflow_name: &str) -> Result<PathBuf> {
        if let Some(base) = &self.base {
            return Ok(base.clone());
        }
        let base = self.allocate_base().await?;
        self.base = Some(base.clone());

        let info_file = base.join(WORKFLOW_INFO_FILE);
        tokio::fs::write(&info_file, format!("Workflow name: {workflow_name}"))
            .await
            .map_err(|e| Error::sandbox_io("write", &info_file, e))?;

        self.tool_copy = match self.policy.copy_tool {
            CopyToolBehaviour::Once => Some(self.copy_tool(&base).await?),
            _ => None,
        };

        if !self.policy.use_iteration_directories {
            let tool = self.execution_tool_dir(None);
            let session = self.prepare(&base, &base, tool).await?;
            self.base_session = Some(session);
        }
        Ok(base)
    }

    async fn allocate_base(&self) -> Result<PathBuf> {
        match &self.root {
            Some(root) => {
                let base = root.join(format!("{}_{}", self.tool_name, Uuid::new_v4()));
                tokio::fs::create_dir_all(&base)
                    .await
                    .map_err(|e| Error::sandbox_io("create working directory", &base, e))?;
                Ok(base)
            }
            None => {
                let prefix = format!("{}-", self.tool_name);
                let dir = tempfile::Builder::new().prefix(&prefix).tempdir().map_err(|e| {
                    Error::sandbox_io("create working directory", &std::env::temp_dir(), e)
                })?;
                Ok(dir.keep())
            }
        }
    }

    /// Create `Input/`, `Output/` and `Config/` below `directory`.
    pub async fn prepare(
        &self,
        base: &Path,
        directory: &Path,
        tool: PathBuf,
    ) -> Result<SandboxSession> {
        let session = SandboxSession::layout(base, directory, tool);
        for dir in [&session.input, &session.output, &session.config] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| Error::sandbox_io("create directory", dir, e))?;
        }
        self.log
            .info(&format!("Created working directory: {}", directory.display()));
        Ok(session)
    }

    /// Session for the next run.
    ///
    /// With iteration directories a fresh numbered directory is created (and
    /// the tool copied into it for copy behaviour "always"); otherwise the base
    /// session is reused.
    pub async fn new_iteration_directory(&mut self) -> Result<SandboxSession> {
        let base = match &self.base {
            Some(base) => base.clone(),
            None => {
                return Err(Error::configuration(
                    "Working directory requested before the base directory was created",
                ))
            }
        };
        if !self.policy.use_iteration_directories {
            return match &self.base_session {
                Some(session) => Ok(session.clone()),
                None => Err(Error::configuration("Base working directory was not prepared")),
            };
        }

        let directory = base.join(self.iterations.to_string());
        self.iterations += 1;
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|e| Error::sandbox_io("create directory", &directory, e))?;

        let per_run_copy = match self.policy.copy_tool {
            CopyToolBehaviour::Always => Some(self.copy_tool(&directory).await?),
            _ => None,
        };
        let tool = self.execution_tool_dir(per_run_copy);
        self.prepare(&base, &directory, tool).await
    }

    fn execution_tool_dir(&self, per_run_copy: Option<PathBuf>) -> PathBuf {
        per_run_copy
            .or_else(|| self.tool_copy.clone())
            .unwrap_or_else(|| self.source_tool_dir.clone())
    }

    /// Copy the tool directory to `<target_dir>/<tool dir name>`.
    ///
    /// Waits for a copy permit of the shared gate first.
    pub async fn copy_tool(&self, target_dir: &Path) -> Result<PathBuf> {
        let name = self
            .source_tool_dir
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "tool".into());
        let target = target_dir.join(name);
        let source = self.source_tool_dir.clone();

        let _permit = self.gate.acquire_copy().await?;
        debug!("Copying tool {} to {}", source.display(), target.display());
        let destination = target.clone();
        let copied = tokio::task::spawn_blocking(move || copy_tree(&source, &destination, true))
            .await
            .map_err(|e| copy_task_failed("copy tool to", &target, e))??;

        info!("Copied {} files of tool {}", copied, self.tool_name);
        self.log.info(&format!(
            "Copied tool directory '{}' to working directory",
            self.source_tool_dir.display()
        ));
        Ok(target)
    }

    /// Copy file and directory inputs into `Input/<input name>/`.
    ///
    /// Returns the local path of every materialized input. Stale copies from a
    /// previous run are replaced.
    pub async fn materialize_inputs(
        &self,
        session: &SandboxSession,
        inputs: &BTreeMap<String, TypedValue>,
    ) -> Result<BTreeMap<String, PathBuf>> {
        let references: Vec<(String, TypedValue)> = inputs
            .iter()
            .filter(|(_, v)| v.data_type().is_reference())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if references.is_empty() {
            return Ok(BTreeMap::new());
        }
        let input_dir = session.input.clone();

        tokio::task::spawn_blocking(move || -> Result<BTreeMap<String, PathBuf>> {
            let mut local = BTreeMap::new();
            for (name, value) in references {
                let path = materialize(&input_dir, &name, &value)?;
                local.insert(name, path);
            }
            Ok(local)
        })
        .await
        .map_err(|e| copy_task_failed("copy inputs to", &session.input, e))?
    }

    /// Copy file and directory outputs to `<base>/.memo/<output name>/`.
    ///
    /// The copies survive per-iteration deletion and go away with the base.
    /// Other values, and references that already contain the memo folder, are
    /// returned unchanged.
    pub async fn preserve_outputs(
        &self,
        outputs: Vec<(String, TypedValue)>,
    ) -> Result<Vec<(String, TypedValue)>> {
        if !outputs.iter().any(|(_, v)| v.data_type().is_reference()) {
            return Ok(outputs);
        }
        let base = self
            .base
            .clone()
            .ok_or_else(|| Error::configuration("No working directory to keep outputs in"))?;
        let store = base.join(MEMO_DIR);
        let target = store.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<(String, TypedValue)>> {
            outputs
                .into_iter()
                .map(|(name, value)| {
                    let outside = matches!(
                        &value,
                        TypedValue::FileReference(path) | TypedValue::DirectoryReference(path)
                            if !store.starts_with(path)
                    );
                    if !outside {
                        return Ok((name, value));
                    }
                    remove_existing(&store.join(&name))?;
                    let copy = materialize(&store, &name, &value)?;
                    let kept = match value {
                        TypedValue::FileReference(_) => TypedValue::FileReference(copy),
                        _ => TypedValue::DirectoryReference(copy),
                    };
                    Ok((name, kept))
                })
                .collect()
        })
        .await
        .map_err(|e| copy_task_failed("keep outputs in", &target, e))?
    }

    /// Write `KEY=VALUE` lines into one file per config file name.
    pub async fn write_config_files(
        &self,
        session: &SandboxSession,
        files: &BTreeMap<String, Vec<(String, String)>>,
    ) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(files.len());
        for (filename, entries) in files {
            let path = session.config.join(filename);
            let mut content = String::new();
            for (key, value) in entries {
                content.push_str(key);
                content.push('=');
                content.push_str(value);
                content.push('\n');
            }
            tokio::fs::write(&path, content)
                .await
                .map_err(|e| Error::sandbox_io("write configuration file", &path, e))?;
            written.push(path);
        }
        Ok(written)
    }

    /// Delete the directory of a finished iteration. Failures are logged only.
    pub async fn delete_iteration(&self, session: &SandboxSession) {
        if !session.is_iteration() {
            return;
        }
        self.remove_best_effort(session.directory.clone()).await;
    }

    /// Delete the base directory unless `keep` is set.
    ///
    /// Failures are logged and the directory is handed to the deferred cleanup.
    pub async fn dispose(&mut self, keep: bool) {
        let Some(base) = self.base.take() else {
            return;
        };
        self.base_session = None;
        if keep {
            self.log
                .info(&format!("Kept working directory: {}", base.display()));
            return;
        }
        self.remove_best_effort(base).await;
    }

    async fn remove_best_effort(&self, path: PathBuf) {
        let target = path.clone();
        let result = match tokio::task::spawn_blocking(move || remove_tree(&target)).await {
            Ok(removed) => removed.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match result {
            Ok(()) => {
                self.log
                    .info(&format!("Deleted working directory: {}", path.display()));
            }
            Err(e) => {
                self.log.error(&format!(
                    "Failed to delete working directory: {}: {}",
                    path.display(),
                    e
                ));
                self.cleanup.schedule(&path);
            }
        }
    }
}

fn copy_task_failed(operation: &str, path: &Path, e: tokio::task::JoinError) -> Error {
    Error::sandbox_io(operation, path, std::io::Error::other(e.to_string()))
}

fn materialize(input_dir: &Path, name: &str, value: &TypedValue) -> Result<PathBuf> {
    let container = input_dir.join(name);
    match value {
        TypedValue::FileReference(source) => {
            let file_name = source.file_name().ok_or_else(|| {
                Error::endpoint(format!("Input '{name}' does not name a file: {}", source.display()))
            })?;
            let target = container.join(file_name);
            remove_existing(&target)?;
            std::fs::create_dir_all(&container)
                .map_err(|e| Error::sandbox_io("create directory", &container, e))?;
            std::fs::copy(source, &target).map_err(|e| {
                Error::sandbox_io(format!("copy input '{name}' to"), &target, e)
            })?;
            Ok(target)
        }
        TypedValue::DirectoryReference(source) => {
            let dir_name = source.file_name().map(|n| n.to_os_string()).unwrap_or_else(|| name.into());
            remove_existing(&container)?;
            let target = container.join(dir_name);
            copy_tree(source, &target, false)?;
            Ok(target)
        }
        other => Err(Error::endpoint(format!(
            "Input '{name}' of type {} is not a file or directory",
            other.data_type()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_copy_task_is_a_sandbox_error() {
        let join_error = tokio::spawn(async { panic!("copy worker died") })
            .await
            .unwrap_err();
        let err = copy_task_failed("copy tool to", Path::new("/work/tool"), join_error);
        assert_eq!(err.kind(), "SandboxIOError");
        assert!(err.to_string().contains("/work/tool"));
    }
}
