//! Native command execution with stream forwarding and cancellation.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ti_core::{ComponentLog, Error, OsFamily, Result, ToolConfig};
use ti_placeholder::SubstitutionContext;

/// A rendered command ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub script: String,
    pub working_dir: PathBuf,
    pub os: OsFamily,
}

/// How a command run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Exited(i32),
    /// Cancellation was observed before or while the command ran.
    Cancelled,
}

/// Runs rendered command text.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `request` until it exits or `cancel` fires.
    ///
    /// Tool output is forwarded line by line to `log`. Implementations must not
    /// spawn anything when `cancel` is already set.
    async fn execute(
        &self,
        request: &CommandRequest,
        log: Arc<dyn ComponentLog>,
        cancel: CancellationToken,
    ) -> Result<CommandOutcome>;
}

/// Pick the enabled command template for the host OS family.
pub fn select_command(config: &ToolConfig, os: OsFamily) -> Result<(&str, SubstitutionContext)> {
    let (enabled, template) = match os {
        OsFamily::Windows => (config.command_script_windows_enabled, &config.command_script_windows),
        OsFamily::Unix => (config.command_script_linux_enabled, &config.command_script_linux),
    };
    if !enabled {
        return Err(Error::configuration(format!(
            "No command(s) for operating system {os} defined"
        )));
    }
    Ok((template.as_str(), SubstitutionContext::for_os(os)))
}

/// Executes commands through `sh -c` or a temporary `.bat` file run by `cmd /c`.
///
/// On Unix the command gets its own process group so cancellation also stops
/// the processes it started.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalShellExecutor;

impl LocalShellExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for LocalShellExecutor {
    async fn execute(
        &self,
        request: &CommandRequest,
        log: Arc<dyn ComponentLog>,
        cancel: CancellationToken,
    ) -> Result<CommandOutcome> {
        if cancel.is_cancelled() {
            return Ok(CommandOutcome::Cancelled);
        }

        // Keeps the batch file alive until the command has finished.
        let (mut command, _batch_file) = shell_command(request)?;
        command
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| Error::process(format!("Failed to execute command(s): {e}")))?;
        // The pid doubles as the process group id and stays valid after `wait`.
        let group = child.id();
        debug!("Spawned command with pid {:?} in {}", group, request.working_dir.display());

        let stdout = spawn_watcher(child.stdout.take(), Arc::clone(&log), false);
        let stderr = spawn_watcher(child.stderr.take(), Arc::clone(&log), true);

        let status = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };

        let Some(status) = status else {
            kill_group(group);
            kill_child(&mut child).await;
            stop_watchers(stdout, stderr).await;
            return Ok(CommandOutcome::Cancelled);
        };
        let status =
            status.map_err(|e| Error::process(format!("Failed to wait for command(s): {e}")))?;

        // Background processes may keep the pipes open after the shell exited.
        let watchers = [stdout.abort_handle(), stderr.abort_handle()];
        let joined = tokio::select! {
            _ = async {
                join_watcher(stdout).await;
                join_watcher(stderr).await;
            } => true,
            _ = cancel.cancelled() => false,
        };
        if !joined {
            kill_group(group);
            for watcher in watchers {
                watcher.abort();
            }
            return Ok(CommandOutcome::Cancelled);
        }
        Ok(CommandOutcome::Exited(exit_code(status)))
    }
}

fn shell_command(request: &CommandRequest) -> Result<(Command, Option<tempfile::NamedTempFile>)> {
    match request.os {
        OsFamily::Unix => {
            let mut command = Command::new("sh");
            command.arg("-c").arg(&request.script);
            Ok((command, None))
        }
        OsFamily::Windows => {
            use std::io::Write;

            let mut batch = tempfile::Builder::new()
                .prefix("command-")
                .suffix(".bat")
                .tempfile()
                .map_err(|e| Error::process(format!("Failed to create batch file: {e}")))?;
            batch
                .write_all(request.script.as_bytes())
                .and_then(|_| batch.flush())
                .map_err(|e| Error::process(format!("Failed to write batch file: {e}")))?;
            let mut command = Command::new("cmd");
            command.arg("/c").arg(batch.path());
            Ok((command, Some(batch)))
        }
    }
}

fn spawn_watcher<R>(stream: Option<R>, log: Arc<dyn ComponentLog>, is_stderr: bool) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(stream) = stream else {
            return;
        };
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if is_stderr => log.tool_stderr(&line),
                Ok(Some(line)) => log.tool_stdout(&line),
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read tool output: {}", e);
                    break;
                }
            }
        }
    })
}

async fn join_watcher(handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        if !e.is_cancelled() {
            warn!("Output watcher failed: {}", e);
        }
    }
}

async fn stop_watchers(stdout: JoinHandle<()>, stderr: JoinHandle<()>) {
    stdout.abort();
    stderr.abort();
    join_watcher(stdout).await;
    join_watcher(stderr).await;
}

fn kill_group(group: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = group {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!("Failed to kill process group {}: {}", pid, e);
        }
    }
    #[cfg(not(unix))]
    let _ = group;
}

async fn kill_child(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!("Failed to kill command: {}", e);
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
