//! The execution state machine of one integrated tool.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use ti_core::{
    ComponentLog, Error, HistoryRecord, JobState, Result, RunPhase, ToolConfig, TypedValue,
};
use ti_placeholder::{
    OutputBindings, PlaceholderEngine, RenderContext, SandboxDirs, SubstitutionContext,
};
use ti_runner::{
    output_slots, select_command, CommandExecutor, CommandOutcome, CommandRequest,
    PersistedScriptState, ScriptEnvironment, ScriptOutcome, ScriptRequest, ScriptRunner,
};
use ti_sandbox::{DirectoryPolicy, SandboxManager, SandboxSession};

use crate::approval::{
    ApprovalDecision, ApprovalGate, ApprovalHandle, ApprovalInbox, TokenDetails, VerificationToken,
};
use crate::history::HistoryRecorder;
use crate::memo::{self, CachedRunState};
use crate::services::JobServices;

/// Whether a phase lets the run go on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Cancelled,
}

/// Outcome of one [`Job::run`].
#[derive(Debug)]
pub struct JobReport {
    /// `Done`, `Failed` or `Cancelled`.
    pub state: JobState,
    /// Whether the tool run was skipped and the last outputs replayed.
    pub skipped: bool,
    pub exit_code: Option<i32>,
    pub working_directory: Option<PathBuf>,
    /// Outputs published by this run, in order.
    pub outputs: Vec<(String, TypedValue)>,
    pub error: Option<Error>,
}

impl JobReport {
    pub fn succeeded(&self) -> bool {
        self.state == JobState::Done
    }
}

/// Per-run data that outlives a failing phase so finalizing can report it.
#[derive(Default)]
struct RunRecord {
    session: Option<SandboxSession>,
    exit_code: Option<i32>,
    skipped: bool,
    outputs: Vec<(String, TypedValue)>,
    closed: Vec<String>,
}

/// Everything a template or script of one run can refer to.
struct Prepared {
    session: SandboxSession,
    inputs: BTreeMap<String, TypedValue>,
    local_paths: BTreeMap<String, PathBuf>,
    dirs: SandboxDirs,
    bindings: OutputBindings,
    /// Directory the command and scripts run in.
    working_dir: PathBuf,
}

/// One integrated tool, run once or once per workflow iteration.
///
/// Construction validates the configuration without touching the filesystem.
/// Each [`Job::run`] then walks
/// `PreparingSandbox → MaterializingInputs → WritingConfigFiles → DecidingRun →
/// {Running | Skipped} → ApprovalPending? → Finalizing` and ends in `Done`,
/// `Failed` or `Cancelled`. A failed or cancelled run ends the job; call
/// [`Job::finish`] after the last successful run.
pub struct Job {
    config: ToolConfig,
    policy: DirectoryPolicy,
    sandbox: SandboxManager,
    placeholders: PlaceholderEngine,
    scripts: ScriptRunner,
    executor: Arc<dyn CommandExecutor>,
    services: JobServices,
    history: HistoryRecorder,
    approval: ApprovalGate,
    inbox: ApprovalInbox,
    cancel: CancellationToken,
    memo: CachedRunState,
    script_state: PersistedScriptState,
    state: JobState,
    run_count: u64,
    closed: bool,
}

impl Job {
    /// Validate `config` and assemble the job.
    ///
    /// Fails with a configuration error for contradicting directory policies
    /// or when the host OS has no enabled command.
    pub fn new(config: ToolConfig, services: JobServices) -> Result<Self> {
        let log = Arc::clone(&services.log);
        let policy = DirectoryPolicy::resolve(&config, log.as_ref())?;
        if !config.mock_active() {
            select_command(&config, services.os)?;
        }
        let placeholders = PlaceholderEngine::new()?;
        let sandbox = SandboxManager::new(
            &config,
            policy,
            services.gate.clone(),
            Arc::clone(&services.cleanup),
            Arc::clone(&log),
        );
        let scripts = ScriptRunner::new(services.gate.clone(), Arc::clone(&log));
        let history = HistoryRecorder::new(services.history.clone(), config.store_data_item);

        Ok(Self {
            policy,
            sandbox,
            placeholders,
            scripts,
            executor: Arc::clone(&services.executor),
            history,
            approval: services.approval.clone(),
            inbox: ApprovalInbox::new(),
            cancel: CancellationToken::new(),
            memo: CachedRunState::new(),
            script_state: PersistedScriptState::new(),
            state: JobState::Init,
            run_count: 0,
            closed: false,
            services,
            config,
        })
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn run_count(&self) -> u64 {
        self.run_count
    }

    pub fn policy(&self) -> &DirectoryPolicy {
        &self.policy
    }

    /// Base working directory, once the first run created it.
    pub fn base_directory(&self) -> Option<&std::path::Path> {
        self.sandbox.base_dir()
    }

    /// Token that cancels the job. Cancelling cannot be undone.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Handle for delivering approval decisions.
    pub fn approval_handle(&self) -> ApprovalHandle {
        self.inbox.handle()
    }

    fn log(&self) -> &dyn ComponentLog {
        self.services.log.as_ref()
    }

    fn transition(&mut self, next: JobState) {
        debug!("{}: {} -> {}", self.config.display_name(), self.state, next);
        self.state = next;
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run the tool once with the inputs currently bound on the channel.
    pub async fn run(&mut self) -> JobReport {
        if self.closed {
            return JobReport {
                state: self.state,
                skipped: false,
                exit_code: None,
                working_directory: None,
                outputs: Vec::new(),
                error: Some(Error::configuration(format!(
                    "Job of tool {} has already finished",
                    self.config.display_name()
                ))),
            };
        }
        self.run_count += 1;
        let mut record = RunRecord::default();
        let outcome = self.execute(&mut record).await;
        self.finalize(outcome, record).await
    }

    async fn execute(&mut self, record: &mut RunRecord) -> Result<Flow> {
        self.transition(JobState::PreparingSandbox);
        if self.cancelled() {
            return Ok(Flow::Cancelled);
        }
        let workflow = self.config.workflow_name.clone();
        self.sandbox.create_base(&workflow).await?;
        let session = self.sandbox.new_iteration_directory().await?;
        record.session = Some(session.clone());
        if self.cancelled() {
            return Ok(Flow::Cancelled);
        }

        self.transition(JobState::MaterializingInputs);
        let inputs = self.services.channel.input_values()?;
        let local_paths = self.sandbox.materialize_inputs(&session, &inputs).await?;

        self.transition(JobState::WritingConfigFiles);
        let files = ti_core::ConfigReader::config_files(&self.config);
        self.sandbox.write_config_files(&session, &files).await?;

        self.transition(JobState::DecidingRun);
        let snapshot = {
            let decls = self.config.inputs.clone();
            let values = inputs.clone();
            tokio::task::spawn_blocking(move || memo::capture(&decls, &values))
                .await
                .map_err(|e| Error::endpoint(format!("static input comparison failed: {e}")))??
        };

        let working_dir = if self.config.set_tool_dir_as_working_dir {
            session.tool.clone()
        } else {
            session.directory.clone()
        };
        let prepared = Prepared {
            dirs: SandboxDirs {
                config: session.config.clone(),
                working: session.directory.clone(),
                input: session.input.clone(),
                tool: session.tool.clone(),
                output: session.output.clone(),
            },
            bindings: OutputBindings::new(&self.config.outputs),
            session,
            inputs,
            local_paths,
            working_dir,
        };

        if self.should_skip(&snapshot) {
            self.transition(JobState::Skipped);
            record.skipped = true;
            record.outputs = self.memo.outputs().to_vec();
        } else {
            self.memo.begin(snapshot);
            if self.run_tool(&prepared, record).await? == Flow::Cancelled {
                return Ok(Flow::Cancelled);
            }
            if self.config.requires_output_approval
                && self.await_approval(&prepared).await? == Flow::Cancelled
            {
                return Ok(Flow::Cancelled);
            }
        }

        self.publish(record).await?;
        if record.skipped {
            self.log().info(
                "Skipped tool execution as input(s) didn't change - output(s) from previous run sent",
            );
        }
        Ok(Flow::Continue)
    }

    fn should_skip(&self, snapshot: &memo::StaticInputs) -> bool {
        !self.config.always_run && !self.config.mock_active() && self.memo.is_unchanged(snapshot)
    }

    async fn run_tool(&mut self, prepared: &Prepared, record: &mut RunRecord) -> Result<Flow> {
        let none = BTreeMap::new();
        if self.config.mock_active() {
            let mock = self.config.mock_script.clone();
            return self
                .run_script(RunPhase::Imitation, &mock, prepared, &none, record)
                .await;
        }

        let pre = self.config.pre_script.clone();
        if self
            .run_script(RunPhase::PreScript, &pre, prepared, &none, record)
            .await?
            == Flow::Cancelled
        {
            return Ok(Flow::Cancelled);
        }

        let code = match self.run_command(prepared).await? {
            CommandOutcome::Exited(code) => code,
            CommandOutcome::Cancelled => return Ok(Flow::Cancelled),
        };
        record.exit_code = Some(code);
        if self.cancelled() {
            return Ok(Flow::Cancelled);
        }
        if code != 0 && !self.config.dont_crash_on_non_zero_exit_codes {
            return Err(Error::exit_code(code));
        }

        let mut additional = BTreeMap::new();
        additional.insert("exitCode".to_string(), code.to_string());
        let post = self.config.post_script.clone();
        self.run_script(RunPhase::PostScript, &post, prepared, &additional, record)
            .await
    }

    async fn run_command(&mut self, prepared: &Prepared) -> Result<CommandOutcome> {
        if self.cancelled() {
            return Ok(CommandOutcome::Cancelled);
        }
        self.transition(JobState::Running(RunPhase::Command));
        let os = self.services.os;
        let (template, context) = select_command(&self.config, os)?;
        let script = self.render(template, prepared, &BTreeMap::new(), context)?;

        let request = CommandRequest {
            script,
            working_dir: prepared.working_dir.clone(),
            os,
        };
        self.log().info("Executing command(s)...");
        let outcome = self
            .executor
            .execute(&request, Arc::clone(&self.services.log), self.cancel.clone())
            .await?;
        if let CommandOutcome::Exited(code) = outcome {
            self.log()
                .info(&format!("Command(s) executed - exit code: {code}"));
        }
        Ok(outcome)
    }

    async fn run_script(
        &mut self,
        phase: RunPhase,
        template: &str,
        prepared: &Prepared,
        additional: &BTreeMap<String, String>,
        record: &mut RunRecord,
    ) -> Result<Flow> {
        if self.cancelled() {
            return Ok(Flow::Cancelled);
        }
        self.transition(JobState::Running(phase));
        if template.trim().is_empty() {
            return Ok(Flow::Continue);
        }
        let source = self.render(template, prepared, additional, SubstitutionContext::Script)?;

        let request = ScriptRequest {
            phase,
            source,
            environment: ScriptEnvironment {
                working_dir: prepared.working_dir.clone(),
                input_dir: prepared.session.input.clone(),
                output_dir: prepared.session.output.clone(),
                config_dir: prepared.session.config.clone(),
                tool_dir: prepared.session.tool.clone(),
                inputs: prepared.inputs.clone(),
                local_paths: prepared.local_paths.clone(),
                execution_count: self.run_count,
            },
            outputs: output_slots(&prepared.bindings, &self.config.outputs),
        };
        match self
            .scripts
            .run(request, self.script_state.clone(), self.cancel.clone())
            .await?
        {
            ScriptOutcome::Completed(result) => {
                self.script_state = result.state;
                record.outputs.extend(result.outputs);
                record.closed.extend(result.closed);
                Ok(Flow::Continue)
            }
            ScriptOutcome::Cancelled => Ok(Flow::Cancelled),
        }
    }

    fn render(
        &self,
        template: &str,
        prepared: &Prepared,
        additional: &BTreeMap<String, String>,
        target: SubstitutionContext,
    ) -> Result<String> {
        let ctx = RenderContext {
            inputs: &prepared.inputs,
            local_paths: &prepared.local_paths,
            config: &self.config,
            dirs: &prepared.dirs,
            outputs: &prepared.bindings,
            additional,
        };
        self.placeholders.render(template, &ctx, target)
    }

    async fn await_approval(&mut self, prepared: &Prepared) -> Result<Flow> {
        if self.cancelled() {
            return Ok(Flow::Cancelled);
        }
        self.transition(JobState::ApprovalPending);
        let token = VerificationToken::generate(&TokenDetails {
            component: self.config.display_name().to_string(),
            run_count: self.run_count,
            working_directory: prepared.session.directory.clone(),
            workflow: self.config.workflow_name.clone(),
        });
        let location = self
            .config
            .verification_token_location
            .clone()
            .filter(|l| !l.as_os_str().is_empty())
            .unwrap_or_else(|| prepared.session.directory.clone());
        self.approval
            .announce(
                &token,
                &location,
                &self.config.approval_recipients(),
                self.config.display_name(),
                self.services.log.as_ref(),
            )
            .await?;

        self.inbox.drain();
        self.inbox.set_pending(Some(token.key.clone()));
        self.log().info("Waiting for approval...");
        let verdict = self.wait_for_decision(&token.key).await;
        self.inbox.set_pending(None);
        verdict
    }

    async fn wait_for_decision(&mut self, key: &str) -> Result<Flow> {
        loop {
            let decision = tokio::select! {
                decision = self.inbox.next() => decision,
                _ = self.cancel.cancelled() => return Ok(Flow::Cancelled),
            };
            match decision {
                Some(ApprovalDecision::Approve { key: k }) if k == key => {
                    self.services.log.info("Outputs approved");
                    return Ok(Flow::Continue);
                }
                Some(ApprovalDecision::Reject { key: k, reason }) if k == key => {
                    return Err(Error::ApprovalRejected { message: reason });
                }
                Some(other) => self.services.log.warn(&format!(
                    "Ignoring approval decision for unknown verification key '{}'",
                    other.key()
                )),
                None => return Err(Error::endpoint("Approval channel closed")),
            }
        }
    }

    /// Hand the outputs of the run to the channel and remember static ones.
    ///
    /// Static file and directory outputs are remembered as copies that outlive
    /// the iteration directory, so a skipped run replays existing paths.
    async fn publish(&mut self, record: &RunRecord) -> Result<()> {
        for (name, value) in &record.outputs {
            self.services.channel.write_output(name, value.clone())?;
        }
        for name in &record.closed {
            self.services.channel.close_output(name)?;
        }
        if record.skipped {
            return Ok(());
        }
        let statics: Vec<(String, TypedValue)> = record
            .outputs
            .iter()
            .filter(|(name, _)| self.config.output(name).is_some_and(|o| o.is_static))
            .cloned()
            .collect();
        for (name, value) in self.sandbox.preserve_outputs(statics).await? {
            self.memo.record_output(&self.config.outputs, &name, &value);
        }
        self.memo.complete();
        Ok(())
    }

    async fn finalize(&mut self, outcome: Result<Flow>, record: RunRecord) -> JobReport {
        let phase = self.state;
        self.transition(JobState::Finalizing);
        let (state, error) = match outcome {
            Ok(Flow::Continue) => (JobState::Done, None),
            Ok(Flow::Cancelled) => (JobState::Cancelled, None),
            Err(e) => (JobState::Failed, Some(e)),
        };
        match (&state, &error) {
            (_, Some(e)) => self.log().error(&format!(
                "{} failed in phase {}: {} ({})",
                self.config.display_name(),
                phase,
                e,
                e.kind()
            )),
            (JobState::Cancelled, None) => self.log().info(&format!(
                "{} cancelled in phase {}",
                self.config.display_name(),
                phase
            )),
            _ => {}
        }

        let working_directory = record.session.as_ref().map(|s| s.directory.clone());
        let history = HistoryRecord {
            component: self.config.display_name().to_string(),
            working_directory: working_directory.clone().unwrap_or_default(),
            exit_code: record.exit_code,
            state,
            run_count: self.run_count,
            error_kind: error.as_ref().map(|e| e.kind().to_string()),
            error_message: error.as_ref().map(|e| e.to_string()),
            log_references: self.services.log.log_references(),
            finished_at: chrono::Utc::now(),
        };
        self.history.record(&history, self.services.log.as_ref());

        if state == JobState::Done {
            if let Some(session) = &record.session {
                if self.policy.delete_iteration_after_run() {
                    self.sandbox.delete_iteration(session).await;
                }
            }
        } else {
            self.memo.invalidate();
            let keep = self.policy.keep_base(false);
            self.sandbox.dispose(keep).await;
            self.closed = true;
        }

        self.transition(state);
        info!(
            "{} run {} finished: {}",
            self.config.display_name(),
            self.run_count,
            state
        );
        JobReport {
            state,
            skipped: record.skipped,
            exit_code: record.exit_code,
            working_directory,
            outputs: if state == JobState::Done {
                record.outputs
            } else {
                Vec::new()
            },
            error,
        }
    }

    /// End the job after its last run and dispose of its directories.
    pub async fn finish(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let keep = self.policy.keep_base(true);
        self.sandbox.dispose(keep).await;
    }
}
