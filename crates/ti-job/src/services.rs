//! Collaborators injected into every job.

use std::sync::Arc;

use ti_core::{ComponentLog, ConcurrencyGate, EndpointChannel, HistorySink, OsFamily};
use ti_runner::{CommandExecutor, LocalShellExecutor};
use ti_sandbox::DeferredCleanup;

use crate::approval::ApprovalGate;

/// Collaborators a job is built with.
///
/// `gate`, `approval` and `cleanup` are meant to be shared by every job of a
/// runtime; clone the services to hand them to the next job.
#[derive(Clone)]
pub struct JobServices {
    pub gate: ConcurrencyGate,
    pub executor: Arc<dyn CommandExecutor>,
    pub channel: Arc<dyn EndpointChannel>,
    pub log: Arc<dyn ComponentLog>,
    pub history: Option<Arc<dyn HistorySink>>,
    pub approval: ApprovalGate,
    pub cleanup: Arc<DeferredCleanup>,
    pub os: OsFamily,
}

impl JobServices {
    /// Services running commands on the local shell of the host OS.
    pub fn local(
        gate: ConcurrencyGate,
        channel: Arc<dyn EndpointChannel>,
        log: Arc<dyn ComponentLog>,
    ) -> Self {
        Self {
            gate,
            executor: Arc::new(LocalShellExecutor::new()),
            channel,
            log,
            history: None,
            approval: ApprovalGate::default(),
            cleanup: Arc::new(DeferredCleanup::new()),
            os: OsFamily::current(),
        }
    }

    pub fn with_history(mut self, history: Arc<dyn HistorySink>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_approval(mut self, approval: ApprovalGate) -> Self {
        self.approval = approval;
        self
    }
}
