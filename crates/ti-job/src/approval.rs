//! Output approval: verification key announcement and the approval handshake.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::debug;
use uuid::Uuid;

use ti_core::{ApprovalMailer, ComponentLog, Error, Result};

/// Base name of verification key files. Collisions get ` (N)` appended.
pub const VERIFICATION_FILE_NAME: &str = "verification-key";

/// Facts about the run shown next to the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenDetails {
    pub component: String,
    pub run_count: u64,
    pub working_directory: PathBuf,
    pub workflow: String,
}

/// A single-use key and the text announcing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationToken {
    pub key: String,
    pub content: String,
}

impl VerificationToken {
    pub fn generate(details: &TokenDetails) -> Self {
        let key = Uuid::new_v4().simple().to_string();
        let content = format!(
            "Verification key: {key}\n\
             \n\
             Component: {}\n\
             Run: {}\n\
             Working directory: {}\n\
             Workflow: {}\n\
             \n\
             Check the outputs in the working directory and approve or reject them using the verification key.\n",
            details.component,
            details.run_count,
            details.working_directory.display(),
            details.workflow,
        );
        Self { key, content }
    }
}

fn mail_body(component: &str, content: &str, file: &str) -> String {
    format!(
        "The outputs of the tool '{component}' are waiting for approval.\n\
         \n\
         {content}\n\
         Verification key file: {file}\n"
    )
}

/// Announces verification keys through a file and, optionally, by mail.
///
/// Clones share the lock that serializes picking a free file name.
#[derive(Clone)]
pub struct ApprovalGate {
    mailer: Option<Arc<dyn ApprovalMailer>>,
    file_lock: Arc<Mutex<()>>,
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ApprovalGate {
    pub fn new(mailer: Option<Arc<dyn ApprovalMailer>>) -> Self {
        Self {
            mailer,
            file_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Announce `token` in `location` and to `recipients`.
    ///
    /// Succeeds when at least one channel worked and returns the written file,
    /// if any.
    pub async fn announce(
        &self,
        token: &VerificationToken,
        location: &Path,
        recipients: &[String],
        component: &str,
        log: &dyn ComponentLog,
    ) -> Result<Option<PathBuf>> {
        let file = match self.write_token_file(location, &token.content).await {
            Ok(path) => {
                log.info("File with verification key created");
                Some(path)
            }
            Err(e) => {
                log.error(&format!("Failed to create file with verification key: {e}"));
                None
            }
        };

        let mut mailed = false;
        if !recipients.is_empty() {
            match &self.mailer {
                Some(mailer) => {
                    let subject = format!("Request for result approval for tool '{component}'");
                    let path = file
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "n/a".to_string());
                    let body = mail_body(component, &token.content, &path);
                    match mailer.send(recipients, &subject, &body).await {
                        Ok(()) => {
                            log.info("Email with verification key sent");
                            mailed = true;
                        }
                        Err(e) => {
                            log.error(&format!("Failed to send email with verification key: {e}"))
                        }
                    }
                }
                None => log.warn("No mail transport configured, verification key not sent by email"),
            }
        }

        if file.is_none() && !mailed {
            return Err(Error::approval_dispatch(
                "neither file was created nor an email was sent",
            ));
        }
        Ok(file)
    }

    async fn write_token_file(&self, location: &Path, content: &str) -> Result<PathBuf> {
        let _guard = self.file_lock.lock().await;
        tokio::fs::create_dir_all(location)
            .await
            .map_err(|e| Error::sandbox_io("create directory", location, e))?;

        let mut counter = 0u32;
        loop {
            let name = match counter {
                0 => VERIFICATION_FILE_NAME.to_string(),
                n => format!("{VERIFICATION_FILE_NAME} ({n})"),
            };
            let path = location.join(name);
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(content.as_bytes())
                        .await
                        .and(file.flush().await)
                        .map_err(|e| Error::sandbox_io("write verification key to", &path, e))?;
                    debug!("Verification key written to {}", path.display());
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => counter += 1,
                Err(e) => return Err(Error::sandbox_io("create verification key file", &path, e)),
            }
        }
    }
}

/// External verdict on the outputs of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve { key: String },
    Reject { key: String, reason: String },
}

impl ApprovalDecision {
    pub fn key(&self) -> &str {
        match self {
            Self::Approve { key } | Self::Reject { key, .. } => key,
        }
    }
}

/// Caller side of the approval handshake of one job.
#[derive(Debug, Clone)]
pub struct ApprovalHandle {
    decisions: mpsc::UnboundedSender<ApprovalDecision>,
    pending: watch::Receiver<Option<String>>,
}

impl ApprovalHandle {
    /// Key of the run currently waiting for approval.
    pub fn pending_key(&self) -> Option<String> {
        self.pending.borrow().clone()
    }

    /// Wait until a run asks for approval and return its key.
    pub async fn requested(&mut self) -> Option<String> {
        self.pending
            .wait_for(|key| key.is_some())
            .await
            .ok()
            .and_then(|key| (*key).clone())
    }

    /// Wait until no run is waiting under `key` any more.
    pub async fn settled(&mut self, key: &str) {
        let _ = self
            .pending
            .wait_for(|pending| pending.as_deref() != Some(key))
            .await;
    }

    pub fn approve(&self, key: &str) -> Result<()> {
        self.send(ApprovalDecision::Approve {
            key: key.to_string(),
        })
    }

    pub fn reject(&self, key: &str, reason: &str) -> Result<()> {
        self.send(ApprovalDecision::Reject {
            key: key.to_string(),
            reason: reason.to_string(),
        })
    }

    fn send(&self, decision: ApprovalDecision) -> Result<()> {
        self.decisions
            .send(decision)
            .map_err(|_| Error::endpoint("Job is no longer waiting for approval decisions"))
    }
}

/// Job side of the handshake.
pub(crate) struct ApprovalInbox {
    decisions: mpsc::UnboundedReceiver<ApprovalDecision>,
    pending: watch::Sender<Option<String>>,
    handle: ApprovalHandle,
}

impl ApprovalInbox {
    pub(crate) fn new() -> Self {
        let (tx, decisions) = mpsc::unbounded_channel();
        let (pending, rx) = watch::channel(None);
        Self {
            decisions,
            pending,
            handle: ApprovalHandle {
                decisions: tx,
                pending: rx,
            },
        }
    }

    pub(crate) fn handle(&self) -> ApprovalHandle {
        self.handle.clone()
    }

    pub(crate) fn set_pending(&self, key: Option<String>) {
        self.pending.send_replace(key);
    }

    /// Drop decisions that arrived while no run was waiting.
    pub(crate) fn drain(&mut self) {
        while let Ok(stale) = self.decisions.try_recv() {
            debug!("Discarding stale approval decision for key {}", stale.key());
        }
    }

    /// Next decision. The inbox keeps a sender, so this only ends with a decision.
    pub(crate) async fn next(&mut self) -> Option<ApprovalDecision> {
        self.decisions.recv().await
    }
}
