//! `ti run`: run a tool and print one report per run.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use ti_core::{ConcurrencyGate, ToolConfig, TracingLog};
use ti_job::{ApprovalHandle, Job, JobReport, JobServices};
use tracing::{info, warn};

use crate::host::{parse_inputs, CliChannel, JsonLinesHistory};

#[derive(Args)]
pub struct RunArgs {
    /// Tool configuration (JSON)
    #[arg(long, short = 'c')]
    pub config: PathBuf,

    /// Input value, NAME=VALUE (repeatable)
    #[arg(long = "input", short = 'i', value_name = "NAME=VALUE")]
    pub inputs: Vec<String>,

    /// Number of runs of the same job
    #[arg(long, default_value_t = 1)]
    pub runs: u32,

    /// Append a history record per run to this JSON-lines file
    #[arg(long)]
    pub history: Option<PathBuf>,

    /// Approve outputs without asking
    #[arg(long)]
    pub auto_approve: bool,
}

impl RunArgs {
    pub async fn run(self) -> Result<()> {
        let config = ToolConfig::load(&self.config)?;
        let inputs = parse_inputs(&config, &self.inputs)?;
        let tool = config.display_name().to_string();

        let channel = Arc::new(CliChannel::new(inputs));
        let mut services = JobServices::local(
            ConcurrencyGate::default(),
            channel.clone(),
            Arc::new(TracingLog::new(tool.clone())),
        );
        if let Some(path) = &self.history {
            services = services.with_history(Arc::new(JsonLinesHistory::new(path.clone())));
        }

        let mut job = Job::new(config, services)
            .with_context(|| format!("Invalid configuration for tool {tool}"))?;

        let cancel = job.cancel_handle();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling run");
                cancel.cancel();
            }
        });
        let approver = tokio::spawn(answer_approvals(job.approval_handle(), self.auto_approve));

        let mut outcome = Ok(());
        for run in 1..=self.runs {
            let report = job.run().await;
            print_report(run, &report, channel.take_published())?;
            if let Some(err) = report.error {
                outcome = Err(anyhow::Error::new(err))
                    .with_context(|| format!("Run {run} of tool {tool} failed"));
                break;
            }
            if !report.succeeded() {
                outcome = Err(anyhow::anyhow!("Run {run} of tool {tool} was cancelled"));
                break;
            }
        }

        job.finish().await;
        approver.abort();
        interrupt.abort();
        outcome
    }
}

fn print_report(
    run: u32,
    report: &JobReport,
    published: Vec<(String, ti_core::TypedValue)>,
) -> Result<()> {
    let outputs: BTreeMap<_, _> = published.into_iter().collect();
    let document = serde_json::json!({
        "run": run,
        "state": report.state,
        "skipped": report.skipped,
        "exitCode": report.exit_code,
        "workingDirectory": report.working_directory,
        "outputs": outputs,
        "error": report.error.as_ref().map(|e| serde_json::json!({
            "kind": e.kind(),
            "message": e.to_string(),
        })),
    });
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

/// Answer every approval request, either automatically or from stdin.
async fn answer_approvals(mut approvals: ApprovalHandle, auto_approve: bool) {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    while let Some(key) = approvals.requested().await {
        let decision = if auto_approve {
            info!("Approving outputs automatically");
            approvals.approve(&key)
        } else {
            eprintln!("Outputs are waiting for approval (verification key {key})");
            eprint!("Approve? [y/N] ");
            let answer = match stdin.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) | Err(_) => String::new(),
            };
            if matches!(answer.trim(), "y" | "Y" | "yes") {
                approvals.approve(&key)
            } else {
                approvals.reject(&key, "rejected on the command line")
            }
        };
        if let Err(e) = decision {
            warn!("Approval decision was not delivered: {}", e);
        }
        approvals.settled(&key).await;
    }
}
