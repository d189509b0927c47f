//! `ti validate`: construction checks without side effects.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use ti_core::{ConcurrencyGate, ToolConfig, TracingLog};
use ti_job::{Job, JobServices};

use crate::host::CliChannel;

#[derive(Args)]
pub struct ValidateArgs {
    /// Tool configuration (JSON)
    #[arg(long, short = 'c')]
    pub config: PathBuf,
}

impl ValidateArgs {
    /// Build the job without running it; nothing is created on disk.
    pub fn run(self) -> Result<()> {
        let config = ToolConfig::load(&self.config)?;
        let tool = config.display_name().to_string();
        let services = JobServices::local(
            ConcurrencyGate::default(),
            Arc::new(CliChannel::default()),
            Arc::new(TracingLog::new(tool.clone())),
        );
        let job = Job::new(config, services)
            .with_context(|| format!("Invalid configuration for tool {tool}"))?;

        println!("Configuration of tool {tool} is valid");
        println!("{:#?}", job.policy());
        Ok(())
    }
}
