//! `ti`: run an integrated tool from the command line.

pub mod host;
pub mod run;
pub mod validate;

// Re-export CLI types for testing
pub use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ti")]
#[command(about = "Run integrated command-line tools in private working directories")]
#[command(version, author, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a tool with the given inputs
    Run(run::RunArgs),
    /// Check a tool configuration without running anything
    Validate(validate::ValidateArgs),
}
