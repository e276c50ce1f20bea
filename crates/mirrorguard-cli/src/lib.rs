//! mirrorguard CLI library

pub mod commands;
pub mod driver;
pub mod error;
pub mod report;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};
use mirrorguard_common::telemetry::LogFormat;

/// mirrorguard - Registry mirror compliance for provisioned clusters
#[derive(Parser, Debug)]
#[command(name = "mirrorguard")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log output format (pretty or json)
    #[arg(long, global = true, env = "MIRRORGUARD_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision clusters behind registry mirrors and check them
    Run(commands::run::RunArgs),
    /// Check an existing cluster against a registry host
    Check(commands::check::CheckArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Run(args) => commands::run::run(args).await,
            Commands::Check(args) => commands::check::run(args).await,
        }
    }
}
