//! mirrorguard CLI
//!
//! Provisions clusters behind private registry mirrors and checks that every
//! image they run came through the mirror.

use clap::Parser;

use mirrorguard_cli::{Cli, Result};
use mirrorguard_common::telemetry::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format)?;
    cli.run().await
}
