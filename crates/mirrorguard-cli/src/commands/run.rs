//! Run command - full compliance suite
//!
//! Creates the registry mirrors, provisions one cluster behind each, checks
//! the management cluster and both new clusters, then tears everything down.
//! Exits non-zero when any check failed or could not run.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mirrorguard_common::config::{SuiteConfig, CONFIG_ENV, USE_EXISTING_REGISTRIES_ENV};
use mirrorguard_platform::{CorralProvisioner, KubePlatformClient};

use crate::driver::Driver;
use crate::{Error, Result};

/// Run command arguments
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Suite config file
    #[arg(long, short = 'c', env = CONFIG_ENV)]
    pub config: PathBuf,

    /// Read endpoints of mirrors that already exist instead of creating them
    #[arg(long, env = USE_EXISTING_REGISTRIES_ENV)]
    pub use_existing_registries: bool,

    /// Clusters provisioned at once (overrides the config)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Leave created clusters, templates and mirrors in place
    #[arg(long)]
    pub no_cleanup: bool,

    /// Path to the corral binary
    #[arg(long, default_value = "corral")]
    pub corral: PathBuf,
}

/// Load the config with command-line overrides applied
pub fn load_config(args: &RunArgs) -> Result<SuiteConfig> {
    let mut config = SuiteConfig::load(&args.config)?;
    if args.use_existing_registries {
        config = config.with_use_existing_registries(true)?;
    }
    if let Some(concurrency) = args.concurrency {
        config = config.with_concurrency(concurrency)?;
    }
    if args.no_cleanup {
        config.platform.cleanup = false;
        config.corral.cleanup = false;
    }
    Ok(config)
}

pub async fn run(args: RunArgs) -> Result<()> {
    let config = load_config(&args)?;
    info!(
        config = %args.config.display(),
        use_existing_registries = config.registries.use_existing_registries,
        concurrency = config.provisioning.concurrency,
        cleanup = config.cleanup_enabled(),
        "Starting compliance run"
    );

    let platform = KubePlatformClient::connect(config.platform.kubeconfig.as_deref()).await?;
    let mirrors = CorralProvisioner::with_binary(&args.corral);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; cancelling outstanding waits");
            on_signal.cancel();
        }
    });

    let driver = Driver::new(Arc::new(platform), Arc::new(mirrors), config, cancel);
    let report = driver.run().await?;
    println!("{}", report);

    if report.passed() {
        Ok(())
    } else {
        Err(Error::suite_failed(report.failed_count()))
    }
}
