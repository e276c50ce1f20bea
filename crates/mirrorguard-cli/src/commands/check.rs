//! Check command - validate one existing cluster
//!
//! Runs the registry prefix and pod status checks against a cluster that is
//! already up, without provisioning anything.

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use mirrorguard_common::{Result as CoreResult, LOCAL_CLUSTER_ID};
use mirrorguard_platform::{KubePlatformClient, PlatformClient};

use crate::driver::{check_target, ValidationTarget};
use crate::report::SuiteReport;
use crate::{Error, Result};

/// Check command arguments
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Cluster display name, or "local" for the management cluster
    #[arg(long)]
    pub cluster: String,

    /// Registry host every image must come from
    #[arg(long)]
    pub registry_host: String,

    /// Kubeconfig for the management cluster (kube defaults when unset)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,
}

/// Resolve a display name (or "local") to a validation target
pub async fn resolve_target(
    platform: &dyn PlatformClient,
    cluster: &str,
    registry_host: &str,
) -> CoreResult<ValidationTarget> {
    let cluster_id = if cluster == LOCAL_CLUSTER_ID {
        LOCAL_CLUSTER_ID.to_string()
    } else {
        platform.get_cluster_id_by_name(cluster).await?
    };
    Ok(ValidationTarget {
        label: "check".to_string(),
        cluster_name: cluster.to_string(),
        cluster_id,
        expected_host: Some(registry_host.to_string()),
    })
}

pub async fn run(args: CheckArgs) -> Result<()> {
    let platform = KubePlatformClient::connect(args.kubeconfig.as_deref()).await?;
    let target = resolve_target(&platform, &args.cluster, &args.registry_host).await?;
    info!(cluster = %target.cluster_name, id = %target.cluster_id, "Checking cluster");

    let report = SuiteReport::new(vec![check_target(&platform, &target).await]);
    report.log_summary();
    println!("{}", report);

    if report.passed() {
        Ok(())
    } else {
        Err(Error::suite_failed(report.failed_count()))
    }
}
