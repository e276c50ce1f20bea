//! Orchestration of a compliance run
//!
//! A run has four phases:
//! 1. Setup: configure the mirror provisioner, create mirrors, read endpoints
//! 2. Provision one cluster per mirror topology, a bounded number at a time
//! 3. Validate the management cluster and every provisioned cluster
//! 4. Tear down everything the session recorded
//!
//! A failure scoped to one cluster is reported against that cluster and the
//! other clusters carry on. Setup errors abort the run; teardown still runs
//! after them.

use std::fmt;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use mirrorguard_common::config::SuiteConfig;
use mirrorguard_common::types::RegistrySet;
use mirrorguard_common::{Error, Result, LOCAL_CLUSTER_ID};
use mirrorguard_compliance::{check_pod_status, check_registry_prefix, CheckKind};
use mirrorguard_platform::{
    CreatedResource, MirrorEndpoint, MirrorProvisioner, PlatformClient, Session, TeardownSummary,
};
use mirrorguard_provision::{ClusterProvisioner, ProvisionRequest, ProvisionedCluster};

use crate::report::{CheckReport, ClusterReport, SuiteReport, PROVISION_CHECK};

/// Name shown for a cluster whose provisioning failed
pub const NOT_PROVISIONED: &str = "<not provisioned>";

/// How a cluster reaches its registry mirror
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MirrorTopology {
    /// Platform-wide registry used by the management cluster
    Global,
    /// Anonymous mirror
    NoAuth,
    /// Mirror requiring credentials
    Auth,
}

impl MirrorTopology {
    pub fn label(self) -> &'static str {
        match self {
            MirrorTopology::Global => "global",
            MirrorTopology::NoAuth => "no-auth",
            MirrorTopology::Auth => "auth",
        }
    }
}

impl fmt::Display for MirrorTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A cluster to check and the registry it should pull from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationTarget {
    pub label: String,
    pub cluster_name: String,
    pub cluster_id: String,
    /// Skip the registry check when unset
    pub expected_host: Option<String>,
}

impl ValidationTarget {
    /// The management cluster, checked against the global registry if any
    pub fn local(expected_host: Option<String>) -> Self {
        Self {
            label: MirrorTopology::Global.label().to_string(),
            cluster_name: LOCAL_CLUSTER_ID.to_string(),
            cluster_id: LOCAL_CLUSTER_ID.to_string(),
            expected_host,
        }
    }

    fn provisioned(topology: MirrorTopology, cluster: &ProvisionedCluster, host: &str) -> Self {
        Self {
            label: topology.label().to_string(),
            cluster_name: cluster.name.clone(),
            cluster_id: cluster.id.clone(),
            expected_host: Some(host.to_string()),
        }
    }
}

/// Mirror endpoints read back after setup
#[derive(Debug)]
pub struct MirrorSetup {
    /// Host of the platform-wide registry; unset when the platform uses none
    pub global_host: Option<String>,
    pub no_auth: MirrorEndpoint,
    pub auth: MirrorEndpoint,
}

/// Provisioning outcome for one topology
#[derive(Debug)]
pub struct ClusterOutcome {
    pub topology: MirrorTopology,
    /// Registry the cluster was given as its default
    pub expected_host: String,
    pub result: Result<ProvisionedCluster>,
}

/// Everything validation needs, built once after provisioning
#[derive(Debug)]
pub struct SuiteContext {
    pub local: ValidationTarget,
    pub clusters: Vec<ClusterOutcome>,
}

/// Run both checks against one cluster, each on a fresh pod snapshot
///
/// Snapshot or check errors become `ERROR` lines; they never abort.
pub async fn check_target(
    platform: &dyn PlatformClient,
    target: &ValidationTarget,
) -> ClusterReport {
    let mut report = ClusterReport::new(&target.label, &target.cluster_name)
        .with_id(&target.cluster_id);
    let prefix_check = CheckKind::RegistryPrefix.to_string();

    match &target.expected_host {
        Some(host) => {
            let result = platform
                .list_pods(&target.cluster_id)
                .await
                .and_then(|pods| check_registry_prefix(&target.cluster_name, &pods, host));
            report.push(CheckReport::from_result(result, &prefix_check));
        }
        None => {
            info!(cluster = %target.cluster_name, "No registry configured; skipping prefix check");
            report.push(CheckReport::skipped(
                prefix_check,
                "no registry configured for this cluster",
            ));
        }
    }

    let result = platform
        .list_pods(&target.cluster_id)
        .await
        .and_then(|pods| check_pod_status(&target.cluster_name, &pods));
    report.push(CheckReport::from_result(
        result,
        &CheckKind::PodStatus.to_string(),
    ));
    report
}

/// Runs the suite end to end
pub struct Driver {
    platform: Arc<dyn PlatformClient>,
    mirrors: Arc<dyn MirrorProvisioner>,
    config: SuiteConfig,
    session: Arc<Session>,
    cancel: CancellationToken,
}

impl Driver {
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        mirrors: Arc<dyn MirrorProvisioner>,
        config: SuiteConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            platform,
            mirrors,
            config,
            session: Arc::new(Session::new()),
            cancel,
        }
    }

    /// Resources created so far and not yet torn down
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run every phase; teardown runs even when an earlier phase aborted
    pub async fn run(&self) -> Result<SuiteReport> {
        let outcome = self.execute().await;
        let teardown = self.teardown().await;

        let mut report = outcome?;
        report.teardown = teardown;
        report.log_summary();
        Ok(report)
    }

    async fn execute(&self) -> Result<SuiteReport> {
        let setup = self.setup().await?;
        let requests = self.provision_requests(&setup)?;
        let clusters = self.provision_all(requests).await;
        if self.cancel.is_cancelled() {
            return Err(Error::cancelled("suite run"));
        }

        let ctx = SuiteContext {
            local: ValidationTarget::local(setup.global_host),
            clusters,
        };
        Ok(self.validate(&ctx).await)
    }

    /// Prepare mirrors and read their endpoints
    pub async fn setup(&self) -> Result<MirrorSetup> {
        self.mirrors.configure(&self.config.corral).await?;

        let registries = &self.config.registries;
        if registries.use_existing_registries {
            info!("Using existing registry mirrors");
        } else {
            for name in &registries.registry_config_names {
                let package = self.config.corral.packages.get(name).ok_or_else(|| {
                    Error::config_for_field(
                        format!("corral.packages.{}", name),
                        format!("no package configured for mirror '{}'", name),
                    )
                })?;
                info!(mirror = %name, package = %package, "Creating registry mirror");
                if let Err(e) = self.mirrors.create_mirror(name, package).await {
                    error!(mirror = %name, error = %e, "Mirror creation failed; continuing");
                }
                // Recorded even when creation failed
                if self.config.corral.cleanup {
                    self.session.record(CreatedResource::Mirror { name: name.clone() });
                }
            }
        }

        let names = &registries.mirrors;
        let global_host = MirrorEndpoint::lookup_host(self.mirrors.as_ref(), &names.global).await?;
        let no_auth = MirrorEndpoint::lookup(self.mirrors.as_ref(), &names.no_auth).await?;
        let auth = MirrorEndpoint::lookup(self.mirrors.as_ref(), &names.auth).await?;
        info!(
            global = global_host.as_deref().unwrap_or("<none>"),
            no_auth = no_auth.host.as_deref().unwrap_or("<none>"),
            auth = auth.host.as_deref().unwrap_or("<none>"),
            "Registry mirrors resolved"
        );

        Ok(MirrorSetup {
            global_host,
            no_auth,
            auth,
        })
    }

    /// One request per provisioned topology, sharing provider, version and CNI
    fn provision_requests(
        &self,
        setup: &MirrorSetup,
    ) -> Result<Vec<(MirrorTopology, ProvisionRequest)>> {
        let p = &self.config.provisioning;
        let first = |values: &[String], field: &str| {
            values
                .first()
                .cloned()
                .ok_or_else(|| Error::config_for_field(field, "no value configured"))
        };
        let provider = p.providers.first().cloned().ok_or_else(|| {
            Error::config_for_field("provisioning.providers", "no provider configured")
        })?;
        let kubernetes_version = first(&p.kubernetes_versions, "provisioning.kubernetesVersions")?;
        let cni = first(&p.cnis, "provisioning.cnis")?;

        let no_auth = RegistrySet::single(setup.no_auth.anonymous_credential()?)?;
        let auth = RegistrySet::single(setup.auth.authenticated_credential()?)?;

        let request = |registries: RegistrySet| ProvisionRequest {
            provider: provider.clone(),
            node_roles: p.nodes_and_roles.clone(),
            kubernetes_version: kubernetes_version.clone(),
            cni: cni.clone(),
            registries,
        };
        Ok(vec![
            (MirrorTopology::NoAuth, request(no_auth)),
            (MirrorTopology::Auth, request(auth)),
        ])
    }

    /// Provision every request, at most `concurrency` at a time
    ///
    /// Outcomes come back in request order. One cluster failing does not
    /// stop the others. Requests still waiting for a slot when the run is
    /// cancelled end as `Cancelled` without touching the platform.
    pub async fn provision_all(
        &self,
        requests: Vec<(MirrorTopology, ProvisionRequest)>,
    ) -> Vec<ClusterOutcome> {
        let provisioner = Arc::new(ClusterProvisioner::new(
            Arc::clone(&self.platform),
            self.config.watch_timeout(),
            self.cancel.clone(),
        ));
        let pool = Arc::new(Semaphore::new(self.config.provisioning.concurrency));

        let mut handles: Vec<(MirrorTopology, String, JoinHandle<Result<ProvisionedCluster>>)> =
            Vec::with_capacity(requests.len());
        for (topology, request) in requests {
            let expected_host = request
                .registries
                .default_registry()
                .map(|r| r.host().to_string())
                .unwrap_or_default();
            let provisioner = Arc::clone(&provisioner);
            let session = Arc::clone(&self.session);
            let sem = Arc::clone(&pool);
            let cancel = self.cancel.clone();
            let handle = tokio::spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(Error::cancelled(format!("{} cluster", topology)));
                    }
                    permit = sem.acquire() => permit
                        .map_err(|e| Error::internal_with_context("driver", e.to_string()))?,
                };
                info!(topology = %topology, "Provisioning cluster");
                provisioner.provision(&request, &session).await
            });
            handles.push((topology, expected_host, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (topology, expected_host, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(Error::internal_with_context(
                    "driver",
                    format!("provisioning task for {} failed: {}", topology, e),
                )),
            };
            match &result {
                Ok(cluster) => info!(
                    topology = %topology,
                    cluster = %cluster.name,
                    id = %cluster.id,
                    "Cluster provisioned"
                ),
                Err(e) => error!(
                    topology = %topology,
                    kind = e.kind(),
                    goal_state_unknown = e.goal_state_unknown(),
                    error = %e,
                    "Provisioning failed"
                ),
            }
            outcomes.push(ClusterOutcome {
                topology,
                expected_host,
                result,
            });
        }
        outcomes
    }

    /// Check the management cluster and every provisioned cluster
    pub async fn validate(&self, ctx: &SuiteContext) -> SuiteReport {
        let platform = self.platform.as_ref();
        let mut clusters = vec![check_target(platform, &ctx.local).await];

        for outcome in &ctx.clusters {
            let report = match &outcome.result {
                Ok(cluster) => {
                    let target = ValidationTarget::provisioned(
                        outcome.topology,
                        cluster,
                        &outcome.expected_host,
                    );
                    let mut report = check_target(platform, &target).await;
                    report.checks.insert(
                        0,
                        CheckReport::passed(
                            PROVISION_CHECK,
                            format!("ready with {} node pools", cluster.node_pools.len()),
                        ),
                    );
                    report
                }
                Err(err) => {
                    let mut report = ClusterReport::new(outcome.topology.label(), NOT_PROVISIONED);
                    report.push(CheckReport::errored(PROVISION_CHECK, err));
                    report
                }
            };
            clusters.push(report);
        }
        SuiteReport::new(clusters)
    }

    /// Delete recorded resources unless cleanup is disabled
    pub async fn teardown(&self) -> Option<TeardownSummary> {
        if !self.config.cleanup_enabled() {
            info!(
                resources = self.session.len(),
                "Cleanup disabled; leaving created resources in place"
            );
            return None;
        }
        let summary = self
            .session
            .teardown(self.platform.as_ref(), self.mirrors.as_ref())
            .await;
        if !summary.is_clean() {
            warn!(
                failed = summary.failed.len(),
                "Teardown left resources behind"
            );
        }
        Some(summary)
    }
}
