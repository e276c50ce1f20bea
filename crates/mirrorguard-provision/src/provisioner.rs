//! Cluster provisioning with private registries attached
//!
//! One provisioning attempt runs strictly in sequence:
//! 1. Generate a unique cluster name
//! 2. Submit the cluster with its registry list
//! 3. Create a node template, then one node pool per node group
//! 4. Watch the cluster until it reports Ready and Updated
//! 5. Verify name, node pools and service-account token
//!
//! Every created resource is recorded in the caller's session. Nothing is
//! rolled back here when a step fails. A cancelled provisioner submits nothing.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use mirrorguard_common::config::ProviderConfig;
use mirrorguard_common::types::{ClusterSpec, ClusterState, NodePool, NodeRoles, RegistrySet};
use mirrorguard_common::{Error, Result};
use mirrorguard_platform::{CreatedResource, PlatformClient, Session};

use crate::names::generate_cluster_name;
use crate::watch::ReadinessWatcher;

/// Inputs for one cluster
#[derive(Clone, Debug)]
pub struct ProvisionRequest {
    /// Infrastructure provider; its name prefixes the cluster name
    pub provider: ProviderConfig,
    /// Node groups, one node pool each
    pub node_roles: Vec<NodeRoles>,
    /// Kubernetes version
    pub kubernetes_version: String,
    /// Network plugin
    pub cni: String,
    /// Registries to attach (already validated)
    pub registries: RegistrySet,
}

/// A cluster that finished provisioning and passed its post-conditions
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionedCluster {
    /// Generated display name
    pub name: String,
    /// Platform id
    pub id: String,
    /// Node pools bound to the cluster
    pub node_pools: Vec<NodePool>,
}

/// Drives cluster creation on the platform
pub struct ClusterProvisioner {
    platform: Arc<dyn PlatformClient>,
    watch_timeout: Duration,
    cancel: CancellationToken,
}

impl ClusterProvisioner {
    /// Provisioner whose readiness waits are bounded by `watch_timeout`
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        watch_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            platform,
            watch_timeout,
            cancel,
        }
    }

    /// Provision one cluster and wait until it is ready
    ///
    /// Watch failures (`Timeout`, `ResourceWatch`, `Cancelled`) propagate
    /// unchanged. Post-condition failures are `PostCondition` errors.
    #[instrument(skip_all, fields(provider = %request.provider.name))]
    pub async fn provision(
        &self,
        request: &ProvisionRequest,
        session: &Session,
    ) -> Result<ProvisionedCluster> {
        if self.cancel.is_cancelled() {
            return Err(Error::cancelled(format!("{} cluster", request.provider.name)));
        }

        let name = generate_cluster_name(&request.provider.name);
        let spec = ClusterSpec {
            name: name.clone(),
            network_plugin: request.cni.clone(),
            kubernetes_version: request.kubernetes_version.clone(),
            node_roles: request.node_roles.clone(),
            registries: request.registries.clone(),
        };

        let submitted = self.platform.submit_cluster(&spec).await?;
        session.record(CreatedResource::Cluster {
            id: submitted.id.clone(),
            name: name.clone(),
        });
        info!(
            cluster = %name,
            id = %submitted.id,
            registries = spec.registries.len(),
            "Cluster submitted"
        );

        let template_id = self
            .platform
            .create_node_template(&request.provider)
            .await?;
        session.record(CreatedResource::NodeTemplate {
            id: template_id.clone(),
        });

        let mut node_pools = Vec::with_capacity(spec.node_roles.len());
        for (idx, roles) in spec.node_roles.iter().enumerate() {
            let hostname_prefix = format!("{}-pool{}-", name, idx);
            let pool = self
                .platform
                .create_node_pool(&submitted.id, &template_id, &hostname_prefix, roles)
                .await?;
            node_pools.push(pool);
        }

        let subscription = self.platform.watch_cluster(&submitted.id).await?;
        let watcher = ReadinessWatcher::new(self.watch_timeout, self.cancel.child_token());
        let ready = watcher
            .wait(subscription, ClusterState::is_provisioning_ready)
            .await?;
        info!(cluster = %name, id = %ready.id, "Cluster ready");

        self.verify(&name, &ready, &node_pools).await?;

        Ok(ProvisionedCluster {
            name,
            id: ready.id,
            node_pools,
        })
    }

    async fn verify(
        &self,
        name: &str,
        ready: &ClusterState,
        node_pools: &[NodePool],
    ) -> Result<()> {
        if ready.name != name {
            return Err(Error::post_condition(
                name,
                format!("platform reports display name '{}'", ready.name),
            ));
        }
        if let Some(idx) = node_pools.iter().position(|p| p.name.is_empty()) {
            return Err(Error::post_condition(
                name,
                format!("node pool {} has no name", idx),
            ));
        }

        let token = self.platform.get_service_account_token(&ready.id).await?;
        match token {
            Some(token) if !token.trim().is_empty() => Ok(()),
            _ => Err(Error::post_condition(
                name,
                "service account token secret is missing or empty",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::{self, StreamExt};
    use mirrorguard_common::types::{
        ClusterCondition, NodeRole, PodRecord, PrivateRegistryCredential,
    };
    use mirrorguard_platform::{ResourceEvent, Subscription};
    use mockall::mock;
    use mockall::predicate::eq;

    mock! {
        pub Platform {}

        #[async_trait::async_trait]
        impl PlatformClient for Platform {
            async fn submit_cluster(&self, spec: &ClusterSpec) -> Result<ClusterState>;
            async fn create_node_template(&self, provider: &ProviderConfig) -> Result<String>;
            async fn create_node_pool(
                &self,
                cluster_id: &str,
                node_template_id: &str,
                hostname_prefix: &str,
                roles: &NodeRoles,
            ) -> Result<NodePool>;
            async fn get_cluster(&self, cluster_id: &str) -> Result<ClusterState>;
            async fn get_cluster_id_by_name(&self, name: &str) -> Result<String>;
            async fn watch_cluster(&self, cluster_id: &str) -> Result<Subscription<ClusterState>>;
            async fn list_pods(&self, cluster_id: &str) -> Result<Vec<PodRecord>>;
            async fn get_service_account_token(&self, cluster_id: &str) -> Result<Option<String>>;
            async fn delete_cluster(&self, cluster_id: &str) -> Result<()>;
            async fn delete_node_template(&self, node_template_id: &str) -> Result<()>;
        }
    }

    const CLUSTER_ID: &str = "c-abc12";

    fn request() -> ProvisionRequest {
        ProvisionRequest {
            provider: ProviderConfig {
                name: "aws".to_string(),
                node_template: serde_json::Value::Null,
            },
            node_roles: vec![
                NodeRoles::new([NodeRole::ControlPlane, NodeRole::Etcd], 1).unwrap(),
                NodeRoles::new([NodeRole::Worker], 2).unwrap(),
            ],
            kubernetes_version: "v1.27.6-rancher1-1".to_string(),
            cni: "calico".to_string(),
            registries: RegistrySet::single(
                PrivateRegistryCredential::anonymous("noauth.registry.test", true).unwrap(),
            )
            .unwrap(),
        }
    }

    fn state(name: &str, ready: bool) -> ClusterState {
        let status = if ready { "True" } else { "False" };
        ClusterState {
            id: CLUSTER_ID.to_string(),
            name: name.to_string(),
            conditions: vec![
                ClusterCondition {
                    type_: "Ready".to_string(),
                    status: status.to_string(),
                    message: None,
                },
                ClusterCondition {
                    type_: "Updated".to_string(),
                    status: status.to_string(),
                    message: None,
                },
            ],
            service_account_token_secret: Some("token-secret".to_string()),
        }
    }

    /// Platform that accepts every call; `observed_name` overrides the name
    /// reported back while watching.
    fn happy_platform(
        observed_name: Option<&'static str>,
        token: Option<&'static str>,
    ) -> MockPlatform {
        let mut platform = MockPlatform::new();
        let submitted = std::sync::Arc::new(std::sync::Mutex::new(String::new()));

        let captured = submitted.clone();
        platform.expect_submit_cluster().times(1).returning(move |spec| {
            *captured.lock().unwrap() = spec.name.clone();
            Ok(state(&spec.name, false))
        });
        platform
            .expect_create_node_template()
            .times(1)
            .returning(|_| Ok("cattle-global-nt:nt-1".to_string()));
        platform
            .expect_create_node_pool()
            .with(
                eq(CLUSTER_ID),
                eq("cattle-global-nt:nt-1"),
                mockall::predicate::always(),
                mockall::predicate::always(),
            )
            .times(2)
            .returning(|cluster_id, _, prefix, _| {
                Ok(NodePool {
                    name: format!("np-{}", prefix.len()),
                    cluster_id: cluster_id.to_string(),
                })
            });

        let captured = submitted.clone();
        platform
            .expect_watch_cluster()
            .with(eq(CLUSTER_ID))
            .times(1)
            .returning(move |id| {
                let name = observed_name
                    .map(str::to_string)
                    .unwrap_or_else(|| captured.lock().unwrap().clone());
                let events = stream::iter(vec![
                    Ok(ResourceEvent::Added(state(&name, false))),
                    Ok(ResourceEvent::Modified(state(&name, true))),
                ])
                .chain(stream::pending())
                .boxed();
                Ok(Subscription::new(format!("cluster/{}", id), events))
            });
        platform
            .expect_get_service_account_token()
            .returning(move |_| Ok(token.map(str::to_string)));
        platform
    }

    fn provisioner(platform: MockPlatform) -> ClusterProvisioner {
        ClusterProvisioner::new(
            Arc::new(platform),
            Duration::from_secs(60),
            CancellationToken::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_provision_records_resources_and_returns_ready_cluster() {
        let session = Session::new();
        let cluster = provisioner(happy_platform(None, Some("kubeconfig-token")))
            .provision(&request(), &session)
            .await
            .unwrap();

        assert!(cluster.name.starts_with("aws-"));
        assert_eq!(cluster.id, CLUSTER_ID);
        assert_eq!(cluster.node_pools.len(), 2);

        let recorded = session.resources();
        assert_eq!(recorded.len(), 2);
        assert!(matches!(&recorded[0], CreatedResource::Cluster { id, .. } if id == CLUSTER_ID));
        assert!(matches!(&recorded[1], CreatedResource::NodeTemplate { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_registries_are_attached_to_submitted_spec() {
        let mut platform = MockPlatform::new();
        platform
            .expect_submit_cluster()
            .withf(|spec| {
                spec.registries.default_registry().map(|r| r.host())
                    == Some("noauth.registry.test")
                    && spec.network_plugin == "calico"
                    && spec.node_roles.len() == 2
            })
            .times(1)
            .returning(|_| Err(Error::platform("submit_cluster", "stop here")));

        let err = provisioner(platform)
            .provision(&request(), &Session::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "PlatformCallError");
    }

    #[tokio::test(start_paused = true)]
    async fn test_name_mismatch_is_post_condition_error() {
        let err = provisioner(happy_platform(Some("someone-else"), Some("t")))
            .provision(&request(), &Session::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PostCondition { .. }));
        assert!(err.to_string().contains("someone-else"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_token_is_post_condition_error() {
        let err = provisioner(happy_platform(None, None))
            .provision(&request(), &Session::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PostCondition { .. }));

        let err = provisioner(happy_platform(None, Some("  ")))
            .provision(&request(), &Session::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PostCondition { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_timeout_propagates_unchanged() {
        let mut platform = MockPlatform::new();
        platform
            .expect_submit_cluster()
            .returning(|spec| Ok(state(&spec.name, false)));
        platform
            .expect_create_node_template()
            .returning(|_| Ok("cattle-global-nt:nt-1".to_string()));
        platform.expect_create_node_pool().returning(|id, _, _, _| {
            Ok(NodePool {
                name: "np-1".to_string(),
                cluster_id: id.to_string(),
            })
        });
        platform.expect_watch_cluster().returning(|id| {
            Ok(Subscription::new(
                format!("cluster/{}", id),
                stream::pending().boxed(),
            ))
        });
        platform.expect_get_service_account_token().never();

        let session = Session::new();
        let err = provisioner(platform)
            .provision(&request(), &session)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(err.goal_state_unknown());
        // Created resources stay recorded for teardown
        assert_eq!(session.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_pool_failure_stops_before_watch() {
        let mut platform = MockPlatform::new();
        platform
            .expect_submit_cluster()
            .returning(|spec| Ok(state(&spec.name, false)));
        platform
            .expect_create_node_template()
            .returning(|_| Ok("cattle-global-nt:nt-1".to_string()));
        platform
            .expect_create_node_pool()
            .times(1)
            .returning(|_, _, _, _| Err(Error::platform("create_node_pool", "quota exceeded")));
        platform.expect_watch_cluster().never();

        let err = provisioner(platform)
            .provision(&request(), &Session::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_provisioning_creates_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut platform = MockPlatform::new();
        platform.expect_submit_cluster().never();
        platform.expect_create_node_template().never();
        platform.expect_create_node_pool().never();
        platform.expect_watch_cluster().never();

        let session = Session::new();
        let provisioner =
            ClusterProvisioner::new(Arc::new(platform), Duration::from_secs(60), cancel);
        let err = provisioner
            .provision(&request(), &session)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
        assert!(err.goal_state_unknown());
        assert!(session.is_empty());
    }
}
