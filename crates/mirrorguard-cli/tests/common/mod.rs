//! In-memory platform and mirror provisioner for suite tests

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use mirrorguard_common::config::{CorralConfig, ProviderConfig, SuiteConfig};
use mirrorguard_common::types::{
    ClusterCondition, ClusterSpec, ClusterState, ContainerRecord, NodePool, NodeRoles, PodPhase,
    PodRecord,
};
use mirrorguard_common::{Error, Result, LOCAL_CLUSTER_ID};
use mirrorguard_platform::mirror::{
    REGISTRY_FQDN_VAR, REGISTRY_PASSWORD_VAR, REGISTRY_USERNAME_VAR,
};
use mirrorguard_platform::{MirrorProvisioner, PlatformClient, ResourceEvent, Subscription};

pub const GLOBAL_HOST: &str = "global.registry.test";
pub const NO_AUTH_HOST: &str = "noauth.registry.test";
pub const AUTH_HOST: &str = "auth.registry.test";

pub const SUITE_CONFIG: &str = r#"
registries:
  registryConfigNames: [registryauthdisabled, registryauthenabled]
corral:
  packages:
    registryauthdisabled: dist/registry-noauth
    registryauthenabled: dist/registry-auth
provisioning:
  kubernetesVersions: ["v1.27.6-rancher1-1"]
  cnis: [calico]
  nodesAndRoles:
    - controlPlane: true
      etcd: true
      worker: false
      quantity: 1
    - worker: true
      quantity: 2
  providers:
    - name: aws
      nodeTemplate:
        amazonec2Config:
          region: us-west-2
  watchTimeoutSeconds: 60
  concurrency: 2
"#;

pub fn suite_config() -> SuiteConfig {
    SuiteConfig::from_yaml(SUITE_CONFIG).unwrap()
}

fn ready_state(id: &str, name: &str) -> ClusterState {
    ClusterState {
        id: id.to_string(),
        name: name.to_string(),
        conditions: vec![
            ClusterCondition {
                type_: "Ready".to_string(),
                status: "True".to_string(),
                message: None,
            },
            ClusterCondition {
                type_: "Updated".to_string(),
                status: "True".to_string(),
                message: None,
            },
        ],
        service_account_token_secret: Some(format!("{}-token", id)),
    }
}

fn pods_from(host: &str) -> Vec<PodRecord> {
    ["coredns", "calico-node", "metrics-server"]
        .iter()
        .map(|name| PodRecord {
            name: format!("{}-abc12", name),
            namespace: "kube-system".to_string(),
            containers: vec![ContainerRecord {
                name: name.to_string(),
                image_reference: format!("{}/rancher/{}:v1", host, name),
            }],
            phase: PodPhase::Running,
            container_statuses: vec![],
        })
        .collect()
}

#[derive(Default)]
struct PlatformState {
    clusters: BTreeMap<String, ClusterSpec>,
    templates: BTreeSet<String>,
    pools: Vec<(String, String)>,
    deleted_clusters: Vec<String>,
    deleted_templates: Vec<String>,
    list_pods_calls: Vec<String>,
}

/// Platform whose clusters become ready immediately and run images from
/// their default registry
#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<PlatformState>,
    local_host: Option<String>,
    foreign_image_host: Option<String>,
    deleted_during_watch: Option<String>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            local_host: Some(GLOBAL_HOST.to_string()),
            ..Self::default()
        }
    }

    /// Images on `local` come from this host instead of the global registry
    pub fn with_local_images_from(mut self, host: &str) -> Self {
        self.local_host = Some(host.to_string());
        self
    }

    /// Clusters whose default registry is `host` also run a docker.io image
    pub fn with_foreign_image_for(mut self, host: &str) -> Self {
        self.foreign_image_host = Some(host.to_string());
        self
    }

    /// Clusters whose default registry is `host` are deleted mid-watch
    pub fn with_deleted_during_watch(mut self, host: &str) -> Self {
        self.deleted_during_watch = Some(host.to_string());
        self
    }

    pub fn submitted(&self) -> Vec<ClusterSpec> {
        self.state.lock().unwrap().clusters.values().cloned().collect()
    }

    pub fn pool_count(&self) -> usize {
        self.state.lock().unwrap().pools.len()
    }

    pub fn deleted_clusters(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_clusters.clone()
    }

    pub fn deleted_templates(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_templates.clone()
    }

    pub fn list_pods_calls(&self, cluster_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .list_pods_calls
            .iter()
            .filter(|id| id.as_str() == cluster_id)
            .count()
    }

    fn default_host(&self, cluster_id: &str) -> Result<String> {
        let state = self.state.lock().unwrap();
        let spec = state
            .clusters
            .get(cluster_id)
            .ok_or_else(|| Error::platform("fake", format!("no cluster {}", cluster_id)))?;
        Ok(spec
            .registries
            .default_registry()
            .map(|r| r.host().to_string())
            .unwrap_or_default())
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn submit_cluster(&self, spec: &ClusterSpec) -> Result<ClusterState> {
        let mut state = self.state.lock().unwrap();
        let id = format!("c-{}", state.clusters.len() + 1);
        state.clusters.insert(id.clone(), spec.clone());
        Ok(ClusterState {
            id,
            name: spec.name.clone(),
            conditions: vec![],
            service_account_token_secret: None,
        })
    }

    async fn create_node_template(&self, _provider: &ProviderConfig) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let id = format!("cattle-global-nt:nt-{}", state.templates.len() + 1);
        state.templates.insert(id.clone());
        Ok(id)
    }

    async fn create_node_pool(
        &self,
        cluster_id: &str,
        _node_template_id: &str,
        hostname_prefix: &str,
        _roles: &NodeRoles,
    ) -> Result<NodePool> {
        let mut state = self.state.lock().unwrap();
        let name = format!("np-{}", state.pools.len() + 1);
        state
            .pools
            .push((cluster_id.to_string(), hostname_prefix.to_string()));
        Ok(NodePool {
            name,
            cluster_id: cluster_id.to_string(),
        })
    }

    async fn get_cluster(&self, cluster_id: &str) -> Result<ClusterState> {
        let state = self.state.lock().unwrap();
        let spec = state
            .clusters
            .get(cluster_id)
            .ok_or_else(|| Error::platform("get_cluster", format!("no cluster {}", cluster_id)))?;
        Ok(ready_state(cluster_id, &spec.name))
    }

    async fn get_cluster_id_by_name(&self, name: &str) -> Result<String> {
        let state = self.state.lock().unwrap();
        state
            .clusters
            .iter()
            .find(|(id, spec)| spec.name == name || id.as_str() == name)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| {
                Error::platform("get_cluster_id_by_name", format!("no cluster {}", name))
            })
    }

    async fn watch_cluster(&self, cluster_id: &str) -> Result<Subscription<ClusterState>> {
        let host = self.default_host(cluster_id)?;
        let name = self.state.lock().unwrap().clusters[cluster_id].name.clone();
        let provisioning = ClusterState {
            id: cluster_id.to_string(),
            name: name.clone(),
            conditions: vec![],
            service_account_token_secret: None,
        };

        let last = if self.deleted_during_watch.as_deref() == Some(host.as_str()) {
            ResourceEvent::Deleted(provisioning.clone())
        } else {
            ResourceEvent::Modified(ready_state(cluster_id, &name))
        };
        let events = stream::iter(vec![Ok(ResourceEvent::Added(provisioning)), Ok(last)])
            .chain(stream::pending());
        Ok(Subscription::new(format!("cluster/{}", cluster_id), events.boxed()))
    }

    async fn list_pods(&self, cluster_id: &str) -> Result<Vec<PodRecord>> {
        self.state
            .lock()
            .unwrap()
            .list_pods_calls
            .push(cluster_id.to_string());

        if cluster_id == LOCAL_CLUSTER_ID {
            return Ok(self.local_host.as_deref().map(pods_from).unwrap_or_default());
        }
        let host = self.default_host(cluster_id)?;
        let mut pods = pods_from(&host);
        if self.foreign_image_host.as_deref() == Some(host.as_str()) {
            pods[1].containers.push(ContainerRecord {
                name: "sidecar".to_string(),
                image_reference: "docker.io/library/busybox:1.36".to_string(),
            });
        }
        Ok(pods)
    }

    async fn get_service_account_token(&self, cluster_id: &str) -> Result<Option<String>> {
        Ok(Some(format!("token-{}", cluster_id)))
    }

    async fn delete_cluster(&self, cluster_id: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .deleted_clusters
            .push(cluster_id.to_string());
        Ok(())
    }

    async fn delete_node_template(&self, node_template_id: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .deleted_templates
            .push(node_template_id.to_string());
        Ok(())
    }
}

/// Mirror provisioner backed by a variable map
pub struct FakeMirrors {
    vars: Mutex<BTreeMap<(String, String), String>>,
    failing_creates: BTreeSet<String>,
    pub configured: Mutex<usize>,
    pub created: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
}

impl FakeMirrors {
    /// Global, anonymous and authenticated mirrors with hosts and credentials set
    pub fn new() -> Self {
        let mirrors = Self::empty();
        mirrors.set("rancherha", REGISTRY_FQDN_VAR, GLOBAL_HOST);
        mirrors.set("registryauthdisabled", REGISTRY_FQDN_VAR, NO_AUTH_HOST);
        mirrors.set("registryauthenabled", REGISTRY_FQDN_VAR, AUTH_HOST);
        mirrors.set("registryauthenabled", REGISTRY_USERNAME_VAR, "corral");
        mirrors.set("registryauthenabled", REGISTRY_PASSWORD_VAR, "s3cret");
        mirrors
    }

    pub fn empty() -> Self {
        Self {
            vars: Mutex::new(BTreeMap::new()),
            failing_creates: BTreeSet::new(),
            configured: Mutex::new(0),
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, mirror: &str, key: &str, value: &str) {
        self.vars
            .lock()
            .unwrap()
            .insert((mirror.to_string(), key.to_string()), value.to_string());
    }

    pub fn unset(&self, mirror: &str, key: &str) {
        self.vars
            .lock()
            .unwrap()
            .remove(&(mirror.to_string(), key.to_string()));
    }

    pub fn with_failing_create(mut self, mirror: &str) -> Self {
        self.failing_creates.insert(mirror.to_string());
        self
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl MirrorProvisioner for FakeMirrors {
    async fn configure(&self, _config: &CorralConfig) -> Result<()> {
        *self.configured.lock().unwrap() += 1;
        Ok(())
    }

    async fn create_mirror(&self, name: &str, _package: &str) -> Result<()> {
        if self.failing_creates.contains(name) {
            return Err(Error::platform("corral create", format!("{} failed", name)));
        }
        self.created.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn mirror_var(&self, name: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .vars
            .lock()
            .unwrap()
            .get(&(name.to_string(), key.to_string()))
            .cloned())
    }

    async fn delete_mirror(&self, name: &str) -> Result<()> {
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(())
    }
}
