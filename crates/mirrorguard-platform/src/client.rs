//! Platform client for clusters, node templates, node pools and pods
//!
//! Provides a trait-based abstraction over the provisioning platform, allowing
//! tests to fake it while production code talks to the management cluster's
//! Kubernetes API. Platform objects live in `management.cattle.io/v3` and are
//! handled as `DynamicObject`s; downstream clusters are reached through the
//! platform's `/k8s/clusters/{id}` proxy.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::{Api, DeleteParams, DynamicObject, GroupVersionKind, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::runtime::watcher::{self, Event};
use kube::{Client, Config};
use serde_json::json;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use mirrorguard_common::config::ProviderConfig;
use mirrorguard_common::types::{
    ClusterCondition, ClusterSpec, ClusterState, NodePool, NodeRole, NodeRoles, PodRecord,
};
use mirrorguard_common::{
    Error, GLOBAL_DATA_NAMESPACE, LOCAL_CLUSTER_ID, MANAGEMENT_GROUP, MANAGEMENT_VERSION,
    NODE_TEMPLATE_NAMESPACE,
};

use crate::subscription::{ResourceEvent, Subscription};

/// Connection timeout for the management API
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Server-side timeout for each watch request; the watcher re-establishes it.
/// Must stay below the client read timeout (295s).
pub const WATCH_SERVER_TIMEOUT_SECS: u32 = 290;

/// Key holding the token in a cluster's service-account token secret
pub const SERVICE_ACCOUNT_TOKEN_KEY: &str = "credential";

/// Trait abstracting the cluster-provisioning platform
///
/// Every method is a single outbound call; nothing is retried. Failures map to
/// `Error::Platform` naming the operation.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Submit a cluster definition; returns the state with the assigned id
    async fn submit_cluster(&self, spec: &ClusterSpec) -> Result<ClusterState, Error>;

    /// Create a node template for a provider; returns its id
    async fn create_node_template(&self, provider: &ProviderConfig) -> Result<String, Error>;

    /// Create a node pool bound to a cluster
    async fn create_node_pool(
        &self,
        cluster_id: &str,
        node_template_id: &str,
        hostname_prefix: &str,
        roles: &NodeRoles,
    ) -> Result<NodePool, Error>;

    /// Fetch the current state of a cluster
    async fn get_cluster(&self, cluster_id: &str) -> Result<ClusterState, Error>;

    /// Resolve a cluster display name to its id
    async fn get_cluster_id_by_name(&self, name: &str) -> Result<String, Error>;

    /// Open a change-event subscription for one cluster
    async fn watch_cluster(&self, cluster_id: &str) -> Result<Subscription<ClusterState>, Error>;

    /// Snapshot every pod in a cluster (`"local"` is the management cluster)
    async fn list_pods(&self, cluster_id: &str) -> Result<Vec<PodRecord>, Error>;

    /// Read the service-account token derived for a cluster, if any
    async fn get_service_account_token(&self, cluster_id: &str) -> Result<Option<String>, Error>;

    /// Delete a cluster. Succeeds if it is already gone.
    async fn delete_cluster(&self, cluster_id: &str) -> Result<(), Error>;

    /// Delete a node template. Succeeds if it is already gone.
    async fn delete_node_template(&self, node_template_id: &str) -> Result<(), Error>;
}

/// Platform client backed by the management cluster's Kubernetes API
pub struct KubePlatformClient {
    client: Client,
    config: Config,
}

impl KubePlatformClient {
    /// Connect using an explicit kubeconfig, or kube's inferred defaults
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self, Error> {
        let mut config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    Error::config(format!(
                        "failed to read kubeconfig {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| Error::config(format!("failed to load kubeconfig: {}", e)))?
            }
            None => Config::infer()
                .await
                .map_err(|e| Error::config(format!("failed to infer kube config: {}", e)))?,
        };
        config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);

        let client = Client::try_from(config.clone())
            .map_err(|e| Error::platform("connect", format!("failed to create client: {}", e)))?;
        info!(url = %config.cluster_url, "Connected to management cluster");
        Ok(Self { client, config })
    }

    fn management_api(&self, kind: &str) -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk(
            MANAGEMENT_GROUP,
            MANAGEMENT_VERSION,
            kind,
        ))
    }

    fn cluster_api(&self) -> Api<DynamicObject> {
        Api::all_with(self.client.clone(), &self.management_api("Cluster"))
    }

    /// Client for a downstream cluster, proxied through the platform
    fn downstream_client(&self, cluster_id: &str) -> Result<Client, Error> {
        if cluster_id == LOCAL_CLUSTER_ID {
            return Ok(self.client.clone());
        }
        let mut config = self.config.clone();
        config.cluster_url = downstream_url(&self.config.cluster_url, cluster_id)?;
        Client::try_from(config).map_err(|e| {
            Error::platform(
                "list_pods",
                format!("failed to create client for cluster {}: {}", cluster_id, e),
            )
        })
    }
}

#[async_trait]
impl PlatformClient for KubePlatformClient {
    async fn submit_cluster(&self, spec: &ClusterSpec) -> Result<ClusterState, Error> {
        let obj = to_dynamic(cluster_manifest(spec), "submit_cluster")?;
        let created = self
            .cluster_api()
            .create(&PostParams::default(), &obj)
            .await
            .map_err(call_failed("submit_cluster"))?;
        let state = cluster_state(&created)?;
        info!(cluster = %spec.name, id = %state.id, "Submitted cluster");
        Ok(state)
    }

    async fn create_node_template(&self, provider: &ProviderConfig) -> Result<String, Error> {
        let obj = to_dynamic(node_template_manifest(provider)?, "create_node_template")?;
        let api: Api<DynamicObject> = Api::namespaced_with(
            self.client.clone(),
            NODE_TEMPLATE_NAMESPACE,
            &self.management_api("NodeTemplate"),
        );
        let created = api
            .create(&PostParams::default(), &obj)
            .await
            .map_err(call_failed("create_node_template"))?;
        let name = created.metadata.name.ok_or_else(|| {
            Error::platform("create_node_template", "created node template has no name")
        })?;
        let id = format!("{}:{}", NODE_TEMPLATE_NAMESPACE, name);
        info!(provider = %provider.name, id = %id, "Created node template");
        Ok(id)
    }

    async fn create_node_pool(
        &self,
        cluster_id: &str,
        node_template_id: &str,
        hostname_prefix: &str,
        roles: &NodeRoles,
    ) -> Result<NodePool, Error> {
        let obj = to_dynamic(
            node_pool_manifest(cluster_id, node_template_id, hostname_prefix, roles),
            "create_node_pool",
        )?;
        let api: Api<DynamicObject> = Api::namespaced_with(
            self.client.clone(),
            cluster_id,
            &self.management_api("NodePool"),
        );
        let created = api
            .create(&PostParams::default(), &obj)
            .await
            .map_err(call_failed("create_node_pool"))?;
        let pool = NodePool {
            name: created.metadata.name.unwrap_or_default(),
            cluster_id: cluster_id.to_string(),
        };
        debug!(cluster_id = %cluster_id, pool = %pool.name, "Created node pool");
        Ok(pool)
    }

    async fn get_cluster(&self, cluster_id: &str) -> Result<ClusterState, Error> {
        let obj = self
            .cluster_api()
            .get(cluster_id)
            .await
            .map_err(call_failed("get_cluster"))?;
        cluster_state(&obj)
    }

    async fn get_cluster_id_by_name(&self, name: &str) -> Result<String, Error> {
        let clusters = self
            .cluster_api()
            .list(&ListParams::default())
            .await
            .map_err(call_failed("get_cluster_id_by_name"))?;
        for obj in &clusters.items {
            let state = cluster_state(obj)?;
            if state.name == name || state.id == name {
                return Ok(state.id);
            }
        }
        Err(Error::platform(
            "get_cluster_id_by_name",
            format!("no cluster named {}", name),
        ))
    }

    async fn watch_cluster(&self, cluster_id: &str) -> Result<Subscription<ClusterState>, Error> {
        let resource = format!("cluster/{}", cluster_id);
        let config = watcher::Config::default()
            .fields(&format!("metadata.name={}", cluster_id))
            .timeout(WATCH_SERVER_TIMEOUT_SECS);

        let label = resource.clone();
        let events = watcher::watcher(self.cluster_api(), config)
            .filter_map(move |event| futures::future::ready(map_watch_event(&label, event)))
            .boxed();

        debug!(resource = %resource, "Opened cluster watch");
        Ok(Subscription::new(resource, events))
    }

    async fn list_pods(&self, cluster_id: &str) -> Result<Vec<PodRecord>, Error> {
        let client = self.downstream_client(cluster_id)?;
        let pods: Api<Pod> = Api::all(client);
        let list = pods
            .list(&ListParams::default())
            .await
            .map_err(call_failed("list_pods"))?;
        debug!(cluster_id = %cluster_id, count = list.items.len(), "Listed pods");
        Ok(list.items.iter().map(PodRecord::from).collect())
    }

    async fn get_service_account_token(&self, cluster_id: &str) -> Result<Option<String>, Error> {
        let state = self.get_cluster(cluster_id).await?;
        let Some(secret_name) = state.service_account_token_secret else {
            return Ok(None);
        };

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), GLOBAL_DATA_NAMESPACE);
        let secret = match secrets.get(&secret_name).await {
            Ok(secret) => secret,
            Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(None),
            Err(e) => return Err(call_failed("get_service_account_token")(e)),
        };

        let token = secret
            .data
            .as_ref()
            .and_then(|d| d.get(SERVICE_ACCOUNT_TOKEN_KEY))
            .map(|bytes| String::from_utf8_lossy(&bytes.0).into_owned());
        Ok(token)
    }

    async fn delete_cluster(&self, cluster_id: &str) -> Result<(), Error> {
        match self
            .cluster_api()
            .delete(cluster_id, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                info!(id = %cluster_id, "Deleted cluster");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(id = %cluster_id, "Cluster already deleted");
                Ok(())
            }
            Err(e) => Err(call_failed("delete_cluster")(e)),
        }
    }

    async fn delete_node_template(&self, node_template_id: &str) -> Result<(), Error> {
        let (namespace, name) = split_template_id(node_template_id);
        let api: Api<DynamicObject> = Api::namespaced_with(
            self.client.clone(),
            namespace,
            &self.management_api("NodeTemplate"),
        );
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(id = %node_template_id, "Deleted node template");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(call_failed("delete_node_template")(e)),
        }
    }
}

fn call_failed(operation: &'static str) -> impl Fn(kube::Error) -> Error {
    move |e| Error::platform(operation, e.to_string())
}

fn to_dynamic(value: serde_json::Value, operation: &str) -> Result<DynamicObject, Error> {
    serde_json::from_value(value).map_err(|e| Error::platform(operation, e.to_string()))
}

fn api_version() -> String {
    format!("{}/{}", MANAGEMENT_GROUP, MANAGEMENT_VERSION)
}

/// Cluster object with the registry list attached to the engine config
fn cluster_manifest(spec: &ClusterSpec) -> serde_json::Value {
    let registries: Vec<serde_json::Value> = spec
        .registries
        .iter()
        .map(|r| {
            json!({
                "url": r.host(),
                "isDefault": r.is_default(),
                "user": r.username().unwrap_or_default(),
                "password": r.password().unwrap_or_default(),
            })
        })
        .collect();

    json!({
        "apiVersion": api_version(),
        "kind": "Cluster",
        "metadata": { "generateName": "c-" },
        "spec": {
            "displayName": spec.name,
            "rancherKubernetesEngineConfig": {
                "kubernetesVersion": spec.kubernetes_version,
                "network": { "plugin": spec.network_plugin },
                "privateRegistries": registries,
            },
        },
    })
}

fn node_template_manifest(provider: &ProviderConfig) -> Result<serde_json::Value, Error> {
    let mut spec = match &provider.node_template {
        serde_json::Value::Null => serde_json::Map::new(),
        serde_json::Value::Object(fields) => fields.clone(),
        _ => {
            return Err(Error::config_for_field(
                "provisioning.providers.nodeTemplate",
                format!("node template for {} must be a mapping", provider.name),
            ))
        }
    };
    spec.insert("displayName".to_string(), json!(provider.name));

    Ok(json!({
        "apiVersion": api_version(),
        "kind": "NodeTemplate",
        "metadata": { "generateName": "nt-", "namespace": NODE_TEMPLATE_NAMESPACE },
        "spec": spec,
    }))
}

fn node_pool_manifest(
    cluster_id: &str,
    node_template_id: &str,
    hostname_prefix: &str,
    roles: &NodeRoles,
) -> serde_json::Value {
    json!({
        "apiVersion": api_version(),
        "kind": "NodePool",
        "metadata": { "generateName": "np-", "namespace": cluster_id },
        "spec": {
            "clusterName": cluster_id,
            "nodeTemplateName": node_template_id,
            "hostnamePrefix": hostname_prefix,
            "quantity": roles.count(),
            "controlPlane": roles.has(NodeRole::ControlPlane),
            "etcd": roles.has(NodeRole::Etcd),
            "worker": roles.has(NodeRole::Worker),
        },
    })
}

/// Extract the observed state from a platform cluster object
fn cluster_state(obj: &DynamicObject) -> Result<ClusterState, Error> {
    let id = obj
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::platform("get_cluster", "cluster object has no name"))?;
    let name = obj
        .data
        .get("spec")
        .and_then(|s| s.get("displayName"))
        .and_then(|n| n.as_str())
        .unwrap_or_default()
        .to_string();

    let status = obj.data.get("status");
    let conditions: Vec<ClusterCondition> = status
        .and_then(|s| s.get("conditions"))
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| Error::platform("get_cluster", format!("bad conditions on {}: {}", id, e)))?
        .unwrap_or_default();
    let service_account_token_secret = status
        .and_then(|s| s.get("serviceAccountTokenSecret"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(ClusterState {
        id,
        name,
        conditions,
        service_account_token_secret,
    })
}

fn map_watch_event(
    resource: &str,
    event: Result<Event<DynamicObject>, watcher::Error>,
) -> Option<Result<ResourceEvent<ClusterState>, Error>> {
    let converted = match event {
        Ok(Event::InitApply(obj)) => cluster_state(&obj).map(ResourceEvent::Added),
        Ok(Event::Apply(obj)) => cluster_state(&obj).map(ResourceEvent::Modified),
        Ok(Event::Delete(obj)) => cluster_state(&obj).map(ResourceEvent::Deleted),
        Ok(Event::Init) | Ok(Event::InitDone) => return None,
        Err(e) => Err(Error::resource_watch(resource, e.to_string())),
    };
    Some(converted)
}

/// Proxy path under which the platform serves each downstream API server
const CLUSTER_PROXY_PATH: &str = "/k8s/clusters/";

/// Downstream API server URL for `cluster_id`
///
/// Kubeconfigs issued by the platform may already point at a proxied
/// cluster (usually `local`); that suffix is replaced, not extended.
fn downstream_url(base: &http::Uri, cluster_id: &str) -> Result<http::Uri, Error> {
    let base = base.to_string();
    let server = match base.find(CLUSTER_PROXY_PATH) {
        Some(idx) => &base[..idx],
        None => base.trim_end_matches('/'),
    };
    format!("{}{}{}", server, CLUSTER_PROXY_PATH, cluster_id)
        .parse::<http::Uri>()
        .map_err(|e| {
            Error::platform(
                "list_pods",
                format!("invalid downstream url for {}: {}", cluster_id, e),
            )
        })
}

/// Split a `namespace:name` template id; bare names live in the shared namespace
fn split_template_id(id: &str) -> (&str, &str) {
    id.split_once(':').unwrap_or((NODE_TEMPLATE_NAMESPACE, id))
}
