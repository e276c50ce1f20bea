//! Data model shared by the provisioner, the compliance checker and the driver
//!
//! Cluster-side types (`ClusterSpec`, `RegistrySet`, `ClusterState`) describe
//! what is submitted and what the platform reports back. Pod-side types
//! (`PodRecord` and friends) are flattened snapshots of `k8s_openapi` pods so
//! the checks never touch API objects directly.

use std::collections::BTreeSet;
use std::fmt;

use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};

use crate::Error;

// =============================================================================
// Node roles
// =============================================================================

/// Role a provisioned node plays in the cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Runs the Kubernetes control plane
    ControlPlane,
    /// Runs an etcd member
    Etcd,
    /// Runs workloads
    Worker,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::ControlPlane => write!(f, "controlplane"),
            NodeRole::Etcd => write!(f, "etcd"),
            NodeRole::Worker => write!(f, "worker"),
        }
    }
}

/// A group of identically-configured nodes: a non-empty role set and a count
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "NodeRolesConfig", into = "NodeRolesConfig")]
pub struct NodeRoles {
    roles: BTreeSet<NodeRole>,
    count: u32,
}

impl NodeRoles {
    /// Create a role group, rejecting an empty role set or a zero count
    pub fn new(roles: impl IntoIterator<Item = NodeRole>, count: u32) -> Result<Self, Error> {
        let roles: BTreeSet<NodeRole> = roles.into_iter().collect();
        if roles.is_empty() {
            return Err(Error::config_for_field(
                "provisioning.nodesAndRoles",
                "a node pool needs at least one role",
            ));
        }
        if count == 0 {
            return Err(Error::config_for_field(
                "provisioning.nodesAndRoles",
                "node pool quantity must be at least 1",
            ));
        }
        Ok(Self { roles, count })
    }

    /// The roles every node in this group carries
    pub fn roles(&self) -> &BTreeSet<NodeRole> {
        &self.roles
    }

    /// Whether nodes in this group carry `role`
    pub fn has(&self, role: NodeRole) -> bool {
        self.roles.contains(&role)
    }

    /// Number of nodes in this group
    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Config-file shape of a node group (one boolean per role)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeRolesConfig {
    #[serde(default)]
    control_plane: bool,
    #[serde(default)]
    etcd: bool,
    #[serde(default)]
    worker: bool,
    quantity: u32,
}

impl TryFrom<NodeRolesConfig> for NodeRoles {
    type Error = String;

    fn try_from(raw: NodeRolesConfig) -> Result<Self, Self::Error> {
        let roles = [
            (raw.control_plane, NodeRole::ControlPlane),
            (raw.etcd, NodeRole::Etcd),
            (raw.worker, NodeRole::Worker),
        ]
        .into_iter()
        .filter_map(|(enabled, role)| enabled.then_some(role));
        NodeRoles::new(roles, raw.quantity).map_err(|e| e.to_string())
    }
}

impl From<NodeRoles> for NodeRolesConfig {
    fn from(roles: NodeRoles) -> Self {
        Self {
            control_plane: roles.has(NodeRole::ControlPlane),
            etcd: roles.has(NodeRole::Etcd),
            worker: roles.has(NodeRole::Worker),
            quantity: roles.count,
        }
    }
}

// =============================================================================
// Private registries
// =============================================================================

/// A private registry the cluster's nodes pull through
///
/// Username and password are either both present (authenticated mirror) or
/// both absent (anonymous mirror); the constructors enforce this.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateRegistryCredential {
    host: String,
    is_default: bool,
    username: Option<String>,
    password: Option<String>,
}

impl PrivateRegistryCredential {
    /// Create a credential from optional username/password
    ///
    /// Empty strings count as absent, matching how mirror provisioners report
    /// unset values.
    pub fn new(
        host: impl Into<String>,
        is_default: bool,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self, Error> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(Error::config("private registry host must not be empty"));
        }
        let username = username.filter(|u| !u.is_empty());
        let password = password.filter(|p| !p.is_empty());
        if username.is_some() != password.is_some() {
            return Err(Error::config(format!(
                "registry {}: username and password must be set together",
                host
            )));
        }
        Ok(Self {
            host,
            is_default,
            username,
            password,
        })
    }

    /// Anonymous (no-auth) mirror
    pub fn anonymous(host: impl Into<String>, is_default: bool) -> Result<Self, Error> {
        Self::new(host, is_default, None, None)
    }

    /// Authenticated mirror
    pub fn authenticated(
        host: impl Into<String>,
        is_default: bool,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, Error> {
        Self::new(
            host,
            is_default,
            Some(username.into()),
            Some(password.into()),
        )
    }

    /// Registry host (FQDN, optionally with port)
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Whether this registry is the cluster's default pull source
    pub fn is_default(&self) -> bool {
        self.is_default
    }

    /// Username for authenticated mirrors
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Password for authenticated mirrors
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Whether the mirror is anonymous
    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }
}

impl fmt::Debug for PrivateRegistryCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateRegistryCredential")
            .field("host", &self.host)
            .field("is_default", &self.is_default)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Ordered registries attached to a cluster
///
/// A non-empty set has exactly one default registry. Zero or several
/// defaults are rejected at construction rather than left to the platform.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistrySet {
    registries: Vec<PrivateRegistryCredential>,
}

impl RegistrySet {
    /// Validate and wrap a registry list
    pub fn new(registries: Vec<PrivateRegistryCredential>) -> Result<Self, Error> {
        if !registries.is_empty() {
            let defaults = registries.iter().filter(|r| r.is_default()).count();
            if defaults != 1 {
                let hosts: Vec<&str> = registries.iter().map(|r| r.host()).collect();
                return Err(Error::config(format!(
                    "exactly one private registry must be marked default, found {} among [{}]",
                    defaults,
                    hosts.join(", ")
                )));
            }
        }
        Ok(Self { registries })
    }

    /// A set with a single default registry
    pub fn single(registry: PrivateRegistryCredential) -> Result<Self, Error> {
        Self::new(vec![registry])
    }

    /// The default registry, if the set is non-empty
    pub fn default_registry(&self) -> Option<&PrivateRegistryCredential> {
        self.registries.iter().find(|r| r.is_default())
    }

    /// Iterate registries in submission order
    pub fn iter(&self) -> impl Iterator<Item = &PrivateRegistryCredential> {
        self.registries.iter()
    }

    /// Number of registries
    pub fn len(&self) -> usize {
        self.registries.len()
    }

    /// Whether no registry is attached
    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }
}

// =============================================================================
// Clusters
// =============================================================================

/// Everything submitted to the platform for one cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterSpec {
    /// Display name, unique within a run
    pub name: String,
    /// CNI plugin (e.g., "calico", "canal")
    pub network_plugin: String,
    /// Kubernetes version string understood by the platform
    pub kubernetes_version: String,
    /// Node groups to bind to the cluster, in order
    pub node_roles: Vec<NodeRoles>,
    /// Private registries attached to the cluster
    pub registries: RegistrySet,
}

/// A condition reported on a platform cluster
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterCondition {
    /// Condition type (e.g., "Ready", "Updated", "Provisioned")
    #[serde(rename = "type")]
    pub type_: String,
    /// "True", "False" or "Unknown"
    pub status: String,
    /// Human-readable detail
    #[serde(default)]
    pub message: Option<String>,
}

/// Observed state of a platform cluster
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterState {
    /// Platform-assigned identifier (e.g., "c-7x2kq")
    pub id: String,
    /// Display name given at submission
    pub name: String,
    /// Status conditions
    pub conditions: Vec<ClusterCondition>,
    /// Name of the secret holding the cluster's service-account token
    pub service_account_token_secret: Option<String>,
}

/// Condition types that must all be "True" for provisioning to be complete
pub const PROVISIONING_READY_CONDITIONS: [&str; 2] = ["Ready", "Updated"];

impl ClusterState {
    /// Whether the condition of the given type has status "True"
    pub fn condition_is_true(&self, condition_type: &str) -> bool {
        self.conditions
            .iter()
            .any(|c| c.type_ == condition_type && c.status == "True")
    }

    /// Readiness predicate: the cluster finished provisioning and is active
    pub fn is_provisioning_ready(&self) -> bool {
        PROVISIONING_READY_CONDITIONS
            .iter()
            .all(|c| self.condition_is_true(c))
    }
}

/// A node pool bound to a cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodePool {
    /// Pool name assigned by the platform
    pub name: String,
    /// Identifier of the owning cluster
    pub cluster_id: String,
}

// =============================================================================
// Pods
// =============================================================================

/// Pod lifecycle phase
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodPhase {
    /// Accepted but not all containers are running yet
    Pending,
    /// Bound to a node with at least one container running
    Running,
    /// All containers terminated successfully
    Succeeded,
    /// All containers terminated, at least one in failure
    Failed,
    /// Phase could not be obtained
    Unknown,
}

impl PodPhase {
    /// Parse the phase string reported in pod status
    pub fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Container runtime state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerState {
    /// Not yet running (pulling, backing off, ...)
    Waiting,
    /// Running
    Running,
    /// Exited
    Terminated,
}

/// A container declared in the pod spec
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerRecord {
    /// Container name
    pub name: String,
    /// Image reference as declared (host, path and tag or digest)
    pub image_reference: String,
}

/// Observed status of one container
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerStatusRecord {
    /// Container name
    pub name: String,
    /// Readiness probe result
    pub ready: bool,
    /// Number of restarts
    pub restart_count: i32,
    /// Current state
    pub state: ContainerState,
    /// Reason attached to the waiting/terminated state (e.g., "CrashLoopBackOff")
    pub reason: Option<String>,
}

/// Point-in-time snapshot of a pod
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodRecord {
    /// Pod name
    pub name: String,
    /// Pod namespace
    pub namespace: String,
    /// Init containers followed by regular containers
    pub containers: Vec<ContainerRecord>,
    /// Lifecycle phase
    pub phase: PodPhase,
    /// Status of init and regular containers
    pub container_statuses: Vec<ContainerStatusRecord>,
}

impl From<&Pod> for PodRecord {
    fn from(pod: &Pod) -> Self {
        let containers = pod
            .spec
            .as_ref()
            .map(|spec| {
                spec.init_containers
                    .iter()
                    .flatten()
                    .chain(spec.containers.iter())
                    .map(|c| ContainerRecord {
                        name: c.name.clone(),
                        image_reference: c.image.clone().unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let status = pod.status.as_ref();
        let container_statuses = status
            .map(|s| {
                s.init_container_statuses
                    .iter()
                    .flatten()
                    .chain(s.container_statuses.iter().flatten())
                    .map(container_status_record)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: pod.metadata.name.clone().unwrap_or_default(),
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            containers,
            phase: PodPhase::parse(status.and_then(|s| s.phase.as_deref())),
            container_statuses,
        }
    }
}

fn container_status_record(
    status: &k8s_openapi::api::core::v1::ContainerStatus,
) -> ContainerStatusRecord {
    let state = status.state.as_ref();
    let (state, reason) = match state {
        Some(s) if s.terminated.is_some() => (
            ContainerState::Terminated,
            s.terminated.as_ref().and_then(|t| t.reason.clone()),
        ),
        Some(s) if s.running.is_some() => (ContainerState::Running, None),
        Some(s) => (
            ContainerState::Waiting,
            s.waiting.as_ref().and_then(|w| w.reason.clone()),
        ),
        None => (ContainerState::Waiting, None),
    };
    ContainerStatusRecord {
        name: status.name.clone(),
        ready: status.ready,
        restart_count: status.restart_count,
        state,
        reason,
    }
}
