//! Suite configuration loaded from YAML
//!
//! The file has four sections: `registries` (which mirrors to provision and
//! how they are named), `corral` (mirror provisioner settings), `provisioning`
//! (what clusters to build) and `platform` (how to reach the management
//! cluster). Every problem found while loading or validating is a
//! `ConfigError`, raised before anything is provisioned.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::NodeRoles;
use crate::{Error, Result};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "MIRRORGUARD_CONFIG";

/// Environment variable overriding `registries.useExistingRegistries`
pub const USE_EXISTING_REGISTRIES_ENV: &str = "MIRRORGUARD_USE_EXISTING_REGISTRIES";

/// Default bound on a single readiness watch (seconds)
pub const DEFAULT_WATCH_TIMEOUT_SECS: u64 = 1800;

/// Longest readiness watch a config may ask for (one week)
pub const MAX_WATCH_TIMEOUT_SECS: u64 = 7 * 24 * 3600;

/// Default number of clusters provisioned at once
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Top-level suite configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteConfig {
    /// Registry mirror selection
    #[serde(default)]
    pub registries: RegistriesConfig,
    /// Mirror provisioner settings
    #[serde(default)]
    pub corral: CorralConfig,
    /// Cluster provisioning inputs
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
    /// Management cluster access
    #[serde(default)]
    pub platform: PlatformConfig,
}

/// Which registry mirrors take part in the run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistriesConfig {
    /// Mirrors to create before provisioning, by logical name
    #[serde(default)]
    pub registry_config_names: Vec<String>,
    /// Skip mirror creation and read variables of mirrors that already exist
    #[serde(default)]
    pub use_existing_registries: bool,
    /// Logical names of the three mirror topologies
    #[serde(default)]
    pub mirrors: MirrorNames,
}

/// Logical mirror names as known to the mirror provisioner
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorNames {
    /// Mirror configured platform-wide (used by the `local` cluster)
    #[serde(default = "default_global_mirror")]
    pub global: String,
    /// Anonymous mirror
    #[serde(default = "default_no_auth_mirror")]
    pub no_auth: String,
    /// Authenticated mirror
    #[serde(default = "default_auth_mirror")]
    pub auth: String,
}

fn default_global_mirror() -> String {
    "rancherha".to_string()
}

fn default_no_auth_mirror() -> String {
    "registryauthdisabled".to_string()
}

fn default_auth_mirror() -> String {
    "registryauthenabled".to_string()
}

impl Default for MirrorNames {
    fn default() -> Self {
        Self {
            global: default_global_mirror(),
            no_auth: default_no_auth_mirror(),
            auth: default_auth_mirror(),
        }
    }
}

/// Mirror provisioner (corral) settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorralConfig {
    /// Package path per logical mirror name
    #[serde(default)]
    pub packages: BTreeMap<String, String>,
    /// Delete created mirrors at teardown
    #[serde(default = "default_true")]
    pub cleanup: bool,
    /// Provisioner user identifier
    #[serde(default)]
    pub user_id: Option<String>,
    /// Public key handed to the provisioner
    #[serde(default)]
    pub ssh_path: Option<PathBuf>,
    /// Variables set globally before any mirror is created
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

impl Default for CorralConfig {
    fn default() -> Self {
        Self {
            packages: BTreeMap::new(),
            cleanup: true,
            user_id: None,
            ssh_path: None,
            vars: BTreeMap::new(),
        }
    }
}

/// Inputs for the clusters built by the run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningConfig {
    /// Kubernetes versions; the first one is used
    #[serde(default)]
    pub kubernetes_versions: Vec<String>,
    /// Network plugins; the first one is used
    #[serde(default)]
    pub cnis: Vec<String>,
    /// Node groups for every provisioned cluster
    #[serde(default)]
    pub nodes_and_roles: Vec<NodeRoles>,
    /// Infrastructure providers; the first one is used
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Bound on each readiness watch
    #[serde(default = "default_watch_timeout_seconds")]
    pub watch_timeout_seconds: u64,
    /// Clusters provisioned at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_watch_timeout_seconds() -> u64 {
    DEFAULT_WATCH_TIMEOUT_SECS
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_true() -> bool {
    true
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            kubernetes_versions: Vec::new(),
            cnis: Vec::new(),
            nodes_and_roles: Vec::new(),
            providers: Vec::new(),
            watch_timeout_seconds: DEFAULT_WATCH_TIMEOUT_SECS,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// An infrastructure provider and its node template body
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Provider name, used as the cluster name prefix (e.g., "aws")
    pub name: String,
    /// Provider-specific node template fields, passed through as-is
    #[serde(default)]
    pub node_template: serde_json::Value,
}

/// How to reach the management cluster
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformConfig {
    /// Kubeconfig path; kube defaults apply when unset
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,
    /// Tear down created clusters and templates after the run
    #[serde(default = "default_true")]
    pub cleanup: bool,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            cleanup: true,
        }
    }
}

impl SuiteConfig {
    /// Read, parse and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: SuiteConfig = serde_yaml::from_str(content)
            .map_err(|e| Error::config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the config is complete enough to start a run
    pub fn validate(&self) -> Result<()> {
        let p = &self.provisioning;
        if p.providers.is_empty() {
            return Err(Error::config_for_field(
                "provisioning.providers",
                "at least one provider is required",
            ));
        }
        if let Some(provider) = p.providers.iter().find(|pr| pr.name.trim().is_empty()) {
            return Err(Error::config_for_field(
                "provisioning.providers",
                format!("provider name must not be empty: {:?}", provider),
            ));
        }
        if p.kubernetes_versions.is_empty() {
            return Err(Error::config_for_field(
                "provisioning.kubernetesVersions",
                "at least one Kubernetes version is required",
            ));
        }
        if p.cnis.is_empty() {
            return Err(Error::config_for_field(
                "provisioning.cnis",
                "at least one CNI is required",
            ));
        }
        if p.nodes_and_roles.is_empty() {
            return Err(Error::config_for_field(
                "provisioning.nodesAndRoles",
                "at least one node group is required",
            ));
        }
        if p.watch_timeout_seconds == 0 {
            return Err(Error::config_for_field(
                "provisioning.watchTimeoutSeconds",
                "watch timeout must be positive",
            ));
        }
        if p.watch_timeout_seconds > MAX_WATCH_TIMEOUT_SECS {
            return Err(Error::config_for_field(
                "provisioning.watchTimeoutSeconds",
                format!(
                    "watch timeout {}s exceeds the {}s limit",
                    p.watch_timeout_seconds, MAX_WATCH_TIMEOUT_SECS
                ),
            ));
        }
        if p.concurrency == 0 {
            return Err(Error::config_for_field(
                "provisioning.concurrency",
                "concurrency must be at least 1",
            ));
        }

        if !self.registries.use_existing_registries {
            self.validate_mirror_packages()?;
        }
        Ok(())
    }

    fn validate_mirror_packages(&self) -> Result<()> {
        for name in &self.registries.registry_config_names {
            match self.corral.packages.get(name) {
                Some(path) if !path.trim().is_empty() => {}
                _ => {
                    return Err(Error::config_for_field(
                        format!("corral.packages.{}", name),
                        format!("no package configured for mirror '{}'", name),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Apply the `useExistingRegistries` override and re-validate
    pub fn with_use_existing_registries(mut self, use_existing: bool) -> Result<Self> {
        self.registries.use_existing_registries = use_existing;
        self.validate()?;
        Ok(self)
    }

    /// Replace the concurrency bound
    pub fn with_concurrency(mut self, concurrency: usize) -> Result<Self> {
        self.provisioning.concurrency = concurrency;
        self.validate()?;
        Ok(self)
    }

    /// Bound on each readiness watch
    pub fn watch_timeout(&self) -> Duration {
        Duration::from_secs(self.provisioning.watch_timeout_seconds)
    }

    /// Whether teardown should run after the suite
    pub fn cleanup_enabled(&self) -> bool {
        self.platform.cleanup
    }
}
