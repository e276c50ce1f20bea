//! Registry mirror provisioning through the corral CLI
//!
//! Mirrors are addressed by logical name (e.g., "registryauthdisabled").
//! After creation, their endpoint details are read back as corral variables.
//! Corral prints `<nil>` for variables that were never set.

use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use mirrorguard_common::config::CorralConfig;
use mirrorguard_common::types::PrivateRegistryCredential;
use mirrorguard_common::Error;

/// Variable holding a mirror's host
pub const REGISTRY_FQDN_VAR: &str = "registry_fqdn";
/// Variable holding an authenticated mirror's username
pub const REGISTRY_USERNAME_VAR: &str = "registry_username";
/// Variable holding an authenticated mirror's password
pub const REGISTRY_PASSWORD_VAR: &str = "registry_password";

/// Value corral prints for an unset variable
pub const UNSET_VALUE: &str = "<nil>";

const CONFIG_TIMEOUT: Duration = Duration::from_secs(60);
const VARS_TIMEOUT: Duration = Duration::from_secs(30);
const CREATE_TIMEOUT: Duration = Duration::from_secs(60 * 60);
const DELETE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Trait abstracting the registry-mirror provisioner
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MirrorProvisioner: Send + Sync {
    /// Apply user, key and global variables before any mirror is created
    async fn configure(&self, config: &CorralConfig) -> Result<(), Error>;

    /// Create a mirror from a package
    async fn create_mirror(&self, name: &str, package: &str) -> Result<(), Error>;

    /// Read a mirror variable; `None` when unset
    async fn mirror_var(&self, name: &str, key: &str) -> Result<Option<String>, Error>;

    /// Delete a mirror
    async fn delete_mirror(&self, name: &str) -> Result<(), Error>;
}

/// Normalize a raw variable value: `<nil>` and blank mean unset
pub fn parse_var_value(raw: &str) -> Option<String> {
    let value = raw.trim();
    if value.is_empty() || value == UNSET_VALUE {
        None
    } else {
        Some(value.to_string())
    }
}

/// Endpoint details of a provisioned mirror
#[derive(Clone, PartialEq, Eq)]
pub struct MirrorEndpoint {
    /// Logical mirror name
    pub name: String,
    /// Registry host, if the mirror exposes one
    pub host: Option<String>,
    /// Username for authenticated mirrors
    pub username: Option<String>,
    /// Password for authenticated mirrors
    pub password: Option<String>,
}

impl MirrorEndpoint {
    /// Read host and credentials of a mirror
    pub async fn lookup(mirrors: &dyn MirrorProvisioner, name: &str) -> Result<Self, Error> {
        let host = mirrors.mirror_var(name, REGISTRY_FQDN_VAR).await?;
        let username = mirrors.mirror_var(name, REGISTRY_USERNAME_VAR).await?;
        let password = mirrors.mirror_var(name, REGISTRY_PASSWORD_VAR).await?;
        debug!(
            mirror = %name,
            host = host.as_deref().unwrap_or(UNSET_VALUE),
            authenticated = username.is_some(),
            "Resolved mirror endpoint"
        );
        Ok(Self {
            name: name.to_string(),
            host,
            username,
            password,
        })
    }

    /// Read only the host of a mirror
    pub async fn lookup_host(
        mirrors: &dyn MirrorProvisioner,
        name: &str,
    ) -> Result<Option<String>, Error> {
        mirrors.mirror_var(name, REGISTRY_FQDN_VAR).await
    }

    /// The host, or a `ConfigError` naming the mirror
    pub fn require_host(&self) -> Result<&str, Error> {
        self.host.as_deref().ok_or_else(|| {
            Error::config(format!(
                "mirror {} has no {} set",
                self.name, REGISTRY_FQDN_VAR
            ))
        })
    }

    /// Default registry entry without credentials
    pub fn anonymous_credential(&self) -> Result<PrivateRegistryCredential, Error> {
        PrivateRegistryCredential::anonymous(self.require_host()?, true)
    }

    /// Default registry entry carrying the mirror's credentials
    pub fn authenticated_credential(&self) -> Result<PrivateRegistryCredential, Error> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => PrivateRegistryCredential::authenticated(
                self.require_host()?,
                true,
                user.clone(),
                pass.clone(),
            ),
            _ => Err(Error::config(format!(
                "mirror {} has no credentials set",
                self.name
            ))),
        }
    }
}

impl std::fmt::Debug for MirrorEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorEndpoint")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Mirror provisioner backed by the `corral` binary
#[derive(Clone, Debug)]
pub struct CorralProvisioner {
    binary: PathBuf,
}

impl Default for CorralProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl CorralProvisioner {
    /// Use `corral` from `PATH`
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("corral"),
        }
    }

    /// Use a specific corral binary
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(
        &self,
        args: &[&str],
        timeout: Duration,
        operation: &str,
    ) -> Result<String, Error> {
        let description = format!("corral {}", args.join(" "));
        debug!(command = %description, "Running mirror provisioner");

        let mut cmd = Command::new(&self.binary);
        cmd.args(args).kill_on_drop(true);

        let output: Output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| {
                warn!(command = %description, "timed out after {:?}", timeout);
                Error::platform(operation, format!("timed out after {:?}", timeout))
            })?
            .map_err(|e| Error::platform(operation, format!("failed to execute: {}", e)))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(command = %description, error = %stderr, "Mirror provisioner failed");
            Err(Error::platform(
                operation,
                format!("{} exited with {}: {}", description, output.status, stderr),
            ))
        }
    }
}

#[async_trait]
impl MirrorProvisioner for CorralProvisioner {
    async fn configure(&self, config: &CorralConfig) -> Result<(), Error> {
        let mut args: Vec<String> = vec!["config".to_string()];
        if let Some(user_id) = &config.user_id {
            args.push("--user_id".to_string());
            args.push(user_id.clone());
        }
        if let Some(ssh_path) = &config.ssh_path {
            args.push("--public_key".to_string());
            args.push(ssh_path.display().to_string());
        }
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&args, CONFIG_TIMEOUT, "corral config").await?;

        for (key, value) in &config.vars {
            self.run(
                &["config", "vars", "set", key, value],
                CONFIG_TIMEOUT,
                "corral config vars",
            )
            .await?;
        }
        info!(vars = config.vars.len(), "Configured mirror provisioner");
        Ok(())
    }

    async fn create_mirror(&self, name: &str, package: &str) -> Result<(), Error> {
        info!(mirror = %name, package = %package, "Creating registry mirror");
        self.run(&["create", name, package], CREATE_TIMEOUT, "corral create")
            .await?;
        info!(mirror = %name, "Registry mirror created");
        Ok(())
    }

    async fn mirror_var(&self, name: &str, key: &str) -> Result<Option<String>, Error> {
        let raw = self
            .run(&["vars", name, key], VARS_TIMEOUT, "corral vars")
            .await?;
        Ok(parse_var_value(&raw))
    }

    async fn delete_mirror(&self, name: &str) -> Result<(), Error> {
        self.run(&["delete", name], DELETE_TIMEOUT, "corral delete")
            .await?;
        info!(mirror = %name, "Deleted registry mirror");
        Ok(())
    }
}
