//! Cluster provisioning for mirrorguard
//!
//! [`watch::ReadinessWatcher`] blocks on a resource's change events until a
//! predicate holds. [`provisioner::ClusterProvisioner`] builds a cluster with
//! private registries attached and uses the watcher to wait for it.

#![deny(missing_docs)]

pub mod names;
pub mod provisioner;
pub mod watch;

pub use provisioner::{ClusterProvisioner, ProvisionRequest, ProvisionedCluster};
pub use watch::ReadinessWatcher;
