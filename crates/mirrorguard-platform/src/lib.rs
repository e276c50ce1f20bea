//! Outbound collaborators for mirrorguard
//!
//! - [`client::PlatformClient`]: clusters, node templates, node pools and pods
//!   on the cluster-provisioning platform, implemented over kube-rs
//! - [`mirror::MirrorProvisioner`]: registry mirrors created through the
//!   corral CLI
//! - [`session::Session`]: everything created during a run, torn down at the end

#![deny(missing_docs)]

pub mod client;
pub mod mirror;
pub mod session;
pub mod subscription;

pub use client::{KubePlatformClient, PlatformClient};
pub use mirror::{CorralProvisioner, MirrorEndpoint, MirrorProvisioner};
pub use session::{CreatedResource, Session, TeardownSummary};
pub use subscription::{ResourceEvent, Subscription};
