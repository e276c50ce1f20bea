//! Common types for mirrorguard: errors, data model, configuration and telemetry

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod telemetry;
pub mod types;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Cluster identifier the platform uses for its own management cluster
pub const LOCAL_CLUSTER_ID: &str = "local";

/// API group of the platform's management objects (clusters, node pools, templates)
pub const MANAGEMENT_GROUP: &str = "management.cattle.io";

/// API version of the platform's management objects
pub const MANAGEMENT_VERSION: &str = "v3";

/// Namespace holding node templates shared across clusters
pub const NODE_TEMPLATE_NAMESPACE: &str = "cattle-global-nt";

/// Namespace holding the per-cluster service-account token secrets
pub const GLOBAL_DATA_NAMESPACE: &str = "cattle-global-data";
