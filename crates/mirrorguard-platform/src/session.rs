//! Resources created during a run and their teardown
//!
//! Nothing is rolled back automatically when a step fails. Everything a run
//! creates is recorded here and deleted once at the end, dependents first:
//! clusters, then node templates, then registry mirrors.

use std::sync::Mutex;

use tracing::{info, warn};

use crate::client::PlatformClient;
use crate::mirror::MirrorProvisioner;

/// A resource created during a run
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreatedResource {
    /// A platform cluster
    Cluster {
        /// Platform id
        id: String,
        /// Display name
        name: String,
    },
    /// A node template (`namespace:name`)
    NodeTemplate {
        /// Template id
        id: String,
    },
    /// A registry mirror
    Mirror {
        /// Logical mirror name
        name: String,
    },
}

impl CreatedResource {
    /// Deletion order: lower goes first
    fn teardown_priority(&self) -> u8 {
        match self {
            CreatedResource::Cluster { .. } => 0,
            CreatedResource::NodeTemplate { .. } => 1,
            CreatedResource::Mirror { .. } => 2,
        }
    }
}

impl std::fmt::Display for CreatedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CreatedResource::Cluster { id, name } => write!(f, "cluster {} ({})", name, id),
            CreatedResource::NodeTemplate { id } => write!(f, "node template {}", id),
            CreatedResource::Mirror { name } => write!(f, "mirror {}", name),
        }
    }
}

/// Outcome of a teardown pass
#[derive(Debug, Default)]
pub struct TeardownSummary {
    /// Resources deleted (or already gone)
    pub deleted: Vec<CreatedResource>,
    /// Resources that could not be deleted, with the reason
    pub failed: Vec<(CreatedResource, String)>,
}

impl TeardownSummary {
    /// Whether every resource was deleted
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Registry of resources created during a run
///
/// Shared across provisioning tasks behind an `Arc`.
#[derive(Debug, Default)]
pub struct Session {
    resources: Mutex<Vec<CreatedResource>>,
}

impl Session {
    /// Empty session
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a created resource
    pub fn record(&self, resource: CreatedResource) {
        let mut guard = self.resources.lock().unwrap_or_else(|e| e.into_inner());
        guard.push(resource);
    }

    /// Snapshot of recorded resources in creation order
    pub fn resources(&self) -> Vec<CreatedResource> {
        self.resources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of recorded resources
    pub fn len(&self) -> usize {
        self.resources.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete every recorded resource, dependents first
    ///
    /// Within a kind, resources are deleted newest first. A failed deletion is
    /// logged and recorded; it never stops the remaining deletions. The session
    /// is empty afterwards.
    pub async fn teardown(
        &self,
        platform: &dyn PlatformClient,
        mirrors: &dyn MirrorProvisioner,
    ) -> TeardownSummary {
        let mut pending = {
            let mut guard = self.resources.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        pending.reverse();
        // Stable sort keeps newest-first order within each kind
        pending.sort_by_key(CreatedResource::teardown_priority);

        let mut summary = TeardownSummary::default();
        for resource in pending {
            let result = match &resource {
                CreatedResource::Cluster { id, .. } => platform.delete_cluster(id).await,
                CreatedResource::NodeTemplate { id } => platform.delete_node_template(id).await,
                CreatedResource::Mirror { name } => mirrors.delete_mirror(name).await,
            };
            match result {
                Ok(()) => {
                    info!(resource = %resource, "Torn down");
                    summary.deleted.push(resource);
                }
                Err(e) => {
                    warn!(resource = %resource, error = %e, "Teardown failed");
                    summary.failed.push((resource, e.to_string()));
                }
            }
        }
        summary
    }
}
