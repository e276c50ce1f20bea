//! Error types for mirrorguard
//!
//! Errors are structured with fields to aid diagnosis of a failed run.
//! Each variant carries the resource, cluster or pod it concerns so the
//! driver can report per-cluster outcomes without re-parsing messages.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for mirrorguard operations
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing configuration; aborts the run before provisioning
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's wrong
        message: String,
        /// The offending config path (e.g., "provisioning.providers")
        field: Option<String>,
    },

    /// A watched resource's event stream ended abnormally or reported deletion
    #[error("watch error for {resource}: {message}")]
    ResourceWatch {
        /// The watched resource (e.g., "cluster/c-abc12")
        resource: String,
        /// Description of how the stream ended
        message: String,
    },

    /// Readiness was not observed within the bound
    #[error("timed out after {timeout:?} waiting for {resource} (goal state unknown)")]
    Timeout {
        /// The watched resource
        resource: String,
        /// The bound that elapsed
        timeout: Duration,
    },

    /// The caller cancelled the wait
    #[error("wait for {resource} was cancelled")]
    Cancelled {
        /// The watched resource
        resource: String,
    },

    /// A compliance check found a concrete violation
    #[error("validation failed for {subject}: pod {namespace}/{pod}: {message}")]
    Validation {
        /// The validated cluster or collection
        subject: String,
        /// Offending pod name
        pod: String,
        /// Offending pod namespace
        namespace: String,
        /// Offending container, when the violation is container-scoped
        container: Option<String>,
        /// Description of the violation
        message: String,
    },

    /// Provisioning completed but the platform state contradicts the request
    #[error("post-condition failed for cluster {cluster}: {message}")]
    PostCondition {
        /// Name of the provisioned cluster
        cluster: String,
        /// Description of the inconsistency
        message: String,
    },

    /// An outbound call to the platform or the mirror provisioner failed
    #[error("platform call {operation} failed: {message}")]
    Platform {
        /// The outbound operation (e.g., "submit_cluster", "corral vars")
        operation: String,
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "driver", "session")
        context: String,
    },
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a configuration error naming the offending field
    pub fn config_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a watch error for a resource
    pub fn resource_watch(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ResourceWatch {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a timeout error for a resource
    pub fn timeout(resource: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            resource: resource.into(),
            timeout,
        }
    }

    /// Create a cancellation error for a resource
    pub fn cancelled(resource: impl Into<String>) -> Self {
        Self::Cancelled {
            resource: resource.into(),
        }
    }

    /// Create a validation error identifying the offending pod and container
    pub fn validation_for(
        subject: impl Into<String>,
        namespace: impl Into<String>,
        pod: impl Into<String>,
        container: Option<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            subject: subject.into(),
            pod: pod.into(),
            namespace: namespace.into(),
            container,
            message: msg.into(),
        }
    }

    /// Create a post-condition error for a provisioned cluster
    pub fn post_condition(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::PostCondition {
            cluster: cluster.into(),
            message: msg.into(),
        }
    }

    /// Create a platform call error
    pub fn platform(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Platform {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Taxonomy name used in reports
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config { .. } => "ConfigError",
            Error::ResourceWatch { .. } => "ResourceWatchError",
            Error::Timeout { .. } => "TimeoutError",
            Error::Cancelled { .. } => "Cancelled",
            Error::Validation { .. } => "ValidationError",
            Error::PostCondition { .. } => "PostConditionError",
            Error::Platform { .. } => "PlatformCallError",
            Error::Internal { .. } => "InternalError",
        }
    }

    /// Whether this error aborts the whole run rather than a single cluster
    pub fn aborts_run(&self) -> bool {
        matches!(self, Error::Config { .. })
    }

    /// Whether the watched resource may still converge after this error
    ///
    /// A timeout or cancellation only means the caller stopped waiting.
    pub fn goal_state_unknown(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::Cancelled { .. })
    }

    /// Get the resource, cluster or subject this error concerns, if any
    pub fn subject(&self) -> Option<&str> {
        match self {
            Error::ResourceWatch { resource, .. }
            | Error::Timeout { resource, .. }
            | Error::Cancelled { resource } => Some(resource),
            Error::Validation { subject, .. } => Some(subject),
            Error::PostCondition { cluster, .. } => Some(cluster),
            Error::Config { .. } | Error::Platform { .. } | Error::Internal { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: a configuration problem stops the run before anything is provisioned
    #[test]
    fn story_config_errors_abort_the_run() {
        let err =
            Error::config_for_field("provisioning.providers", "at least one provider is required");
        assert!(err.aborts_run());
        assert_eq!(err.kind(), "ConfigError");
        assert!(err.to_string().contains("at least one provider"));
        match &err {
            Error::Config { field, .. } => {
                assert_eq!(field.as_deref(), Some("provisioning.providers"))
            }
            _ => panic!("Expected Config variant"),
        }

        // Everything else is scoped to a single cluster
        assert!(!Error::resource_watch("cluster/c-1", "deleted").aborts_run());
        assert!(!Error::timeout("cluster/c-1", Duration::from_secs(1)).aborts_run());
        assert!(!Error::platform("submit_cluster", "403").aborts_run());
    }

    /// Story: giving up on a watch does not mean the cluster failed
    #[test]
    fn story_timeout_leaves_goal_state_unknown() {
        let err = Error::timeout("cluster/c-abc", Duration::from_secs(30));
        assert!(err.goal_state_unknown());
        assert!(err.to_string().contains("goal state unknown"));
        assert_eq!(err.subject(), Some("cluster/c-abc"));

        assert!(Error::cancelled("cluster/c-abc").goal_state_unknown());
        assert!(!Error::resource_watch("cluster/c-abc", "stream closed").goal_state_unknown());
    }

    /// Story: a validation failure names the pod and container that broke the rule
    #[test]
    fn story_validation_error_identifies_offender() {
        let err = Error::validation_for(
            "cluster-a",
            "kube-system",
            "coredns-abc",
            Some("coredns".to_string()),
            "image docker.io/coredns:1.9 is not served by registry.internal.test",
        );
        let msg = err.to_string();
        assert!(msg.contains("cluster-a"));
        assert!(msg.contains("kube-system/coredns-abc"));
        match &err {
            Error::Validation { container, .. } => {
                assert_eq!(container.as_deref(), Some("coredns"))
            }
            _ => panic!("Expected Validation variant"),
        }
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn test_post_condition_carries_cluster() {
        let err = Error::post_condition("aws-x1y2", "service account token secret is empty");
        assert_eq!(err.subject(), Some("aws-x1y2"));
        assert_eq!(err.kind(), "PostConditionError");
    }

    #[test]
    fn test_internal_error_default_context() {
        let err = Error::internal("join failed");
        assert!(err.to_string().contains("[unknown]"));
        let err = Error::internal_with_context("driver", "join failed");
        assert!(err.to_string().contains("[driver]"));
    }

    #[test]
    fn test_platform_error_has_no_subject() {
        let err = Error::platform("list_pods", "connection refused");
        assert_eq!(err.subject(), None);
        assert_eq!(err.kind(), "PlatformCallError");
        assert!(err.to_string().contains("list_pods"));
    }
}
