//! Registry prefix and pod status checks
//!
//! Both checks stop at the first offender and report it in the result's
//! violation. An empty snapshot passes vacuously with
//! [`Anomaly::EmptyPodCollection`] attached and a warning logged, since an
//! empty cluster usually means the snapshot came from the wrong place.

use tracing::{debug, warn};

use mirrorguard_common::types::{ContainerState, PodPhase, PodRecord};
use mirrorguard_common::{Error, Result};

use crate::image::{has_registry_prefix, normalize_host, registry_host};
use crate::result::{Anomaly, CheckKind, ValidationResult, Violation, ViolationKind};

/// Restarts tolerated on a terminated container before it counts as crash-looping
pub const MAX_UNEXPECTED_RESTARTS: i32 = 0;

/// Waiting reason that marks a crash loop regardless of restart count
const CRASH_LOOP_REASON: &str = "CrashLoopBackOff";

/// Check every container image is pulled from `expected_host`
///
/// A blank host is a `ConfigError`.
pub fn check_registry_prefix(
    subject: &str,
    pods: &[PodRecord],
    expected_host: &str,
) -> Result<ValidationResult> {
    let host = normalize_host(expected_host);
    if host.is_empty() {
        return Err(Error::config(format!(
            "expected registry host for {} is empty",
            subject
        )));
    }
    if pods.is_empty() {
        return Ok(vacuous(subject, CheckKind::RegistryPrefix));
    }

    let mut containers_checked = 0usize;
    for pod in pods {
        for container in &pod.containers {
            containers_checked += 1;
            if !has_registry_prefix(&container.image_reference, host) {
                let detail = format!(
                    "container {} in pod {}/{} uses image {} from {}, expected {}",
                    container.name,
                    pod.namespace,
                    pod.name,
                    container.image_reference,
                    registry_host(&container.image_reference),
                    host
                );
                warn!(subject = %subject, "{}", detail);
                return Ok(ValidationResult::fail(
                    subject,
                    CheckKind::RegistryPrefix,
                    pods.len(),
                    Violation {
                        pod: pod.name.clone(),
                        namespace: pod.namespace.clone(),
                        container: Some(container.name.clone()),
                        kind: ViolationKind::ForeignRegistry,
                    },
                    detail,
                ));
            }
        }
    }

    debug!(
        subject = %subject,
        pods = pods.len(),
        containers = containers_checked,
        host = %host,
        "All images served by expected registry"
    );
    Ok(ValidationResult::pass(
        subject,
        CheckKind::RegistryPrefix,
        pods.len(),
        format!(
            "{} containers in {} pods pulled from {}",
            containers_checked,
            pods.len(),
            host
        ),
    ))
}

/// Check every pod is Running or Succeeded with no crash-looping container
pub fn check_pod_status(subject: &str, pods: &[PodRecord]) -> Result<ValidationResult> {
    if pods.is_empty() {
        return Ok(vacuous(subject, CheckKind::PodStatus));
    }

    for pod in pods {
        if let Some((violation, detail)) = pod_violation(pod) {
            warn!(subject = %subject, kind = %violation.kind, "{}", detail);
            return Ok(ValidationResult::fail(
                subject,
                CheckKind::PodStatus,
                pods.len(),
                violation,
                detail,
            ));
        }
    }

    debug!(subject = %subject, pods = pods.len(), "All pods healthy");
    Ok(ValidationResult::pass(
        subject,
        CheckKind::PodStatus,
        pods.len(),
        format!("{} pods healthy", pods.len()),
    ))
}

fn vacuous(subject: &str, check: CheckKind) -> ValidationResult {
    warn!(
        subject = %subject,
        check = %check,
        anomaly = %Anomaly::EmptyPodCollection,
        "Pod snapshot is empty; check passes vacuously"
    );
    ValidationResult::vacuous(subject, check)
}

fn pod_violation(pod: &PodRecord) -> Option<(Violation, String)> {
    let violation = |container: Option<&str>, kind| Violation {
        pod: pod.name.clone(),
        namespace: pod.namespace.clone(),
        container: container.map(str::to_string),
        kind,
    };

    match pod.phase {
        PodPhase::Running | PodPhase::Succeeded => {}
        PodPhase::Pending => {
            return Some((
                violation(None, ViolationKind::NotReady),
                format!("pod {}/{} is Pending", pod.namespace, pod.name),
            ))
        }
        PodPhase::Failed | PodPhase::Unknown => {
            return Some((
                violation(None, ViolationKind::Failing),
                format!("pod {}/{} is {}", pod.namespace, pod.name, pod.phase),
            ))
        }
    }

    for status in &pod.container_statuses {
        let crash_looping = match status.state {
            ContainerState::Terminated => status.restart_count > MAX_UNEXPECTED_RESTARTS,
            ContainerState::Waiting => status.reason.as_deref() == Some(CRASH_LOOP_REASON),
            ContainerState::Running => false,
        };
        if crash_looping {
            return Some((
                violation(Some(status.name.as_str()), ViolationKind::CrashLoop),
                format!(
                    "container {} in pod {}/{} is crash-looping ({} restarts, reason {})",
                    status.name,
                    pod.namespace,
                    pod.name,
                    status.restart_count,
                    status.reason.as_deref().unwrap_or("none")
                ),
            ));
        }
    }
    None
}
