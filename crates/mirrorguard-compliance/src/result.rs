//! Check outcomes

use std::fmt;

use mirrorguard_common::Error;

/// Which check produced a result
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CheckKind {
    /// Every container image comes from the expected registry
    RegistryPrefix,
    /// Every pod is healthy
    PodStatus,
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckKind::RegistryPrefix => write!(f, "registry-prefix"),
            CheckKind::PodStatus => write!(f, "pod-status"),
        }
    }
}

/// What was wrong with the offending pod or container
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViolationKind {
    /// Image pulled from a registry other than the expected one
    ForeignRegistry,
    /// Pod has not started yet (Pending)
    NotReady,
    /// Pod failed or its phase is unknown
    Failing,
    /// A container keeps restarting
    CrashLoop,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViolationKind::ForeignRegistry => "foreign registry",
            ViolationKind::NotReady => "not ready",
            ViolationKind::Failing => "failing",
            ViolationKind::CrashLoop => "crash loop",
        };
        f.write_str(s)
    }
}

/// The first offender found by a failed check
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// Pod name
    pub pod: String,
    /// Pod namespace
    pub namespace: String,
    /// Container name, for container-scoped violations
    pub container: Option<String>,
    /// Kind of violation
    pub kind: ViolationKind,
}

/// Something unusual about a passing result
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Anomaly {
    /// The snapshot had no pods, so the check passed vacuously
    EmptyPodCollection,
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::EmptyPodCollection => write!(f, "empty pod collection"),
        }
    }
}

/// Outcome of one check over one snapshot
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationResult {
    /// Cluster or collection the snapshot came from
    pub subject: String,
    /// Check that ran
    pub check: CheckKind,
    /// Whether the check passed
    pub passed: bool,
    /// Human-readable summary
    pub detail: String,
    /// First offender, when failed
    pub violation: Option<Violation>,
    /// Set on unusual passes
    pub anomaly: Option<Anomaly>,
    /// Pods examined
    pub pods_checked: usize,
}

impl ValidationResult {
    pub(crate) fn pass(
        subject: &str,
        check: CheckKind,
        pods_checked: usize,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.to_string(),
            check,
            passed: true,
            detail: detail.into(),
            violation: None,
            anomaly: None,
            pods_checked,
        }
    }

    pub(crate) fn vacuous(subject: &str, check: CheckKind) -> Self {
        Self {
            anomaly: Some(Anomaly::EmptyPodCollection),
            ..Self::pass(subject, check, 0, "no pods to check")
        }
    }

    pub(crate) fn fail(
        subject: &str,
        check: CheckKind,
        pods_checked: usize,
        violation: Violation,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.to_string(),
            check,
            passed: false,
            detail: detail.into(),
            violation: Some(violation),
            anomaly: None,
            pods_checked,
        }
    }

    /// Turn a failed result into a `ValidationError`; passing results are `Ok`
    pub fn into_error(self) -> Result<Self, Error> {
        if self.passed {
            return Ok(self);
        }
        match self.violation {
            Some(v) => Err(Error::validation_for(
                self.subject,
                v.namespace,
                v.pod,
                v.container,
                format!("{}: {}", v.kind, self.detail),
            )),
            None => Err(Error::validation_for(
                self.subject,
                "",
                "",
                None,
                self.detail,
            )),
        }
    }
}
