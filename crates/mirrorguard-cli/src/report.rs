//! Suite outcome and its rendering
//!
//! Every cluster gets a block of check lines, followed by one summary line
//! and the teardown outcome. A check that could not run (snapshot fetch or
//! provisioning failed) is `ERROR` and counts as a failure.

use std::fmt;

use tracing::{error, info};

use mirrorguard_common::Error;
use mirrorguard_compliance::{Anomaly, ValidationResult};
use mirrorguard_platform::TeardownSummary;

const RULE: &str = "========================================";
const THIN_RULE: &str = "----------------------------------------";

/// Name of the pseudo-check covering cluster provisioning
pub const PROVISION_CHECK: &str = "provision";

/// Outcome of a single check line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckStatus {
    Passed,
    Failed,
    Skipped,
    Errored,
}

impl CheckStatus {
    fn label(self) -> &'static str {
        match self {
            CheckStatus::Passed => "PASS",
            CheckStatus::Failed => "FAIL",
            CheckStatus::Skipped => "SKIP",
            CheckStatus::Errored => "ERROR",
        }
    }

    /// Whether this outcome fails the run
    pub fn is_failure(self) -> bool {
        matches!(self, CheckStatus::Failed | CheckStatus::Errored)
    }
}

/// One line of a cluster's block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckReport {
    pub check: String,
    pub status: CheckStatus,
    pub detail: String,
    pub anomaly: Option<Anomaly>,
}

impl CheckReport {
    pub fn passed(check: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            status: CheckStatus::Passed,
            detail: detail.into(),
            anomaly: None,
        }
    }

    pub fn skipped(check: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            status: CheckStatus::Skipped,
            detail: reason.into(),
            anomaly: None,
        }
    }

    pub fn errored(check: impl Into<String>, err: &Error) -> Self {
        Self {
            check: check.into(),
            status: CheckStatus::Errored,
            detail: format!("{}: {}", err.kind(), err),
            anomaly: None,
        }
    }

    /// Line for a check that ran, or could not run
    pub fn from_result(result: Result<ValidationResult, Error>, check: &str) -> Self {
        match result {
            Ok(result) => Self {
                check: result.check.to_string(),
                status: if result.passed {
                    CheckStatus::Passed
                } else {
                    CheckStatus::Failed
                },
                detail: result.detail,
                anomaly: result.anomaly,
            },
            Err(err) => Self::errored(check, &err),
        }
    }
}

/// All check lines for one cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterReport {
    /// Mirror topology label (e.g., "no-auth")
    pub label: String,
    /// Display name, or "local"
    pub cluster: String,
    /// Platform id when known
    pub cluster_id: Option<String>,
    pub checks: Vec<CheckReport>,
}

impl ClusterReport {
    pub fn new(label: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            cluster: cluster.into(),
            cluster_id: None,
            checks: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.cluster_id = Some(id.into());
        self
    }

    pub fn push(&mut self, check: CheckReport) {
        self.checks.push(check);
    }

    /// Line for a named check, if present
    pub fn check(&self, name: &str) -> Option<&CheckReport> {
        self.checks.iter().find(|c| c.check == name)
    }

    pub fn is_passing(&self) -> bool {
        !self.checks.iter().any(|c| c.status.is_failure())
    }
}

/// Outcome of a whole run
#[derive(Debug, Default)]
pub struct SuiteReport {
    pub clusters: Vec<ClusterReport>,
    /// Set when teardown ran
    pub teardown: Option<TeardownSummary>,
}

impl SuiteReport {
    pub fn new(clusters: Vec<ClusterReport>) -> Self {
        Self {
            clusters,
            teardown: None,
        }
    }

    /// Report block for a topology label
    pub fn cluster(&self, label: &str) -> Option<&ClusterReport> {
        self.clusters.iter().find(|c| c.label == label)
    }

    fn count(&self, status: CheckStatus) -> usize {
        self.clusters
            .iter()
            .flat_map(|c| &c.checks)
            .filter(|c| c.status == status)
            .count()
    }

    /// Failed plus errored lines
    pub fn failed_count(&self) -> usize {
        self.count(CheckStatus::Failed) + self.count(CheckStatus::Errored)
    }

    pub fn passed(&self) -> bool {
        self.failed_count() == 0
    }

    /// Emit the summary through tracing
    pub fn log_summary(&self) {
        for cluster in &self.clusters {
            for check in cluster.checks.iter().filter(|c| c.status.is_failure()) {
                error!(
                    topology = %cluster.label,
                    cluster = %cluster.cluster,
                    check = %check.check,
                    "{}",
                    check.detail
                );
            }
        }
        info!(
            passed = self.count(CheckStatus::Passed),
            failed = self.count(CheckStatus::Failed),
            skipped = self.count(CheckStatus::Skipped),
            errored = self.count(CheckStatus::Errored),
            "Suite finished"
        );
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", RULE)?;
        writeln!(f, "  REGISTRY MIRROR COMPLIANCE")?;
        writeln!(f, "{}", RULE)?;
        for cluster in &self.clusters {
            match &cluster.cluster_id {
                Some(id) if id != &cluster.cluster => {
                    writeln!(f, "  [{}] {} ({})", cluster.label, cluster.cluster, id)?
                }
                _ => writeln!(f, "  [{}] {}", cluster.label, cluster.cluster)?,
            }
            for check in &cluster.checks {
                write!(
                    f,
                    "    {:<5} {:<16} {}",
                    check.status.label(),
                    check.check,
                    check.detail
                )?;
                if let Some(anomaly) = check.anomaly {
                    write!(f, " (anomaly: {})", anomaly)?;
                }
                writeln!(f)?;
            }
        }
        writeln!(f, "{}", THIN_RULE)?;
        writeln!(
            f,
            "  {} passed, {} failed, {} skipped, {} errored",
            self.count(CheckStatus::Passed),
            self.count(CheckStatus::Failed),
            self.count(CheckStatus::Skipped),
            self.count(CheckStatus::Errored)
        )?;
        if let Some(teardown) = &self.teardown {
            writeln!(
                f,
                "  teardown: {} deleted, {} failed",
                teardown.deleted.len(),
                teardown.failed.len()
            )?;
            for (resource, reason) in &teardown.failed {
                writeln!(f, "    -> {}: {}", resource, reason)?;
            }
        }
        write!(f, "{}", RULE)
    }
}
