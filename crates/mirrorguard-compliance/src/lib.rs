//! Compliance checks over a point-in-time pod snapshot
//!
//! Two checks run against the same snapshot shape:
//! - [`checker::check_registry_prefix`]: every container image is served by
//!   the expected registry host
//! - [`checker::check_pod_status`]: every pod is running or completed and no
//!   container is crash-looping
//!
//! Both are pure functions of their input; fetching the snapshot is the
//! caller's job.

#![deny(missing_docs)]

pub mod checker;
pub mod image;
pub mod result;

pub use checker::{check_pod_status, check_registry_prefix, MAX_UNEXPECTED_RESTARTS};
pub use result::{Anomaly, CheckKind, ValidationResult, Violation, ViolationKind};
