//! Error types for the CLI

use mirrorguard_common::telemetry::TelemetryError;

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Suite(#[from] mirrorguard_common::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("logging error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("{failed} check(s) failed")]
    SuiteFailed { failed: usize },
}

impl Error {
    pub fn suite_failed(failed: usize) -> Self {
        Error::SuiteFailed { failed }
    }
}
