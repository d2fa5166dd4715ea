//! Error types for cadence operations.

use thiserror::Error;

/// Errors surfaced by the cadence service and store.
///
/// No operation retries internally; every failure propagates to the caller,
/// who decides whether the whole operation is safe to re-run.
#[derive(Error, Debug)]
pub enum CadenceError {
    #[error("cadence interval must be a positive number of days, got {days}")]
    InvalidCadence { days: i64 },

    #[error("{operation} failed: {source}")]
    Persistence {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("alert publish failed: {source}")]
    Publish {
        #[source]
        source: PublishError,
    },

    #[error("alert publish timed out after {seconds}s")]
    PublishTimeout { seconds: u64 },
}

impl CadenceError {
    pub fn persistence(operation: &'static str, source: sqlx::Error) -> Self {
        Self::Persistence { operation, source }
    }
}

/// Errors from alert publisher implementations.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("network error: {message}")]
    Network { message: String },

    #[error("publisher rejected batch: HTTP {status}")]
    Rejected { status: u16 },

    #[error("service unavailable")]
    ServiceUnavailable,
}
