//! ==============================================================================
//! error.rs - error taxonomy for the hub
//! ==============================================================================
//!
//! purpose:
//!     one enum per component boundary. only `IngestError::InvalidEnvelope`
//!     rejects a reading outright; coercion failures and skipped estimators
//!     never leave their module as errors.
//!
//! relationships:
//!     - used by: normalizer.rs, estimator.rs, period.rs, store.rs, export.rs
//!     - mapped to http status codes by: server.rs (ApiError)
//!
//! ==============================================================================

use thiserror::Error;

/// ingest failures surfaced to the sender
#[derive(Debug, Error)]
pub enum IngestError {
    /// the only hard rejection of an incoming envelope
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// persistence failures from the history store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("migration to schema version {version} failed: {reason}")]
    Migration { version: i64, reason: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// collection-period lifecycle failures
#[derive(Debug, Error)]
pub enum PeriodError {
    #[error("a collection period is already active (id {active_id})")]
    Conflict { active_id: i64 },

    #[error("no collection period is active")]
    NotActive,

    #[error("period {0} not found")]
    NotFound(i64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// reasons a derived field was left absent
#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("estimator unavailable: {0}")]
    Unavailable(String),

    #[error("missing input field {0}")]
    InputIncomplete(&'static str),

    #[error("model error: {0}")]
    Model(String),
}

/// failures while writing or reading a period export
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("export buffer error: {0}")]
    Buffer(String),

    #[error("invalid timestamp in export: {0}")]
    Timestamp(String),
}
