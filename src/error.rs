//! Crate-level error type.
//!
//! Maps one-to-one onto the failure policy: validation surfaces as 4xx,
//! oracle and storage failures as 5xx, conflicts are resolved internally
//! by the ingest pipeline and normally never reach a caller.

use crate::oracle::OracleError;
use crate::storage::StorageError;
use thiserror::Error;

/// Errors surfaced by [`crate::AtlasEngine`] operations.
#[derive(Debug, Error)]
pub enum AtlasError {
    /// Idea text outside the 5–320 character bounds after normalization.
    #[error("INVALID_LENGTH: idea text must be between 5 and 320 characters (got {0})")]
    InvalidLength(usize),

    /// Bad input: malformed UUID, out-of-range parameter, unknown stance.
    #[error("validation error: {0}")]
    Validation(String),

    /// Embedding or LLM request failed. Fatal for ingest; relation
    /// classification degrades to neutral instead of raising this.
    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),

    /// Requested idea or topic does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate-key race that could not be resolved by re-reading the
    /// surviving row.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Database failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Unexpected failure (schema drift, poisoned state).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for AtlasError {
    fn from(e: rusqlite::Error) -> Self {
        AtlasError::Storage(StorageError::Database(e))
    }
}

/// Result type for engine operations.
pub type AtlasResult<T> = Result<T, AtlasError>;
