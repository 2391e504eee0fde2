//! Error types for the QA and upsert engine

use thiserror::Error;

use crate::database::DatabaseError;

/// Errors that abort a run
///
/// QA findings are not errors: they are recorded in the control table and
/// only become [`UpsertError::QaFailed`] at the command-line boundary.
#[derive(Error, Debug)]
pub enum UpsertError {
    /// Invalid run configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Base or staging schema does not exist
    #[error("Invalid schema(s): {0}")]
    InvalidSchemas(String),

    /// One or more base or staging tables do not exist
    #[error("Invalid table(s): {0}")]
    InvalidTables(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// The operator cancelled the run
    #[error("Script cancelled by user")]
    Cancelled,

    /// QA checks found errors; nothing was upserted
    #[error("QA checks failed for: {0}")]
    QaFailed(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// Result type for engine operations
pub type UpsertResult<T> = Result<T, UpsertError>;
