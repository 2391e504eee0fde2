//! CLI-specific error types

use std::path::PathBuf;
use thiserror::Error;

use crate::database::DatabaseError;
use crate::error::UpsertError;

/// CLI-specific error type
#[derive(Error, Debug)]
pub enum CliError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error(transparent)]
    Upsert(#[from] UpsertError),
}

impl From<DatabaseError> for CliError {
    fn from(err: DatabaseError) -> Self {
        CliError::Upsert(UpsertError::Database(err))
    }
}
