//! Error types for notesync-core

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias using notesync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in notesync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Rejected user input (never retried)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Local persistence failure (quota, engine not initialized, SQL failure)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Note not found (or already tombstoned)
    #[error("Note not found: {0}")]
    NotFound(String),

    /// Remote service failure
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Another reconciliation pass is already running
    #[error("A sync pass is already in progress")]
    SyncInProgress,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(error: rusqlite::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

impl Error {
    /// Whether this error came from local persistence.
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}
