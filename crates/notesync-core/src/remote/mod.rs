//! Remote note service contract.
//!
//! The sync engine talks to the remote store only through [`RemoteNoteService`].
//! [`RestNoteService`] speaks the PostgREST-style HTTP API; [`InMemoryNoteService`]
//! is a local stand-in with fault injection.

mod memory;
mod rest;

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::NotePayload;

pub use memory::{InMemoryNoteService, RemoteCall};
pub use rest::{RestNoteService, RestServiceConfig};

/// Failures reported by the remote boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Transport failure, remote unreachable
    #[error("Network error: {0}")]
    Network(String),

    /// Request exceeded its time bound
    #[error("Remote request timed out")]
    Timeout,

    /// Remote server failed (408, 429, 5xx)
    #[error("Remote service unavailable ({status}): {message}")]
    Unavailable { status: u16, message: String },

    /// The remote note no longer exists
    #[error("Remote note not found")]
    NotFound,

    /// The remote note's version no longer matches the expected base version
    #[error("Remote note changed concurrently (remote version {remote_version})")]
    Conflict { remote_version: i64 },

    /// Permanent refusal (validation, authorization)
    #[error("Remote service rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl RemoteError {
    /// Whether the failure is worth retrying with backoff
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout | Self::Unavailable { .. }
        )
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// A note as stored by the remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNote {
    pub id: String,
    pub title: String,
    pub body: String,
    pub version: i64,
    pub updated_at: i64,
}

/// Result of a full list request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSnapshot {
    pub notes: Vec<RemoteNote>,
    /// Opaque validator for the next conditional fetch
    pub cursor: Option<String>,
}

/// Contract implemented by every remote note store.
///
/// All calls are for the configured user only.
pub trait RemoteNoteService: Send + Sync + 'static {
    /// List every remote note.
    ///
    /// Returns `None` when `cursor` still matches the remote collection.
    fn fetch_all(
        &self,
        cursor: Option<&str>,
    ) -> impl Future<Output = RemoteResult<Option<RemoteSnapshot>>> + Send;

    /// Create a note, returning it with its remote id
    fn create(&self, payload: &NotePayload)
        -> impl Future<Output = RemoteResult<RemoteNote>> + Send;

    /// Replace the note's content when its remote version equals `base_version`.
    ///
    /// Fails with [`RemoteError::Conflict`] on a version mismatch and
    /// [`RemoteError::NotFound`] when the note is gone.
    fn update(
        &self,
        remote_id: &str,
        payload: &NotePayload,
        base_version: i64,
    ) -> impl Future<Output = RemoteResult<RemoteNote>> + Send;

    /// Delete a note. Deleting a missing note reports [`RemoteError::NotFound`].
    fn delete(&self, remote_id: &str) -> impl Future<Output = RemoteResult<()>> + Send;
}
