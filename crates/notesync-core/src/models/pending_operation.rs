//! Pending operation model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{NoteId, NotePayload};
use crate::error::{Error, Result};

/// Kind of queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::Storage(format!("unknown operation kind: {other}"))),
        }
    }
}

/// A local mutation waiting for remote confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Insertion-ordered identifier; `0` until the store assigns one
    pub op_id: i64,
    pub note_id: NoteId,
    pub kind: OperationKind,
    /// Full note fields for create/update, `None` for delete
    pub payload: Option<NotePayload>,
    /// Note version this operation was computed against
    pub base_version: i64,
    pub retry_count: u32,
    /// Enqueue time (Unix ms)
    pub created_at: i64,
    /// Earliest time (Unix ms) the operation may be attempted again
    pub next_attempt_at: i64,
    /// Retries exhausted; skipped until re-armed
    pub failed: bool,
    pub last_error: Option<String>,
}

impl PendingOperation {
    fn new(
        note_id: NoteId,
        kind: OperationKind,
        payload: Option<NotePayload>,
        base_version: i64,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            op_id: 0,
            note_id,
            kind,
            payload,
            base_version,
            retry_count: 0,
            created_at: now,
            next_attempt_at: now,
            failed: false,
            last_error: None,
        }
    }

    #[must_use]
    pub fn create(note_id: NoteId, payload: NotePayload) -> Self {
        Self::new(note_id, OperationKind::Create, Some(payload), 0)
    }

    #[must_use]
    pub fn update(note_id: NoteId, payload: NotePayload, base_version: i64) -> Self {
        Self::new(note_id, OperationKind::Update, Some(payload), base_version)
    }

    #[must_use]
    pub fn delete(note_id: NoteId, base_version: i64) -> Self {
        Self::new(note_id, OperationKind::Delete, None, base_version)
    }

    /// Whether the backoff window has elapsed at `now` (Unix ms)
    #[must_use]
    pub const fn is_eligible(&self, now: i64) -> bool {
        !self.failed && self.next_attempt_at <= now
    }
}
