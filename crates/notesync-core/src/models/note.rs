//! Note model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Local identifier for a note, using UUID v7 (time-sortable).
///
/// Assigned at local creation and never reused, even after the note is purged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NoteId(Uuid);

impl NoteId {
    /// Create a new unique note ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for NoteId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NoteId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Reconciliation state of a note as seen by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Local state matches the last known remote state
    Synced,
    /// Local mutations not yet confirmed remotely
    #[default]
    Pending,
    /// A remote call for this note is in flight
    Syncing,
    /// Remote state diverged from the expected base version
    Conflict,
    /// Delivery failed permanently or the remote rejected the mutation
    Failed,
}

impl SyncStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Conflict => "conflict",
            Self::Failed => "failed",
        }
    }

    /// Whether the note needs explicit user action before it can sync.
    #[must_use]
    pub const fn is_unresolved(self) -> bool {
        matches!(self, Self::Conflict | Self::Failed)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "synced" => Ok(Self::Synced),
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "conflict" => Ok(Self::Conflict),
            "failed" => Ok(Self::Failed),
            other => Err(Error::Storage(format!("unknown sync status: {other}"))),
        }
    }
}

/// User-supplied note content for create and update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteInput {
    pub title: String,
    #[serde(default)]
    pub body: String,
}

impl NoteInput {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }

    /// Trim both fields and reject an empty title.
    pub fn normalized(&self) -> Result<Self> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(Error::Validation("Note title cannot be empty".to_string()));
        }
        Ok(Self {
            title: title.to_string(),
            body: self.body.trim().to_string(),
        })
    }
}

/// A note in the local store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Stable local identifier
    pub local_id: NoteId,
    /// Identifier assigned by the remote service after the first successful create
    pub remote_id: Option<String>,
    pub title: String,
    pub body: String,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last local mutation timestamp (Unix ms)
    pub updated_at: i64,
    /// Local revision counter, bumped on every local mutation
    pub version: i64,
    /// Last version observed on the remote service
    pub remote_version: Option<i64>,
    pub sync_status: SyncStatus,
    /// Tombstone kept until the remote delete is confirmed
    pub deleted: bool,
}

impl Note {
    /// Create a new, never-synced note at version 1
    #[must_use]
    pub fn new(input: &NoteInput) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            local_id: NoteId::new(),
            remote_id: None,
            title: input.title.clone(),
            body: input.body.clone(),
            created_at: now,
            updated_at: now,
            version: 1,
            remote_version: None,
            sync_status: SyncStatus::Pending,
            deleted: false,
        }
    }

    /// Whether the remote service has ever acknowledged this note
    #[must_use]
    pub const fn is_known_remotely(&self) -> bool {
        self.remote_id.is_some()
    }

    /// Snapshot of the fields replayed against the remote service
    #[must_use]
    pub fn payload(&self) -> NotePayload {
        NotePayload {
            title: self.title.clone(),
            body: self.body.clone(),
            version: self.version,
            updated_at: self.updated_at,
        }
    }

    /// Get first line of the body as a preview, truncated to `max_len` characters
    #[must_use]
    pub fn body_preview(&self, max_len: usize) -> String {
        self.body
            .lines()
            .next()
            .unwrap_or("")
            .chars()
            .take(max_len)
            .collect()
    }
}

/// Full note fields captured when an operation is enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotePayload {
    pub title: String,
    pub body: String,
    pub version: i64,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_id_unique() {
        let id1 = NoteId::new();
        let id2 = NoteId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_note_id_parse() {
        let id = NoteId::new();
        let parsed: NoteId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_note_new() {
        let note = Note::new(&NoteInput::new("Groceries", "milk"));
        assert_eq!(note.title, "Groceries");
        assert_eq!(note.version, 1);
        assert_eq!(note.sync_status, SyncStatus::Pending);
        assert!(!note.deleted);
        assert!(!note.is_known_remotely());
        assert_eq!(note.created_at, note.updated_at);
    }

    #[test]
    fn test_input_rejects_blank_title() {
        let err = NoteInput::new("   ", "body").normalized().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_input_trims_fields() {
        let input = NoteInput::new("  Title ", "\n body \n").normalized().unwrap();
        assert_eq!(input.title, "Title");
        assert_eq!(input.body, "body");
    }

    #[test]
    fn test_sync_status_roundtrip_str() {
        for status in [
            SyncStatus::Synced,
            SyncStatus::Pending,
            SyncStatus::Syncing,
            SyncStatus::Conflict,
            SyncStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn test_body_preview() {
        let note = Note::new(&NoteInput::new("t", "First line\nSecond line"));
        assert_eq!(note.body_preview(50), "First line");
        assert_eq!(note.body_preview(5), "First");
    }
}
