use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] notesync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No note title provided")]
    EmptyTitle,
    #[error("Edited note content cannot be empty")]
    EmptyEditedContent,
    #[error("Note ID cannot be empty")]
    EmptyNoteId,
    #[error("Note not found for id/prefix: {0}")]
    NoteNotFound(String),
    #[error("{0}")]
    AmbiguousNoteId(String),
    #[error("Editor command failed: {0}")]
    EditorFailed(String),
    #[error("Sync finished with problems: {0}")]
    SyncIncomplete(String),
    #[error(
        "Sync is not configured. Set NOTESYNC_API_URL, NOTESYNC_API_KEY and NOTESYNC_USER_ID, or add them to the config file."
    )]
    SyncNotConfigured,
}
