//! Data models for notesync

mod note;
mod pending_operation;
mod sync_meta;

pub use note::{Note, NoteId, NoteInput, NotePayload, SyncStatus};
pub use pending_operation::{OperationKind, PendingOperation};
pub use sync_meta::SyncMeta;
