//! notesync-core - Offline-first notes sync library
//!
//! This crate contains the local store, note repository, connectivity monitor,
//! remote service clients, sync engine, and application state facade used by
//! every notesync interface.

pub mod background;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod state;
pub mod sync;
pub mod util;

pub use background::{BackgroundTrigger, SyncMessage};
pub use config::SyncConfig;
pub use connectivity::{ConnectivityMonitor, ReachabilityProbe};
pub use db::{LocalStore, NoteRepository};
pub use error::{Error, Result};
pub use models::{Note, NoteId, NoteInput, OperationKind, PendingOperation, SyncMeta, SyncStatus};
pub use remote::{
    InMemoryNoteService, RemoteError, RemoteNote, RemoteNoteService, RestNoteService,
};
pub use state::{AppSnapshot, NotesApp, SyncState};
pub use sync::{EngineOptions, EngineStatus, SyncEngine, SyncResult};
