//! Local store for notesync

mod connection;
mod migrations;
mod repository;
mod store;

pub use connection::{Database, LocalStore};
pub use migrations::CURRENT_VERSION as SCHEMA_VERSION;
pub use repository::NoteRepository;
pub(crate) use repository::{rearm_failed_ops, settle_note_status};
pub use store::StoreTx;
