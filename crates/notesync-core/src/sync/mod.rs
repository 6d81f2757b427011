//! Sync engine: replays queued operations against the remote service and pulls
//! remote changes back into the local store.

mod engine;
mod retry;

pub use engine::{EngineOptions, EngineStatus, SyncEngine, SyncResult, REQUEST_TIMEOUT_MS};
pub use retry::{RetryPolicy, MAX_RETRY_COUNT, RETRY_DELAY_MS};
