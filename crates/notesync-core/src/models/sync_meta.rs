//! Sync metadata model

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Singleton bookkeeping record for reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMeta {
    /// Unix ms of the last pass that reached the remote service
    pub last_sync_attempt_at: Option<i64>,
    /// Unix ms of the last pass in which any remote interaction succeeded
    pub last_sync_success_at: Option<i64>,
    /// Opaque list cursor (ETag) from the last pull
    pub cursor: Option<String>,
    /// Remote ids present in the last pull
    pub known_remote_ids: BTreeSet<String>,
}
