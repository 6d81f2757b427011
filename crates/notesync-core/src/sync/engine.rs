//! Reconciliation of the pending queue against the remote service.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use super::retry::RetryPolicy;
use crate::connectivity::ConnectivityMonitor;
use crate::db::{rearm_failed_ops, settle_note_status, LocalStore, StoreTx};
use crate::error::{Error, Result};
use crate::models::{Note, NoteId, OperationKind, PendingOperation, SyncStatus};
use crate::remote::{RemoteError, RemoteNote, RemoteNoteService, RemoteResult, RemoteSnapshot};
use crate::util::now_millis;

/// Default bound on a single remote call
pub const REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    /// Queue drained with no conflicts, failures, or pull errors
    pub success: bool,
    /// Operations confirmed by the remote service during the pass
    pub synced: usize,
    pub error: Option<String>,
    /// Notes currently in `conflict` or `failed` state
    pub unresolved: Vec<NoteId>,
    /// Remote changes applied locally
    pub pulled: usize,
}

impl SyncResult {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Observable engine state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStatus {
    pub is_syncing: bool,
    pub pending_count: usize,
    pub last_result: Option<SyncResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    /// Pull remote changes after pushing
    pub pull: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_millis(REQUEST_TIMEOUT_MS),
            pull: true,
        }
    }
}

type PassOutcome = std::result::Result<SyncResult, String>;

/// Drains pending operations against a [`RemoteNoteService`].
///
/// At most one pass runs per engine. Clones share the pass slot and status.
pub struct SyncEngine<R> {
    inner: Arc<EngineInner<R>>,
}

impl<R> Clone for SyncEngine<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct EngineInner<R> {
    store: LocalStore,
    remote: R,
    connectivity: ConnectivityMonitor,
    options: EngineOptions,
    in_flight: Mutex<Option<watch::Receiver<Option<PassOutcome>>>>,
    status: watch::Sender<EngineStatus>,
}

impl<R: RemoteNoteService> SyncEngine<R> {
    pub fn new(
        store: LocalStore,
        remote: R,
        connectivity: ConnectivityMonitor,
        options: EngineOptions,
    ) -> Self {
        let (status, _) = watch::channel(EngineStatus::default());
        Self {
            inner: Arc::new(EngineInner {
                store,
                remote,
                connectivity,
                options,
                in_flight: Mutex::new(None),
                status,
            }),
        }
    }

    pub fn remote(&self) -> &R {
        &self.inner.remote
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.inner.connectivity
    }

    pub fn status(&self) -> EngineStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.status.borrow().is_syncing
    }

    /// Run a pass, or wait for the one already in flight and share its result.
    ///
    /// The pass runs on its own task; dropping the returned future does not
    /// cancel it.
    pub async fn sync_notes(&self) -> Result<SyncResult> {
        let receiver = {
            let mut slot = self.inner.slot();
            match slot.as_ref() {
                Some(receiver) => {
                    tracing::debug!("Joining sync pass already in flight");
                    receiver.clone()
                }
                None => self.start_pass(&mut slot),
            }
        };
        wait_for_outcome(receiver).await
    }

    /// Run a pass, failing with [`Error::SyncInProgress`] if one is in flight
    pub async fn try_sync_notes(&self) -> Result<SyncResult> {
        let receiver = {
            let mut slot = self.inner.slot();
            if slot.is_some() {
                return Err(Error::SyncInProgress);
            }
            self.start_pass(&mut slot)
        };
        wait_for_outcome(receiver).await
    }

    /// Re-arm permanently failed operations. Returns how many were re-armed.
    pub async fn retry_failed(&self) -> Result<usize> {
        let rearmed = self.inner.store.transaction(rearm_failed_ops).await?;

        if rearmed > 0 {
            tracing::info!(notes = rearmed, "Re-armed failed operations");
        }
        self.refresh_pending_count().await?;
        Ok(rearmed)
    }

    /// Re-settle notes left in `syncing` by an interrupted pass
    pub async fn recover_interrupted(&self) -> Result<usize> {
        self.inner.store.transaction(recover_interrupted).await
    }

    /// Re-read the queue length and publish it
    pub async fn refresh_pending_count(&self) -> Result<usize> {
        self.inner.refresh_pending_count().await
    }

    fn start_pass(
        &self,
        slot: &mut Option<watch::Receiver<Option<PassOutcome>>>,
    ) -> watch::Receiver<Option<PassOutcome>> {
        let (sender, receiver) = watch::channel(None);
        *slot = Some(receiver.clone());
        self.inner
            .status
            .send_modify(|status| status.is_syncing = true);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let guard = PassGuard {
                inner: Arc::clone(&inner),
            };

            let outcome = inner.run_pass().await.map_err(|error| {
                tracing::error!("Sync pass aborted: {}", error);
                error.to_string()
            });
            let last_result = match &outcome {
                Ok(result) => result.clone(),
                Err(message) => SyncResult::failed(message.clone()),
            };
            inner
                .status
                .send_modify(|status| status.last_result = Some(last_result));

            drop(guard);
            sender.send_replace(Some(outcome));
        });

        receiver
    }
}

async fn wait_for_outcome(
    mut receiver: watch::Receiver<Option<PassOutcome>>,
) -> Result<SyncResult> {
    let outcome = receiver
        .wait_for(Option::is_some)
        .await
        .map_err(|_| Error::Storage("sync pass ended without a result".to_string()))?
        .clone();

    match outcome {
        Some(Ok(result)) => Ok(result),
        Some(Err(message)) => Err(Error::Storage(message)),
        None => Err(Error::Storage("sync pass ended without a result".to_string())),
    }
}

/// Releases the pass slot even if the pass panics
struct PassGuard<R> {
    inner: Arc<EngineInner<R>>,
}

impl<R> Drop for PassGuard<R> {
    fn drop(&mut self) {
        *self.inner.slot() = None;
        self.inner
            .status
            .send_modify(|status| status.is_syncing = false);
    }
}

/// Per-pass bookkeeping
#[derive(Default)]
struct Pass {
    blocked: HashSet<NoteId>,
    synced: usize,
    errors: Vec<String>,
    transport_failed: bool,
    reached_remote: bool,
}

impl Pass {
    fn block(&mut self, id: NoteId) {
        self.blocked.insert(id);
    }
}

enum Delivery {
    /// The note now exists remotely under this representation
    Stored(RemoteNote),
    /// The remote note is gone
    Deleted,
}

impl<R> EngineInner<R> {
    fn slot(&self) -> MutexGuard<'_, Option<watch::Receiver<Option<PassOutcome>>>> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn refresh_pending_count(&self) -> Result<usize> {
        let pending = self.store.read(|tx| tx.count_ops()).await?;
        self.status
            .send_if_modified(|status| {
                let changed = status.pending_count != pending;
                status.pending_count = pending;
                changed
            });
        Ok(pending)
    }
}

impl<R: RemoteNoteService> EngineInner<R> {
    async fn run_pass(&self) -> Result<SyncResult> {
        self.refresh_pending_count().await?;

        if !self.connectivity.is_online() {
            tracing::info!("Skipping sync pass while offline");
            return Ok(SyncResult::failed("offline"));
        }

        let started_at = now_millis();
        let ops = self
            .store
            .transaction(|tx| {
                recover_interrupted(tx)?;
                tx.list_ops()
            })
            .await?;
        tracing::debug!(queued = ops.len(), "Starting sync pass");

        let mut pass = Pass::default();
        for op in ops {
            if pass.blocked.contains(&op.note_id) {
                continue;
            }
            if !op.is_eligible(started_at) {
                pass.block(op.note_id);
                continue;
            }
            self.replay(op.op_id, &mut pass).await?;
            self.refresh_pending_count().await?;
        }

        let mut pulled = 0;
        let mut pull_error = None;
        if self.options.pull && !pass.transport_failed {
            match self.pull().await {
                Ok(count) => {
                    pulled = count;
                    pass.reached_remote = true;
                }
                Err(Error::Remote(error)) => {
                    tracing::warn!("Pull failed: {}", error);
                    pull_error = Some(error.to_string());
                }
                Err(error) => return Err(error),
            }
        }

        let reached_remote = pass.reached_remote;
        let (remaining, unresolved) = self
            .store
            .transaction(move |tx| {
                let mut meta = tx.get_meta()?;
                meta.last_sync_attempt_at = Some(started_at);
                if reached_remote {
                    meta.last_sync_success_at = Some(now_millis());
                }
                tx.put_meta(&meta)?;

                let unresolved = tx
                    .list_notes()?
                    .into_iter()
                    .filter(|note| note.sync_status.is_unresolved())
                    .map(|note| note.local_id)
                    .collect::<Vec<_>>();
                Ok((tx.count_ops()?, unresolved))
            })
            .await?;
        self.refresh_pending_count().await?;

        let mut errors = pass.errors;
        errors.extend(pull_error);
        let success = remaining == 0 && unresolved.is_empty() && errors.is_empty();
        let error = if success {
            None
        } else if errors.is_empty() {
            Some(match (remaining, unresolved.len()) {
                (0, conflicts) => format!("{conflicts} notes need attention"),
                (remaining, _) => format!("{remaining} operations still pending"),
            })
        } else {
            Some(errors.join("; "))
        };

        let result = SyncResult {
            success,
            synced: pass.synced,
            error,
            unresolved,
            pulled,
        };
        tracing::info!(
            success = result.success,
            synced = result.synced,
            pulled = result.pulled,
            remaining,
            "Sync pass finished"
        );
        Ok(result)
    }

    /// Replay one operation. Only storage failures are returned as errors.
    async fn replay(&self, op_id: i64, pass: &mut Pass) -> Result<()> {
        let claimed = self
            .store
            .transaction(move |tx| {
                let Some(op) = tx.get_op(op_id)? else {
                    return Ok(None);
                };
                let Some(note) = tx.get_note(&op.note_id)? else {
                    tx.delete_op(op_id)?;
                    return Ok(None);
                };
                if note.sync_status != SyncStatus::Conflict {
                    tx.set_note_status(&note.local_id, SyncStatus::Syncing)?;
                }
                Ok(Some((op, note)))
            })
            .await?;

        // Superseded by a local action since the pass started.
        let Some((op, note)) = claimed else {
            return Ok(());
        };

        if note.sync_status == SyncStatus::Conflict {
            pass.block(note.local_id);
            return Ok(());
        }

        tracing::debug!(note = %note.local_id, op = op.op_id, kind = %op.kind, "Replaying operation");
        match self.deliver(&op, &note).await {
            Ok(delivery) => {
                pass.reached_remote = true;
                if self.confirm(&op, delivery).await? {
                    pass.synced += 1;
                }
                Ok(())
            }
            Err(error) => {
                pass.block(note.local_id);
                self.record_failure(op, error, pass).await
            }
        }
    }

    async fn deliver(&self, op: &PendingOperation, note: &Note) -> RemoteResult<Delivery> {
        let payload = op.payload.clone().unwrap_or_else(|| note.payload());

        match (op.kind, note.remote_id.as_deref()) {
            (OperationKind::Create, Some(remote_id)) => {
                tracing::debug!(note = %note.local_id, remote_id, "Create already applied remotely");
                Ok(Delivery::Stored(RemoteNote {
                    id: remote_id.to_string(),
                    title: payload.title,
                    body: payload.body,
                    version: note.remote_version.unwrap_or(payload.version),
                    updated_at: payload.updated_at,
                }))
            }
            (OperationKind::Create | OperationKind::Update, None) => self
                .call(self.remote.create(&payload))
                .await
                .map(Delivery::Stored),
            (OperationKind::Update, Some(remote_id)) => {
                match self
                    .call(self.remote.update(remote_id, &payload, op.base_version))
                    .await
                {
                    Err(RemoteError::NotFound) => {
                        tracing::info!(note = %note.local_id, "Remote note gone, recreating from local edit");
                        self.call(self.remote.create(&payload))
                            .await
                            .map(Delivery::Stored)
                    }
                    other => other.map(Delivery::Stored),
                }
            }
            (OperationKind::Delete, None) => Ok(Delivery::Deleted),
            (OperationKind::Delete, Some(remote_id)) => {
                match self.call(self.remote.delete(remote_id)).await {
                    Ok(()) | Err(RemoteError::NotFound) => Ok(Delivery::Deleted),
                    Err(error) => Err(error),
                }
            }
        }
    }

    /// Record a delivered operation. Returns `false` when the note vanished
    /// locally mid-flight and the remote copy was rolled back.
    async fn confirm(&self, op: &PendingOperation, delivery: Delivery) -> Result<bool> {
        let op_id = op.op_id;
        let note_id = op.note_id;

        let orphan = match delivery {
            Delivery::Deleted => {
                self.store
                    .transaction(move |tx| {
                        tx.delete_ops_for_note(&note_id)?;
                        tx.delete_note(&note_id)
                    })
                    .await?;
                tracing::debug!(note = %note_id, "Remote delete confirmed");
                None
            }
            Delivery::Stored(remote) => {
                self.store
                    .transaction(move |tx| {
                        let Some(mut note) = tx.get_note(&note_id)? else {
                            return Ok(Some(remote.id));
                        };
                        note.remote_id = Some(remote.id);
                        note.remote_version = Some(remote.version);
                        tx.put_note(&note)?;
                        tx.delete_op(op_id)?;
                        settle_note_status(tx, &note_id)?;
                        Ok(None)
                    })
                    .await?
            }
        };

        let Some(remote_id) = orphan else {
            return Ok(true);
        };
        tracing::warn!(note = %note_id, remote_id = %remote_id, "Note deleted during create, removing remote copy");
        if let Err(error) = self.call(self.remote.delete(&remote_id)).await {
            tracing::warn!("Failed to remove orphaned remote note {}: {}", remote_id, error);
        }
        Ok(false)
    }

    async fn record_failure(
        &self,
        mut op: PendingOperation,
        error: RemoteError,
        pass: &mut Pass,
    ) -> Result<()> {
        let note_id = op.note_id;
        let message = error.to_string();
        op.last_error = Some(message.clone());

        match error {
            RemoteError::Conflict { remote_version } => {
                tracing::warn!(note = %note_id, remote_version, "Conflict on update");
                self.store
                    .transaction(move |tx| {
                        if let Some(mut note) = tx.get_note(&note_id)? {
                            note.remote_version = Some(remote_version);
                            note.sync_status = SyncStatus::Conflict;
                            tx.put_note(&note)?;
                        }
                        tx.put_op(&op)
                    })
                    .await?;
                pass.errors
                    .push(format!("note {note_id} conflicts with a newer remote version"));
            }
            error if error.is_transient() => {
                pass.transport_failed = true;
                op.retry_count += 1;
                let exhausted = self.options.retry.is_exhausted(op.retry_count);
                if exhausted {
                    op.failed = true;
                    tracing::warn!(note = %note_id, retries = op.retry_count, "Giving up on operation: {}", message);
                    pass.errors.push(format!("note {note_id} failed to sync: {message}"));
                } else {
                    let delay = self.options.retry.backoff(op.retry_count);
                    let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
                    op.next_attempt_at = now_millis().saturating_add(delay_ms);
                    tracing::warn!(
                        note = %note_id,
                        retries = op.retry_count,
                        delay_ms,
                        "Operation failed, will retry: {}",
                        message
                    );
                    pass.errors.push(message);
                }

                self.store
                    .transaction(move |tx| {
                        tx.put_op(&op)?;
                        settle_note_status(tx, &note_id)?;
                        Ok(())
                    })
                    .await?;
            }
            _ => {
                tracing::warn!(note = %note_id, op = op.op_id, "Remote rejected operation: {}", message);
                let (op_id, kind) = (op.op_id, op.kind);
                self.store
                    .transaction(move |tx| {
                        tx.delete_op(op_id)?;
                        let Some(mut note) = tx.get_note(&note_id)? else {
                            return Ok(());
                        };
                        // The remote copy survives a rejected delete.
                        if kind == OperationKind::Delete {
                            note.deleted = false;
                        }
                        note.sync_status = SyncStatus::Failed;
                        tx.put_note(&note)
                    })
                    .await?;
                pass.errors.push(format!("note {note_id} was rejected: {message}"));
            }
        }
        Ok(())
    }

    async fn pull(&self) -> Result<usize> {
        let cursor = self.store.read(|tx| tx.get_meta()).await?.cursor;
        let Some(snapshot) = self.call(self.remote.fetch_all(cursor.as_deref())).await? else {
            tracing::debug!("Remote notes unchanged since last pull");
            return Ok(0);
        };

        let pulled = self
            .store
            .transaction(move |tx| apply_snapshot(tx, snapshot))
            .await?;
        if pulled > 0 {
            tracing::info!(pulled, "Applied remote changes");
        }
        Ok(pulled)
    }

    async fn call<T>(&self, request: impl Future<Output = RemoteResult<T>>) -> RemoteResult<T> {
        tokio::time::timeout(self.options.request_timeout, request)
            .await
            .unwrap_or(Err(RemoteError::Timeout))
    }
}

fn recover_interrupted(tx: &StoreTx<'_>) -> Result<usize> {
    let stale = tx
        .list_notes()?
        .into_iter()
        .filter(|note| note.sync_status == SyncStatus::Syncing)
        .collect::<Vec<_>>();

    for note in &stale {
        settle_note_status(tx, &note.local_id)?;
    }
    if !stale.is_empty() {
        tracing::info!(notes = stale.len(), "Recovered notes from an interrupted sync pass");
    }
    Ok(stale.len())
}

/// Merge a remote listing into the store. A local pending operation always wins.
fn apply_snapshot(tx: &StoreTx<'_>, snapshot: RemoteSnapshot) -> Result<usize> {
    let mut meta = tx.get_meta()?;
    let remote_ids = snapshot
        .notes
        .iter()
        .map(|note| note.id.clone())
        .collect::<BTreeSet<_>>();
    let mut applied = 0;

    for remote in snapshot.notes {
        match tx.get_note_by_remote_id(&remote.id)? {
            None => {
                tx.put_note(&Note {
                    local_id: NoteId::new(),
                    remote_id: Some(remote.id),
                    title: remote.title,
                    body: remote.body,
                    created_at: remote.updated_at,
                    updated_at: remote.updated_at,
                    version: remote.version,
                    remote_version: Some(remote.version),
                    sync_status: SyncStatus::Synced,
                    deleted: false,
                })?;
                applied += 1;
            }
            Some(mut local) => {
                let contested =
                    local.deleted || !tx.list_ops_for_note(&local.local_id)?.is_empty();
                let newer = remote.version > local.remote_version.unwrap_or(0);
                if contested || !newer {
                    continue;
                }

                local.title = remote.title;
                local.body = remote.body;
                local.updated_at = remote.updated_at;
                local.version = remote.version;
                local.remote_version = Some(remote.version);
                local.sync_status = SyncStatus::Synced;
                tx.put_note(&local)?;
                applied += 1;
            }
        }
    }

    for gone in meta.known_remote_ids.difference(&remote_ids) {
        let Some(local) = tx.get_note_by_remote_id(gone)? else {
            continue;
        };
        if tx.list_ops_for_note(&local.local_id)?.is_empty() {
            tx.delete_note(&local.local_id)?;
            applied += 1;
        }
    }

    meta.known_remote_ids = remote_ids;
    meta.cursor = snapshot.cursor;
    tx.put_meta(&meta)?;
    Ok(applied)
}
