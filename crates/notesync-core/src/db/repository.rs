//! Note repository implementation
//!
//! Every mutation writes the note and enqueues its pending operation in one
//! transaction. Nothing here talks to the network.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::models::{Note, NoteId, NoteInput, OperationKind, PendingOperation, SyncStatus};

use super::store::StoreTx;
use super::LocalStore;

/// Note-level operations over the local store
#[derive(Clone)]
pub struct NoteRepository {
    store: LocalStore,
}

impl NoteRepository {
    /// Create a new repository backed by the given store
    pub const fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Backing store handle
    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Create a note and queue its `create` operation
    pub async fn create_note(&self, input: &NoteInput) -> Result<Note> {
        let input = input.normalized()?;
        let note = Note::new(&input);

        let record = note.clone();
        self.store
            .transaction(move |tx| {
                tx.put_note(&record)?;
                tx.insert_op(&PendingOperation::create(record.local_id, record.payload()))?;
                Ok(())
            })
            .await?;

        tracing::debug!(note = %note.local_id, "Created note locally");
        Ok(note)
    }

    /// Update a note's content and queue an `update` operation
    pub async fn update_note(&self, id: &NoteId, input: &NoteInput) -> Result<Note> {
        let input = input.normalized()?;
        let id = *id;

        let note = self
            .store
            .transaction(move |tx| {
                let mut note = live_note(tx, &id)?;
                let base_version = prepare_for_mutation(tx, &mut note)?;

                note.title = input.title;
                note.body = input.body;
                note.updated_at = chrono::Utc::now().timestamp_millis();
                note.sync_status = SyncStatus::Pending;

                tx.put_note(&note)?;
                tx.insert_op(&PendingOperation::update(
                    note.local_id,
                    note.payload(),
                    base_version,
                ))?;
                Ok(note)
            })
            .await?;

        tracing::debug!(note = %note.local_id, version = note.version, "Updated note locally");
        Ok(note)
    }

    /// Delete a note.
    ///
    /// A note the remote service never learned about is removed outright together
    /// with its queued operations; otherwise it becomes a tombstone until the
    /// remote delete is confirmed.
    pub async fn delete_note(&self, id: &NoteId) -> Result<()> {
        let id = *id;

        let short_circuited = self
            .store
            .transaction(move |tx| {
                let mut note = live_note(tx, &id)?;

                if !note.is_known_remotely() {
                    tx.delete_ops_for_note(&id)?;
                    tx.delete_note(&id)?;
                    return Ok(true);
                }

                let base_version = prepare_for_mutation(tx, &mut note)?;
                note.deleted = true;
                note.updated_at = chrono::Utc::now().timestamp_millis();
                note.sync_status = SyncStatus::Pending;

                tx.put_note(&note)?;
                tx.insert_op(&PendingOperation::delete(note.local_id, base_version))?;
                Ok(false)
            })
            .await?;

        if short_circuited {
            tracing::debug!(note = %id, "Removed never-synced note without queueing a delete");
        } else {
            tracing::debug!(note = %id, "Tombstoned note pending remote delete");
        }
        Ok(())
    }

    /// Fetch a visible (non-tombstoned) note
    pub async fn get_note(&self, id: &NoteId) -> Result<Option<Note>> {
        let id = *id;
        let note = self.store.read(move |tx| tx.get_note(&id)).await?;
        Ok(note.filter(|note| !note.deleted))
    }

    /// Visible notes, most recently updated first
    pub async fn list_notes(&self) -> Result<Vec<Note>> {
        let notes = self.store.read(|tx| tx.list_notes()).await?;
        Ok(notes.into_iter().filter(|note| !note.deleted).collect())
    }

    /// Every stored note, including tombstones awaiting a confirmed remote delete
    pub async fn list_all_notes(&self) -> Result<Vec<Note>> {
        self.store.read(|tx| tx.list_notes()).await
    }

    /// Visible notes whose local id starts with `prefix`, at most `limit`
    pub async fn find_by_id_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<Note>> {
        let prefix = prefix.trim().to_ascii_lowercase();
        let notes = self.list_notes().await?;
        Ok(notes
            .into_iter()
            .filter(|note| note.local_id.as_str().starts_with(&prefix))
            .take(limit)
            .collect())
    }

    /// Notes in `conflict` or `failed` state, including tombstones
    pub async fn list_unresolved(&self) -> Result<Vec<Note>> {
        let notes = self.store.read(|tx| tx.list_notes()).await?;
        Ok(notes
            .into_iter()
            .filter(|note| note.sync_status.is_unresolved())
            .collect())
    }

    /// Re-arm permanently failed operations so the next pass retries them
    pub async fn retry_failed(&self) -> Result<usize> {
        self.store.transaction(rearm_failed_ops).await
    }

    /// Number of operations still waiting for remote confirmation
    pub async fn pending_count(&self) -> Result<usize> {
        self.store.read(|tx| tx.count_ops()).await
    }
}

/// Clear the failed flag and retry count of every failed operation, then
/// re-settle the affected notes. Returns the number of notes re-armed.
///
/// A `failed` note with nothing queued was rejected by the remote service.
/// A tombstone gets its `delete` queued again and a note the remote never
/// stored gets its `create`. Otherwise the rejected local change is dropped
/// and the next pull restores the remote copy.
pub(crate) fn rearm_failed_ops(tx: &StoreTx<'_>) -> Result<usize> {
    let mut notes = BTreeSet::new();
    for mut op in tx.list_ops()?.into_iter().filter(|op| op.failed) {
        op.failed = false;
        op.retry_count = 0;
        op.next_attempt_at = 0;
        op.last_error = None;
        tx.put_op(&op)?;
        notes.insert(op.note_id);
    }
    for id in &notes {
        settle_note_status(tx, id)?;
    }

    let rejected = tx
        .list_notes()?
        .into_iter()
        .filter(|note| note.sync_status == SyncStatus::Failed && !notes.contains(&note.local_id))
        .collect::<Vec<_>>();
    let mut refetch = false;
    for mut note in rejected {
        if !tx.list_ops_for_note(&note.local_id)?.is_empty() {
            continue;
        }

        if note.deleted {
            let base_version = note.remote_version.unwrap_or(note.version);
            tx.insert_op(&PendingOperation::delete(note.local_id, base_version))?;
            note.sync_status = SyncStatus::Pending;
        } else if note.is_known_remotely() {
            note.remote_version = None;
            note.sync_status = SyncStatus::Synced;
            refetch = true;
        } else {
            tx.insert_op(&PendingOperation::create(note.local_id, note.payload()))?;
            note.sync_status = SyncStatus::Pending;
        }
        tx.put_note(&note)?;
        notes.insert(note.local_id);
    }

    if refetch {
        let mut meta = tx.get_meta()?;
        meta.cursor = None;
        tx.put_meta(&meta)?;
    }
    Ok(notes.len())
}

fn live_note(tx: &StoreTx<'_>, id: &NoteId) -> Result<Note> {
    tx.get_note(id)?
        .filter(|note| !note.deleted)
        .ok_or_else(|| Error::NotFound(id.to_string()))
}

/// Bump the note's version and return the base version for the next operation.
///
/// A note in `conflict` is rebased onto the last observed remote version and its
/// stuck updates are dropped, so the new operation overrides the remote state.
/// A note whose last change was rejected is rebased the same way, since the
/// remote never saw that change. Permanently failed operations are re-armed by
/// the new user action.
fn prepare_for_mutation(tx: &StoreTx<'_>, note: &mut Note) -> Result<i64> {
    let ops = tx.list_ops_for_note(&note.local_id)?;

    for mut op in ops.iter().filter(|op| op.failed).cloned() {
        op.failed = false;
        op.retry_count = 0;
        op.next_attempt_at = 0;
        tx.put_op(&op)?;
    }

    let rejected = note.sync_status == SyncStatus::Failed && ops.is_empty();
    if note.sync_status != SyncStatus::Conflict && !rejected {
        let base_version = note.version;
        note.version += 1;
        return Ok(base_version);
    }

    for op in ops.iter().filter(|op| op.kind == OperationKind::Update) {
        tx.delete_op(op.op_id)?;
    }

    let remote_version = note.remote_version.unwrap_or(note.version);
    note.version = note.version.max(remote_version) + 1;
    tracing::info!(
        note = %note.local_id,
        remote_version,
        status = %note.sync_status,
        "Rebasing note onto remote version for local edit"
    );
    Ok(remote_version)
}

/// Recompute a note's status from its queued operations after a sync step.
///
/// `conflict` is sticky while operations remain; any permanently failed
/// operation pins the note to `failed`.
pub(crate) fn settle_note_status(tx: &StoreTx<'_>, id: &NoteId) -> Result<Option<SyncStatus>> {
    let Some(note) = tx.get_note(id)? else {
        return Ok(None);
    };

    let ops = tx.list_ops_for_note(id)?;
    let status = if ops.is_empty() {
        SyncStatus::Synced
    } else if ops.iter().any(|op| op.failed) {
        SyncStatus::Failed
    } else if note.sync_status == SyncStatus::Conflict {
        SyncStatus::Conflict
    } else {
        SyncStatus::Pending
    };

    if status != note.sync_status {
        tx.set_note_status(id, status)?;
    }
    Ok(Some(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn setup() -> NoteRepository {
        NoteRepository::new(LocalStore::open_in_memory().unwrap())
    }

    async fn ops_for(repo: &NoteRepository, id: NoteId) -> Vec<PendingOperation> {
        repo.store()
            .read(move |tx| tx.list_ops_for_note(&id))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_writes_note_and_queues_create() {
        let repo = setup();

        let note = repo
            .create_note(&NoteInput::new("Hello", "world"))
            .await
            .unwrap();
        assert_eq!(note.sync_status, SyncStatus::Pending);
        assert_eq!(note.version, 1);

        let ops = ops_for(&repo, note.local_id).await;
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, OperationKind::Create);
        assert_eq!(ops[0].base_version, 0);
        assert_eq!(ops[0].payload, Some(note.payload()));
    }

    #[tokio::test]
    async fn test_create_rejects_empty_title() {
        let repo = setup();

        let err = repo
            .create_note(&NoteInput::new("  ", "body"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(repo.pending_count().await.unwrap(), 0);
        assert!(repo.list_notes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_records_base() {
        let repo = setup();
        let note = repo.create_note(&NoteInput::new("v1", "")).await.unwrap();

        let updated = repo
            .update_note(&note.local_id, &NoteInput::new("v2", "more"))
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.title, "v2");

        let ops = ops_for(&repo, note.local_id).await;
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1].kind, OperationKind::Update);
        assert_eq!(ops[1].base_version, 1);
        assert_eq!(ops[1].payload.as_ref().unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_update_missing_note() {
        let repo = setup();
        let err = repo
            .update_note(&NoteId::new(), &NoteInput::new("x", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_never_synced_note_short_circuits() {
        let repo = setup();
        let note = repo.create_note(&NoteInput::new("Draft", "")).await.unwrap();
        repo.update_note(&note.local_id, &NoteInput::new("Draft 2", ""))
            .await
            .unwrap();

        repo.delete_note(&note.local_id).await.unwrap();

        assert_eq!(repo.pending_count().await.unwrap(), 0);
        let stored = repo
            .store()
            .read(move |tx| tx.get_note(&note.local_id))
            .await
            .unwrap();
        assert!(stored.is_none());
    }

    #[tokio::test]
    async fn test_delete_synced_note_leaves_tombstone() {
        let repo = setup();
        let note = repo.create_note(&NoteInput::new("Shared", "")).await.unwrap();
        let id = note.local_id;
        repo.store()
            .transaction(move |tx| {
                let mut note = tx.get_note(&id)?.unwrap();
                note.remote_id = Some("r-1".to_string());
                note.remote_version = Some(1);
                note.sync_status = SyncStatus::Synced;
                tx.delete_ops_for_note(&id)?;
                tx.put_note(&note)
            })
            .await
            .unwrap();

        repo.delete_note(&id).await.unwrap();

        assert!(repo.list_notes().await.unwrap().is_empty());
        assert!(repo.get_note(&id).await.unwrap().is_none());
        let stored = repo.store().read(move |tx| tx.get_note(&id)).await.unwrap().unwrap();
        assert!(stored.deleted);
        assert_eq!(stored.sync_status, SyncStatus::Pending);

        let ops = ops_for(&repo, id).await;
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, OperationKind::Delete);
        assert_eq!(ops[0].base_version, 1);

        let err = repo.delete_note(&id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_orders_most_recent_first() {
        let repo = setup();
        let first = repo.create_note(&NoteInput::new("first", "")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(3)).await;
        repo.create_note(&NoteInput::new("second", "")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(3)).await;
        repo.update_note(&first.local_id, &NoteInput::new("first again", ""))
            .await
            .unwrap();

        let titles = repo
            .list_notes()
            .await
            .unwrap()
            .into_iter()
            .map(|note| note.title)
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["first again", "second"]);
    }

    #[tokio::test]
    async fn test_edit_of_conflicted_note_rebases_on_remote_version() {
        let repo = setup();
        let note = repo.create_note(&NoteInput::new("mine", "")).await.unwrap();
        let id = note.local_id;

        // Synced at v1, edited to v2, then the remote was found at v5.
        repo.store()
            .transaction(move |tx| {
                let mut note = tx.get_note(&id)?.unwrap();
                tx.delete_ops_for_note(&id)?;
                note.remote_id = Some("r-9".to_string());
                note.version = 2;
                note.remote_version = Some(5);
                note.sync_status = SyncStatus::Conflict;
                tx.put_note(&note)?;
                tx.insert_op(&PendingOperation::update(id, note.payload(), 1))?;
                Ok(())
            })
            .await
            .unwrap();

        let updated = repo
            .update_note(&id, &NoteInput::new("mine, resolved", ""))
            .await
            .unwrap();
        assert_eq!(updated.version, 6);
        assert_eq!(updated.sync_status, SyncStatus::Pending);

        let ops = ops_for(&repo, id).await;
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].base_version, 5);
        assert_eq!(ops[0].payload.as_ref().unwrap().title, "mine, resolved");
    }

    #[tokio::test]
    async fn test_settle_status_follows_queue() {
        let repo = setup();
        let note = repo.create_note(&NoteInput::new("n", "")).await.unwrap();
        let id = note.local_id;

        let status = repo
            .store()
            .transaction(move |tx| {
                tx.set_note_status(&id, SyncStatus::Syncing)?;
                settle_note_status(tx, &id)
            })
            .await
            .unwrap();
        assert_eq!(status, Some(SyncStatus::Pending));

        let status = repo
            .store()
            .transaction(move |tx| {
                tx.delete_ops_for_note(&id)?;
                settle_note_status(tx, &id)
            })
            .await
            .unwrap();
        assert_eq!(status, Some(SyncStatus::Synced));
    }

    #[tokio::test]
    async fn test_find_by_id_prefix_skips_tombstones() {
        let repo = setup();
        let kept = repo.create_note(&NoteInput::new("kept", "")).await.unwrap();
        let prefix = kept.local_id.as_str()[..8].to_uppercase();

        let found = repo.find_by_id_prefix(&prefix, 3).await.unwrap();
        assert!(found.iter().any(|note| note.local_id == kept.local_id));
        assert!(repo.find_by_id_prefix("zzzz", 3).await.unwrap().is_empty());

        repo.delete_note(&kept.local_id).await.unwrap();
        let found = repo.find_by_id_prefix(&kept.local_id.as_str(), 3).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_retry_failed_requeues_rejected_tombstone() {
        let repo = setup();
        let note = repo.create_note(&NoteInput::new("gone", "")).await.unwrap();
        let id = note.local_id;
        repo.store()
            .transaction(move |tx| {
                let mut note = tx.get_note(&id)?.unwrap();
                tx.delete_ops_for_note(&id)?;
                note.remote_id = Some("r-3".to_string());
                note.remote_version = Some(1);
                note.deleted = true;
                note.version = 2;
                note.sync_status = SyncStatus::Failed;
                tx.put_note(&note)
            })
            .await
            .unwrap();

        assert_eq!(repo.retry_failed().await.unwrap(), 1);

        let ops = ops_for(&repo, id).await;
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, OperationKind::Delete);
        assert_eq!(ops[0].base_version, 1);
        assert!(repo.list_unresolved().await.unwrap().is_empty());
        assert_eq!(repo.retry_failed().await.unwrap(), 0);
    }
}
