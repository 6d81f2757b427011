//! Record-level access to the three persisted collections.
//!
//! A `StoreTx` is only ever handed out inside an open transaction; it has no
//! business logic of its own.

use std::collections::BTreeSet;

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::models::{
    Note, NoteId, NotePayload, OperationKind, PendingOperation, SyncMeta, SyncStatus,
};

const NOTE_COLUMNS: &str = "local_id, remote_id, title, body, created_at, updated_at, version, \
                            remote_version, sync_status, deleted";

const OP_COLUMNS: &str = "op_id, note_local_id, kind, payload, base_version, retry_count, \
                          created_at, next_attempt_at, failed, last_error";

/// Transaction-scoped CRUD over notes, pending operations and sync metadata
pub struct StoreTx<'a> {
    conn: &'a Connection,
}

impl<'a> StoreTx<'a> {
    pub(crate) const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    // Notes

    pub fn get_note(&self, id: &NoteId) -> Result<Option<Note>> {
        let note = self
            .conn
            .query_row(
                &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE local_id = ?"),
                params![id.as_str()],
                parse_note,
            )
            .optional()?;
        Ok(note)
    }

    pub fn get_note_by_remote_id(&self, remote_id: &str) -> Result<Option<Note>> {
        let note = self
            .conn
            .query_row(
                &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE remote_id = ?"),
                params![remote_id],
                parse_note,
            )
            .optional()?;
        Ok(note)
    }

    /// Insert or replace a note
    pub fn put_note(&self, note: &Note) -> Result<()> {
        self.conn.execute(
            "INSERT INTO notes (local_id, remote_id, title, body, created_at, updated_at, version,
                                remote_version, sync_status, deleted)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(local_id) DO UPDATE SET
                remote_id = excluded.remote_id,
                title = excluded.title,
                body = excluded.body,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                version = excluded.version,
                remote_version = excluded.remote_version,
                sync_status = excluded.sync_status,
                deleted = excluded.deleted",
            params![
                note.local_id.as_str(),
                note.remote_id,
                note.title,
                note.body,
                note.created_at,
                note.updated_at,
                note.version,
                note.remote_version,
                note.sync_status.as_str(),
                i32::from(note.deleted),
            ],
        )?;
        Ok(())
    }

    /// Remove a note and, through the foreign key, every operation queued for it
    pub fn delete_note(&self, id: &NoteId) -> Result<()> {
        self.conn
            .execute("DELETE FROM notes WHERE local_id = ?", params![id.as_str()])?;
        Ok(())
    }

    /// All notes including tombstones, most recently updated first
    pub fn list_notes(&self) -> Result<Vec<Note>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {NOTE_COLUMNS} FROM notes ORDER BY updated_at DESC, local_id DESC"
        ))?;
        let notes = stmt
            .query_map([], parse_note)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(notes)
    }

    pub fn set_note_status(&self, id: &NoteId, status: SyncStatus) -> Result<()> {
        self.conn.execute(
            "UPDATE notes SET sync_status = ? WHERE local_id = ?",
            params![status.as_str(), id.as_str()],
        )?;
        Ok(())
    }

    // Pending operations

    pub fn get_op(&self, op_id: i64) -> Result<Option<PendingOperation>> {
        let op = self
            .conn
            .query_row(
                &format!("SELECT {OP_COLUMNS} FROM pending_operations WHERE op_id = ?"),
                params![op_id],
                parse_op,
            )
            .optional()?;
        Ok(op)
    }

    /// Enqueue an operation, returning its assigned `op_id`
    pub fn insert_op(&self, op: &PendingOperation) -> Result<i64> {
        let payload = op.payload.as_ref().map(serde_json::to_string).transpose()?;
        self.conn.execute(
            "INSERT INTO pending_operations (note_local_id, kind, payload, base_version, retry_count,
                                             created_at, next_attempt_at, failed, last_error)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                op.note_id.as_str(),
                op.kind.as_str(),
                payload,
                op.base_version,
                op.retry_count,
                op.created_at,
                op.next_attempt_at,
                i32::from(op.failed),
                op.last_error,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Persist retry bookkeeping for an existing operation
    pub fn put_op(&self, op: &PendingOperation) -> Result<()> {
        let payload = op.payload.as_ref().map(serde_json::to_string).transpose()?;
        self.conn.execute(
            "UPDATE pending_operations
             SET payload = ?, base_version = ?, retry_count = ?, next_attempt_at = ?, failed = ?,
                 last_error = ?
             WHERE op_id = ?",
            params![
                payload,
                op.base_version,
                op.retry_count,
                op.next_attempt_at,
                i32::from(op.failed),
                op.last_error,
                op.op_id,
            ],
        )?;
        Ok(())
    }

    pub fn delete_op(&self, op_id: i64) -> Result<()> {
        self.conn.execute(
            "DELETE FROM pending_operations WHERE op_id = ?",
            params![op_id],
        )?;
        Ok(())
    }

    /// Every queued operation in enqueue order
    pub fn list_ops(&self) -> Result<Vec<PendingOperation>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {OP_COLUMNS} FROM pending_operations ORDER BY op_id ASC"
        ))?;
        let ops = stmt
            .query_map([], parse_op)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ops)
    }

    /// Operations queued for one note, in enqueue order
    pub fn list_ops_for_note(&self, id: &NoteId) -> Result<Vec<PendingOperation>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {OP_COLUMNS} FROM pending_operations
             WHERE note_local_id = ?
             ORDER BY op_id ASC"
        ))?;
        let ops = stmt
            .query_map(params![id.as_str()], parse_op)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ops)
    }

    pub fn delete_ops_for_note(&self, id: &NoteId) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM pending_operations WHERE note_local_id = ?",
            params![id.as_str()],
        )?;
        Ok(removed)
    }

    pub fn count_ops(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM pending_operations", [], |row| {
                    row.get(0)
                })?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    // Sync metadata

    pub fn get_meta(&self) -> Result<SyncMeta> {
        let meta = self
            .conn
            .query_row(
                "SELECT last_sync_attempt_at, last_sync_success_at, cursor, known_remote_ids
                 FROM sync_meta WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, Option<i64>>(0)?,
                        row.get::<_, Option<i64>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((last_sync_attempt_at, last_sync_success_at, cursor, known)) = meta else {
            return Ok(SyncMeta::default());
        };

        let known_remote_ids: BTreeSet<String> = serde_json::from_str(&known)?;
        Ok(SyncMeta {
            last_sync_attempt_at,
            last_sync_success_at,
            cursor,
            known_remote_ids,
        })
    }

    pub fn put_meta(&self, meta: &SyncMeta) -> Result<()> {
        let known = serde_json::to_string(&meta.known_remote_ids)?;
        self.conn.execute(
            "INSERT INTO sync_meta (id, last_sync_attempt_at, last_sync_success_at, cursor, known_remote_ids)
             VALUES (1, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                last_sync_attempt_at = excluded.last_sync_attempt_at,
                last_sync_success_at = excluded.last_sync_success_at,
                cursor = excluded.cursor,
                known_remote_ids = excluded.known_remote_ids",
            params![
                meta.last_sync_attempt_at,
                meta.last_sync_success_at,
                meta.cursor,
                known,
            ],
        )?;
        Ok(())
    }
}

fn conversion_error(
    column: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(error))
}

fn parse_note(row: &Row<'_>) -> rusqlite::Result<Note> {
    let local_id: String = row.get(0)?;
    let status: String = row.get(8)?;
    Ok(Note {
        local_id: local_id
            .parse::<NoteId>()
            .map_err(|error| conversion_error(0, error))?,
        remote_id: row.get(1)?,
        title: row.get(2)?,
        body: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        version: row.get(6)?,
        remote_version: row.get(7)?,
        sync_status: status
            .parse::<SyncStatus>()
            .map_err(|error| conversion_error(8, error))?,
        deleted: row.get::<_, i32>(9)? != 0,
    })
}

fn parse_op(row: &Row<'_>) -> rusqlite::Result<PendingOperation> {
    let note_id: String = row.get(1)?;
    let kind: String = row.get(2)?;
    let payload: Option<String> = row.get(3)?;
    let payload = payload
        .map(|raw| serde_json::from_str::<NotePayload>(&raw))
        .transpose()
        .map_err(|error| conversion_error(3, error))?;

    Ok(PendingOperation {
        op_id: row.get(0)?,
        note_id: note_id
            .parse::<NoteId>()
            .map_err(|error| conversion_error(1, error))?,
        kind: kind
            .parse::<OperationKind>()
            .map_err(|error| conversion_error(2, error))?,
        payload,
        base_version: row.get(4)?,
        retry_count: row.get(5)?,
        created_at: row.get(6)?,
        next_attempt_at: row.get(7)?,
        failed: row.get::<_, i32>(8)? != 0,
        last_error: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::NoteInput;
    use pretty_assertions::assert_eq;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn note_put_get_delete() {
        let mut db = setup();
        let note = Note::new(&NoteInput::new("Title", "Body"));

        db.transaction(|tx| tx.put_note(&note)).unwrap();
        let fetched = db.transaction(|tx| tx.get_note(&note.local_id)).unwrap();
        assert_eq!(fetched, Some(note.clone()));

        db.transaction(|tx| tx.delete_note(&note.local_id)).unwrap();
        let fetched = db.transaction(|tx| tx.get_note(&note.local_id)).unwrap();
        assert!(fetched.is_none());
    }

    #[test]
    fn ops_are_listed_in_enqueue_order() {
        let mut db = setup();
        let note = Note::new(&NoteInput::new("Title", ""));

        let ids = db
            .transaction(|tx| {
                tx.put_note(&note)?;
                let first = tx.insert_op(&PendingOperation::create(note.local_id, note.payload()))?;
                let second =
                    tx.insert_op(&PendingOperation::update(note.local_id, note.payload(), 1))?;
                let third = tx.insert_op(&PendingOperation::delete(note.local_id, 2))?;
                Ok(vec![first, second, third])
            })
            .unwrap();

        let ops = db.transaction(|tx| tx.list_ops()).unwrap();
        assert_eq!(ops.iter().map(|op| op.op_id).collect::<Vec<_>>(), ids);
        assert_eq!(ops[0].payload, Some(note.payload()));
        assert!(ops[2].payload.is_none());
    }

    #[test]
    fn deleting_note_cascades_to_operations() {
        let mut db = setup();
        let note = Note::new(&NoteInput::new("Title", ""));

        db.transaction(|tx| {
            tx.put_note(&note)?;
            tx.insert_op(&PendingOperation::create(note.local_id, note.payload()))?;
            tx.delete_note(&note.local_id)
        })
        .unwrap();

        assert_eq!(db.transaction(|tx| tx.count_ops()).unwrap(), 0);
    }

    #[test]
    fn put_op_persists_retry_state() {
        let mut db = setup();
        let note = Note::new(&NoteInput::new("Title", ""));

        let mut op = PendingOperation::create(note.local_id, note.payload());
        op.op_id = db
            .transaction(|tx| {
                tx.put_note(&note)?;
                tx.insert_op(&op)
            })
            .unwrap();

        op.retry_count = 2;
        op.next_attempt_at = 99;
        op.failed = true;
        op.last_error = Some("Network error: reset".to_string());
        db.transaction(|tx| tx.put_op(&op)).unwrap();

        let fetched = db.transaction(|tx| tx.get_op(op.op_id)).unwrap().unwrap();
        assert_eq!(fetched, op);
    }

    #[test]
    fn meta_defaults_then_roundtrips() {
        let mut db = setup();
        assert_eq!(db.transaction(|tx| tx.get_meta()).unwrap(), SyncMeta::default());

        let meta = SyncMeta {
            last_sync_attempt_at: Some(10),
            last_sync_success_at: Some(9),
            cursor: Some("\"etag-1\"".to_string()),
            known_remote_ids: ["r1".to_string(), "r2".to_string()].into_iter().collect(),
        };
        db.transaction(|tx| tx.put_meta(&meta)).unwrap();
        assert_eq!(db.transaction(|tx| tx.get_meta()).unwrap(), meta);
    }

    #[test]
    fn lookup_by_remote_id() {
        let mut db = setup();
        let mut note = Note::new(&NoteInput::new("Title", ""));
        note.remote_id = Some("remote-7".to_string());

        db.transaction(|tx| tx.put_note(&note)).unwrap();
        let fetched = db
            .transaction(|tx| tx.get_note_by_remote_id("remote-7"))
            .unwrap()
            .unwrap();
        assert_eq!(fetched.local_id, note.local_id);
    }
}
