//! Database connection management

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;

use super::migrations;
use super::store::StoreTx;
use crate::error::{Error, Result};

/// Database wrapper for the local `SQLite` file
pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    /// Open a local database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let mut database = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut database = Self { conn, path: None };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    /// Configure `SQLite` for durability and concurrency
    fn configure(&self) -> Result<()> {
        // WAL is unavailable for in-memory databases; ignore the result there
        self.conn
            .pragma_update(None, "journal_mode", "WAL")
            .ok();
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    /// Run database migrations
    fn migrate(&mut self) -> Result<()> {
        migrations::run(&mut self.conn)
    }

    /// Path of the backing file, `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside a single transaction, committing only if it returns `Ok`.
    pub fn transaction<T>(&mut self, f: impl FnOnce(&StoreTx<'_>) -> Result<T>) -> Result<T> {
        let tx = self.conn.transaction()?;
        let value = f(&StoreTx::new(&tx))?;
        tx.commit()?;
        Ok(value)
    }
}

/// Thread-safe handle to the local store shared by the repository and the sync engine.
///
/// Every logical operation runs in exactly one transaction, so a note write and
/// the matching queue entry always land together.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
}

impl LocalStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Open (and migrate) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    /// Open an in-memory store (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Execute `f` atomically against the store.
    ///
    /// `SQLite` calls block, so the transaction runs on the blocking pool while
    /// the store lock is held. Once started it completes even if the caller is
    /// dropped.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut db = Arc::clone(&self.db).lock_owned().await;
        tokio::task::spawn_blocking(move || db.transaction(f))
            .await
            .map_err(|error| Error::Storage(format!("store task failed: {error}")))?
    }

    /// Read-only convenience wrapper around [`Self::transaction`].
    pub async fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.transaction(f).await
    }
}
