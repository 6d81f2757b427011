//! Application state facade.
//!
//! [`NotesApp`] is the single entry point for a UI: it owns the repository and
//! the sync engine, publishes a watchable [`AppSnapshot`], and runs the event
//! loop that turns connectivity changes and background requests into syncs.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::background::{BackgroundTrigger, SyncMessage};
use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::db::{LocalStore, NoteRepository};
use crate::error::Result;
use crate::models::{Note, NoteId, NoteInput};
use crate::remote::RemoteNoteService;
use crate::sync::{SyncEngine, SyncResult};

/// Unified sync state shown by clients.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Offline,
    Syncing,
    #[default]
    Synced,
    Error,
}

impl SyncState {
    const fn derive(is_online: bool, is_syncing: bool, has_error: bool) -> Self {
        if !is_online {
            Self::Offline
        } else if is_syncing {
            Self::Syncing
        } else if has_error {
            Self::Error
        } else {
            Self::Synced
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }
}

/// Everything a UI renders
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AppSnapshot {
    pub notes: Vec<Note>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub pending_count: usize,
    pub is_syncing: bool,
    pub is_online: bool,
    pub sync_state: SyncState,
}

pub struct NotesApp<R> {
    inner: Arc<AppInner<R>>,
}

impl<R> Clone for NotesApp<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct AppInner<R> {
    repository: NoteRepository,
    engine: SyncEngine<R>,
    trigger: BackgroundTrigger,
    sync_on_mutation: bool,
    snapshot: watch::Sender<AppSnapshot>,
}

impl<R: RemoteNoteService> NotesApp<R> {
    pub fn new(
        repository: NoteRepository,
        engine: SyncEngine<R>,
        trigger: BackgroundTrigger,
        sync_on_mutation: bool,
    ) -> Self {
        let (snapshot, _) = watch::channel(AppSnapshot {
            is_online: engine.connectivity().is_online(),
            ..AppSnapshot::default()
        });

        Self {
            inner: Arc::new(AppInner {
                repository,
                engine,
                trigger,
                sync_on_mutation,
                snapshot,
            }),
        }
    }

    /// Wire up repository, engine, and trigger from configuration
    pub fn from_config(
        store: LocalStore,
        remote: R,
        connectivity: ConnectivityMonitor,
        config: &SyncConfig,
    ) -> Self {
        let engine = SyncEngine::new(
            store.clone(),
            remote,
            connectivity,
            config.engine_options(),
        );
        Self::new(
            NoteRepository::new(store),
            engine,
            BackgroundTrigger::new(config.sync_tag.clone()),
            config.sync_on_mutation,
        )
    }

    pub fn repository(&self) -> &NoteRepository {
        &self.inner.repository
    }

    pub fn engine(&self) -> &SyncEngine<R> {
        &self.inner.engine
    }

    pub fn trigger(&self) -> &BackgroundTrigger {
        &self.inner.trigger
    }

    /// Send `SKIP_WAITING` so the trigger activates its staged update now
    pub fn skip_waiting(&self) -> bool {
        self.inner.trigger.skip_waiting()
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        self.inner.engine.connectivity()
    }

    pub fn snapshot(&self) -> AppSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AppSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Initial load: recover from an interrupted pass and read every note
    pub async fn load(&self) -> Result<()> {
        self.publish(|snapshot| snapshot.is_loading = true);

        let result: Result<()> = async {
            self.inner.engine.recover_interrupted().await?;
            self.refresh().await
        }
        .await;

        self.publish(|snapshot| {
            snapshot.is_loading = false;
            if let Err(error) = &result {
                snapshot.error = Some(error.to_string());
            }
        });
        result
    }

    /// Re-read notes and queue length from the store
    pub async fn refresh(&self) -> Result<()> {
        let notes = self.inner.repository.list_notes().await?;
        self.inner.engine.refresh_pending_count().await?;
        self.publish(|snapshot| snapshot.notes = notes);
        Ok(())
    }

    pub async fn create_note(&self, input: &NoteInput) -> Result<Note> {
        let result = self.inner.repository.create_note(input).await;
        self.after_mutation(result).await
    }

    pub async fn update_note(&self, id: &NoteId, input: &NoteInput) -> Result<Note> {
        let result = self.inner.repository.update_note(id, input).await;
        self.after_mutation(result).await
    }

    pub async fn delete_note(&self, id: &NoteId) -> Result<()> {
        let result = self.inner.repository.delete_note(id).await;
        self.after_mutation(result).await
    }

    /// Run (or join) a sync pass and publish its outcome
    pub async fn sync_notes(&self) -> Result<SyncResult> {
        self.publish(|_| {});
        let result = self.inner.engine.sync_notes().await;
        self.after_sync(result).await
    }

    /// Re-arm permanently failed operations
    pub async fn retry_failed(&self) -> Result<usize> {
        let result = self.inner.engine.retry_failed().await;
        self.after_mutation(result).await
    }

    /// Spawn the event loop.
    ///
    /// Syncs on launch when online, on every offline to online transition, and
    /// on every `SYNC_REQUESTED` broadcast. The loop runs until the task is
    /// aborted.
    pub fn start(&self) -> JoinHandle<()> {
        let app = self.clone();
        let mut connectivity = self.connectivity().subscribe();
        let mut engine_status = self.inner.engine.subscribe();
        let mut messages = self.inner.trigger.subscribe();

        tokio::spawn(async move {
            if app.connectivity().is_online() {
                app.schedule_sync("launch");
            }

            loop {
                tokio::select! {
                    changed = connectivity.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = *connectivity.borrow_and_update();
                        app.publish(|_| {});
                        if online {
                            app.schedule_sync("back online");
                        }
                    }
                    changed = engine_status.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        app.publish(|_| {});
                    }
                    message = messages.recv() => match message {
                        Ok(SyncMessage::SyncRequested) | Err(broadcast::error::RecvError::Lagged(_)) => {
                            app.schedule_sync("background request");
                        }
                        Ok(SyncMessage::SkipWaiting) => {
                            tracing::debug!(
                                revision = app.inner.trigger.active_revision(),
                                "Background controller update activated"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    fn schedule_sync(&self, reason: &'static str) {
        let app = self.clone();
        tokio::spawn(async move {
            tracing::debug!(reason, "Scheduled sync");
            if let Err(error) = app.sync_notes().await {
                tracing::warn!("Scheduled sync ({}) failed: {}", reason, error);
            }
        });
    }

    async fn after_mutation<T>(&self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.refresh().await?;
                self.publish(|snapshot| snapshot.error = None);
                if self.inner.sync_on_mutation && self.connectivity().is_online() {
                    self.schedule_sync("local change");
                }
                Ok(value)
            }
            Err(error) => {
                self.publish(|snapshot| snapshot.error = Some(error.to_string()));
                Err(error)
            }
        }
    }

    async fn after_sync(&self, result: Result<SyncResult>) -> Result<SyncResult> {
        match result {
            Ok(outcome) => {
                self.refresh().await?;
                self.publish(|snapshot| snapshot.error = outcome.error.clone());
                Ok(outcome)
            }
            Err(error) => {
                self.publish(|snapshot| snapshot.error = Some(error.to_string()));
                Err(error)
            }
        }
    }

    fn publish(&self, update: impl FnOnce(&mut AppSnapshot)) {
        let status = self.inner.engine.status();
        let is_online = self.connectivity().is_online();

        self.inner.snapshot.send_modify(|snapshot| {
            update(snapshot);
            snapshot.is_syncing = status.is_syncing;
            snapshot.pending_count = status.pending_count;
            snapshot.is_online = is_online;
            snapshot.sync_state =
                SyncState::derive(is_online, status.is_syncing, snapshot.error.is_some());
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_state_precedence() {
        assert_eq!(SyncState::derive(false, true, true), SyncState::Offline);
        assert_eq!(SyncState::derive(true, true, true), SyncState::Syncing);
        assert_eq!(SyncState::derive(true, false, true), SyncState::Error);
        assert_eq!(SyncState::derive(true, false, false), SyncState::Synced);
    }

    #[test]
    fn sync_state_labels_match_serialization() {
        for state in [
            SyncState::Offline,
            SyncState::Syncing,
            SyncState::Synced,
            SyncState::Error,
        ] {
            assert_eq!(
                serde_json::to_string(&state).unwrap(),
                format!("\"{}\"", state.label())
            );
        }
    }
}
