//! Background sync trigger and cross-context messaging.
//!
//! The trigger performs no storage or network work of its own: it only tells
//! every subscribed application instance that a sync is wanted.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default background sync registration tag
pub const SYNC_TAG: &str = "notes-sync";

const CHANNEL_CAPACITY: usize = 16;

/// Messages exchanged between the trigger and application instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncMessage {
    /// Ask every instance to run a sync pass
    SyncRequested,
    /// Ask the trigger to activate its staged update immediately
    SkipWaiting,
}

#[derive(Debug, Default)]
struct ControllerState {
    active_revision: u64,
    staged_revision: Option<u64>,
}

/// Broadcast trigger registered for a single sync tag
#[derive(Debug, Clone)]
pub struct BackgroundTrigger {
    tag: String,
    channel: broadcast::Sender<SyncMessage>,
    controller: Arc<Mutex<ControllerState>>,
}

impl BackgroundTrigger {
    pub fn new(tag: impl Into<String>) -> Self {
        let (channel, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tag: tag.into(),
            channel,
            controller: Arc::default(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Register an application instance
    pub fn subscribe(&self) -> broadcast::Receiver<SyncMessage> {
        self.channel.subscribe()
    }

    /// Handle a background sync event.
    ///
    /// Returns the number of instances reached. Events for other tags and
    /// firing with nobody listening both reach zero.
    pub fn fire(&self, tag: &str) -> usize {
        if tag != self.tag {
            tracing::debug!(tag, "Ignoring background sync for unregistered tag");
            return 0;
        }

        let reached = self.post(SyncMessage::SyncRequested);
        tracing::debug!(reached, "Broadcast sync request");
        reached
    }

    /// Post a message to every subscribed application instance.
    ///
    /// `SKIP_WAITING` is also applied to the trigger's own controller, which
    /// is not a subscriber and never counts as a listener.
    pub fn post(&self, message: SyncMessage) -> usize {
        if message == SyncMessage::SkipWaiting {
            self.handle_message(message);
        }
        self.broadcast(message)
    }

    /// Activate the staged controller update now and tell every instance.
    ///
    /// Returns `true` when a staged update was activated.
    pub fn skip_waiting(&self) -> bool {
        let activated = self.handle_message(SyncMessage::SkipWaiting);
        self.broadcast(SyncMessage::SkipWaiting);
        activated
    }

    fn broadcast(&self, message: SyncMessage) -> usize {
        self.channel.send(message).unwrap_or(0)
    }

    /// Stage a new controller revision; it becomes active on `SKIP_WAITING`
    pub fn stage_update(&self, revision: u64) {
        self.controller().staged_revision = Some(revision);
    }

    pub fn active_revision(&self) -> u64 {
        self.controller().active_revision
    }

    pub fn staged_revision(&self) -> Option<u64> {
        self.controller().staged_revision
    }

    /// Apply a message addressed to the controller.
    ///
    /// Returns `true` when a staged update was activated.
    pub fn handle_message(&self, message: SyncMessage) -> bool {
        if message != SyncMessage::SkipWaiting {
            return false;
        }

        let mut controller = self.controller();
        match controller.staged_revision.take() {
            Some(revision) => {
                controller.active_revision = revision;
                tracing::info!(revision, "Activated staged controller update");
                true
            }
            None => false,
        }
    }

    fn controller(&self) -> MutexGuard<'_, ControllerState> {
        self.controller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for BackgroundTrigger {
    fn default() -> Self {
        Self::new(SYNC_TAG)
    }
}
