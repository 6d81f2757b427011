//! In-process remote note store with fault injection.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{RemoteError, RemoteNote, RemoteNoteService, RemoteResult, RemoteSnapshot};
use crate::models::NotePayload;
use crate::util::now_millis;

/// A request observed by [`InMemoryNoteService`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    FetchAll { cursor: Option<String> },
    Create { title: String },
    Update { remote_id: String, base_version: i64 },
    Delete { remote_id: String },
}

#[derive(Default)]
struct Inner {
    notes: BTreeMap<String, RemoteNote>,
    next_id: u64,
    revision: u64,
    faults: VecDeque<RemoteError>,
    fail_always: Option<RemoteError>,
    latency: Duration,
    calls: Vec<RemoteCall>,
}

impl Inner {
    fn etag(&self) -> String {
        format!("\"rev-{}\"", self.revision)
    }

    fn take_fault(&mut self) -> Option<RemoteError> {
        self.faults
            .pop_front()
            .or_else(|| self.fail_always.clone())
    }
}

/// Remote store kept in memory, shared by every clone.
#[derive(Clone, Default)]
pub struct InMemoryNoteService {
    inner: Arc<Mutex<Inner>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl InMemoryNoteService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every request by `latency` before it is applied
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = latency;
        self
    }

    /// Fail the next request with `error`. Queued faults are consumed in order.
    pub fn fail_next(&self, error: RemoteError) {
        self.lock().faults.push_back(error);
    }

    /// Fail every request with `error` until [`Self::heal`] is called
    pub fn fail_always(&self, error: RemoteError) {
        self.lock().fail_always = Some(error);
    }

    /// Clear all injected faults
    pub fn heal(&self) {
        let mut inner = self.lock();
        inner.faults.clear();
        inner.fail_always = None;
    }

    /// Create a note as another client would
    pub fn insert_remote(&self, title: &str, body: &str) -> RemoteNote {
        let mut inner = self.lock();
        inner.next_id += 1;
        inner.revision += 1;
        let note = RemoteNote {
            id: format!("remote-{}", inner.next_id),
            title: title.to_string(),
            body: body.to_string(),
            version: 1,
            updated_at: now_millis(),
        };
        inner.notes.insert(note.id.clone(), note.clone());
        note
    }

    /// Edit a note as another client would, bumping its version
    pub fn edit_remote(&self, remote_id: &str, title: &str, body: &str) -> Option<RemoteNote> {
        let mut inner = self.lock();
        let note = inner.notes.get_mut(remote_id)?;
        note.title = title.to_string();
        note.body = body.to_string();
        note.version += 1;
        note.updated_at = now_millis();
        let note = note.clone();
        inner.revision += 1;
        Some(note)
    }

    /// Delete a note as another client would
    pub fn remove_remote(&self, remote_id: &str) -> bool {
        let mut inner = self.lock();
        let removed = inner.notes.remove(remote_id).is_some();
        if removed {
            inner.revision += 1;
        }
        removed
    }

    pub fn get(&self, remote_id: &str) -> Option<RemoteNote> {
        self.lock().notes.get(remote_id).cloned()
    }

    /// Every stored note, ordered by remote id
    pub fn notes(&self) -> Vec<RemoteNote> {
        self.lock().notes.values().cloned().collect()
    }

    /// Requests observed so far, in arrival order
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Highest number of requests that were ever in progress at once
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the call, wait out the configured latency, then surface any injected fault
    async fn begin(&self, call: RemoteCall) -> RemoteResult<InFlight> {
        let latency = {
            let mut inner = self.lock();
            inner.calls.push(call);
            inner.latency
        };

        let guard = InFlight::enter(&self.in_flight, &self.max_in_flight);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match self.lock().take_fault() {
            Some(error) => Err(error),
            None => Ok(guard),
        }
    }
}

struct InFlight {
    counter: Arc<AtomicUsize>,
}

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>, max: &AtomicUsize) -> Self {
        let current = counter.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(current, Ordering::SeqCst);
        Self {
            counter: Arc::clone(counter),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RemoteNoteService for InMemoryNoteService {
    async fn fetch_all(&self, cursor: Option<&str>) -> RemoteResult<Option<RemoteSnapshot>> {
        let _guard = self
            .begin(RemoteCall::FetchAll {
                cursor: cursor.map(str::to_string),
            })
            .await?;

        let inner = self.lock();
        let etag = inner.etag();
        if cursor == Some(etag.as_str()) {
            return Ok(None);
        }

        Ok(Some(RemoteSnapshot {
            notes: inner.notes.values().cloned().collect(),
            cursor: Some(etag),
        }))
    }

    async fn create(&self, payload: &NotePayload) -> RemoteResult<RemoteNote> {
        let _guard = self
            .begin(RemoteCall::Create {
                title: payload.title.clone(),
            })
            .await?;

        let mut inner = self.lock();
        inner.next_id += 1;
        inner.revision += 1;
        let note = RemoteNote {
            id: format!("remote-{}", inner.next_id),
            title: payload.title.clone(),
            body: payload.body.clone(),
            version: payload.version,
            updated_at: payload.updated_at,
        };
        inner.notes.insert(note.id.clone(), note.clone());
        Ok(note)
    }

    async fn update(
        &self,
        remote_id: &str,
        payload: &NotePayload,
        base_version: i64,
    ) -> RemoteResult<RemoteNote> {
        let _guard = self
            .begin(RemoteCall::Update {
                remote_id: remote_id.to_string(),
                base_version,
            })
            .await?;

        let mut inner = self.lock();
        let note = inner
            .notes
            .get_mut(remote_id)
            .ok_or(RemoteError::NotFound)?;
        if note.version != base_version {
            return Err(RemoteError::Conflict {
                remote_version: note.version,
            });
        }

        note.title = payload.title.clone();
        note.body = payload.body.clone();
        note.version = payload.version;
        note.updated_at = payload.updated_at;
        let note = note.clone();
        inner.revision += 1;
        Ok(note)
    }

    async fn delete(&self, remote_id: &str) -> RemoteResult<()> {
        let _guard = self
            .begin(RemoteCall::Delete {
                remote_id: remote_id.to_string(),
            })
            .await?;

        if self.remove_remote(remote_id) {
            Ok(())
        } else {
            Err(RemoteError::NotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn payload(title: &str, version: i64) -> NotePayload {
        NotePayload {
            title: title.to_string(),
            body: String::new(),
            version,
            updated_at: 1,
        }
    }

    #[tokio::test]
    async fn update_is_compare_and_set() {
        let service = InMemoryNoteService::new();
        let created = service.create(&payload("a", 1)).await.unwrap();

        let updated = service
            .update(&created.id, &payload("b", 2), 1)
            .await
            .unwrap();
        assert_eq!(updated.version, 2);

        let err = service
            .update(&created.id, &payload("c", 3), 1)
            .await
            .unwrap_err();
        assert_eq!(err, RemoteError::Conflict { remote_version: 2 });

        let err = service
            .update("remote-missing", &payload("d", 2), 1)
            .await
            .unwrap_err();
        assert_eq!(err, RemoteError::NotFound);
    }

    #[tokio::test]
    async fn fetch_all_honours_cursor() {
        let service = InMemoryNoteService::new();
        service.insert_remote("third party", "");

        let snapshot = service.fetch_all(None).await.unwrap().unwrap();
        assert_eq!(snapshot.notes.len(), 1);

        let cursor = snapshot.cursor.unwrap();
        assert!(service.fetch_all(Some(&cursor)).await.unwrap().is_none());

        service.insert_remote("another", "");
        assert!(service.fetch_all(Some(&cursor)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn injected_faults_are_consumed_in_order() {
        let service = InMemoryNoteService::new();
        service.fail_next(RemoteError::Timeout);
        service.fail_next(RemoteError::Network("reset".to_string()));

        assert_eq!(
            service.create(&payload("a", 1)).await.unwrap_err(),
            RemoteError::Timeout
        );
        assert!(matches!(
            service.create(&payload("a", 1)).await,
            Err(RemoteError::Network(_))
        ));
        assert!(service.create(&payload("a", 1)).await.is_ok());
        assert_eq!(service.calls().len(), 3);
        assert_eq!(service.notes().len(), 1);
    }

    #[tokio::test]
    async fn fail_always_until_healed() {
        let service = InMemoryNoteService::new();
        service.fail_always(RemoteError::Timeout);
        assert!(service.delete("remote-1").await.is_err());
        assert!(service.delete("remote-1").await.is_err());

        service.heal();
        assert_eq!(
            service.delete("remote-1").await.unwrap_err(),
            RemoteError::NotFound
        );
    }
}
