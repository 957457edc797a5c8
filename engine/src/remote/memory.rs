//! In-process remote store.
//!
//! Clones share one document map, so two engines built on clones of the same
//! `MemoryRemote` behave like two devices connected to one server. Listeners
//! are called synchronously from inside `write`, which makes echo delivery
//! deterministic in tests.
//!
//! Two switches model a real network: [`MemoryRemote::set_deferred`] queues
//! notifications until [`MemoryRemote::deliver_pending`], and
//! [`MemoryRemote::hold_writes`] parks writes until they are released.

use super::{Listener, RemoteChange, RemoteDocument, RemoteResult, RemoteStore, Subscription, WriteAck};
use crate::error::RemoteError;
use crate::StoreKey;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    documents: Mutex<HashMap<StoreKey, RemoteDocument>>,
    listeners: Mutex<HashMap<StoreKey, Vec<(u64, Listener)>>>,
    next_listener: AtomicU64,
    fail_reads: Mutex<bool>,
    fail_writes: Mutex<bool>,
    writes: Mutex<Vec<(StoreKey, Value)>>,
    deferred: Mutex<bool>,
    queued: Mutex<VecDeque<RemoteChange>>,
    writes_held: Mutex<bool>,
    writes_released: Notify,
}

#[derive(Clone, Default)]
pub struct MemoryRemote {
    inner: Arc<Inner>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document without notifying listeners or logging a write.
    pub fn with_document(self, key: StoreKey, value: Value) -> Self {
        self.inner.documents.lock().insert(
            key,
            RemoteDocument {
                value,
                revision: 1,
            },
        );
        self
    }

    pub fn set_fail_reads(&self, fail: bool) {
        *self.inner.fail_reads.lock() = fail;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        *self.inner.fail_writes.lock() = fail;
    }

    /// Queue notifications instead of delivering them inside `write`.
    ///
    /// Turning deferral off does not flush the queue.
    pub fn set_deferred(&self, deferred: bool) {
        *self.inner.deferred.lock() = deferred;
    }

    /// Deliver queued notifications in order. Returns how many were delivered.
    pub fn deliver_pending(&self) -> usize {
        let mut delivered = 0;
        loop {
            let Some(change) = self.inner.queued.lock().pop_front() else {
                return delivered;
            };
            self.dispatch(change);
            delivered += 1;
        }
    }

    pub fn queued_notifications(&self) -> usize {
        self.inner.queued.lock().len()
    }

    /// Park every write until [`release_writes`](Self::release_writes).
    pub fn hold_writes(&self) {
        *self.inner.writes_held.lock() = true;
    }

    pub fn release_writes(&self) {
        *self.inner.writes_held.lock() = false;
        self.inner.writes_released.notify_waiters();
    }

    async fn wait_for_release(&self) {
        loop {
            let released = self.inner.writes_released.notified();
            let held = *self.inner.writes_held.lock();
            if !held {
                return;
            }
            released.await;
        }
    }

    /// Current document under `key`, if any.
    pub fn document(&self, key: StoreKey) -> Option<RemoteDocument> {
        self.inner.documents.lock().get(&key).cloned()
    }

    /// Every successful write, in order.
    pub fn write_log(&self) -> Vec<(StoreKey, Value)> {
        self.inner.writes.lock().clone()
    }

    pub fn listener_count(&self, key: StoreKey) -> usize {
        self.inner
            .listeners
            .lock()
            .get(&key)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Delete a document and notify listeners with an absent value.
    pub fn delete(&self, key: StoreKey) {
        let revision = {
            let mut docs = self.inner.documents.lock();
            let next = docs.get(&key).map(|d| d.revision + 1).unwrap_or(1);
            docs.remove(&key);
            next
        };
        self.notify(RemoteChange {
            key,
            value: None,
            revision: Some(revision),
        });
    }

    /// Deliver a change to every listener of its key, or queue it while
    /// deferred.
    ///
    /// Public so tests can inject out-of-band notifications (stale or
    /// revision-less deliveries).
    pub fn notify(&self, change: RemoteChange) {
        if *self.inner.deferred.lock() {
            self.inner.queued.lock().push_back(change);
            return;
        }
        self.dispatch(change);
    }

    fn dispatch(&self, change: RemoteChange) {
        // Snapshot listeners first so callbacks may subscribe or unsubscribe.
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .get(&change.key)
            .map(|ls| ls.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();

        for listener in listeners {
            listener(change.clone());
        }
    }

    fn apply_write(&self, key: StoreKey, value: Value) -> RemoteResult<WriteAck> {
        if *self.inner.fail_writes.lock() {
            return Err(RemoteError::Transport("simulated write failure".into()));
        }

        let revision = {
            let mut docs = self.inner.documents.lock();
            let revision = docs.get(&key).map(|d| d.revision + 1).unwrap_or(1);
            docs.insert(
                key,
                RemoteDocument {
                    value: value.clone(),
                    revision,
                },
            );
            revision
        };
        self.inner.writes.lock().push((key, value.clone()));

        self.notify(RemoteChange {
            key,
            value: Some(value),
            revision: Some(revision),
        });

        Ok(WriteAck { revision })
    }
}

impl RemoteStore for MemoryRemote {
    fn read(&self, key: StoreKey) -> BoxFuture<'_, RemoteResult<Option<RemoteDocument>>> {
        let result = if *self.inner.fail_reads.lock() {
            Err(RemoteError::Transport("simulated read failure".into()))
        } else {
            Ok(self.document(key))
        };
        Box::pin(async move { result })
    }

    fn write(&self, key: StoreKey, value: Value) -> BoxFuture<'_, RemoteResult<WriteAck>> {
        Box::pin(async move {
            self.wait_for_release().await;
            self.apply_write(key, value)
        })
    }

    fn subscribe(&self, key: StoreKey, listener: Listener) -> Subscription {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .entry(key)
            .or_default()
            .push((id, listener));

        let inner = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                if let Some(listeners) = inner.listeners.lock().get_mut(&key) {
                    listeners.retain(|(lid, _)| *lid != id);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn absent_versus_empty() {
        let remote = MemoryRemote::new().with_document(StoreKey::AttendanceRecords, json!([]));
        assert_eq!(remote.read(StoreKey::Roster).await, Ok(None));
        let doc = remote.read(StoreKey::AttendanceRecords).await.unwrap().unwrap();
        assert_eq!(doc.value, json!([]));
    }

    #[tokio::test]
    async fn writes_bump_revision_and_notify() {
        let remote = MemoryRemote::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = remote.subscribe(
            StoreKey::Roster,
            Arc::new(move |change| sink.lock().push(change)),
        );

        let first = remote.write(StoreKey::Roster, json!([1])).await.unwrap();
        let second = remote.write(StoreKey::Roster, json!([2])).await.unwrap();
        assert_eq!(first.revision, 1);
        assert_eq!(second.revision, 2);

        let seen_revisions: Vec<_> = seen.lock().iter().map(|c| c.revision).collect();
        assert_eq!(seen_revisions, vec![Some(1), Some(2)]);

        sub.unsubscribe();
        assert_eq!(remote.listener_count(StoreKey::Roster), 0);
        remote.write(StoreKey::Roster, json!([3])).await.unwrap();
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let device_a = MemoryRemote::new();
        let device_b = device_a.clone();
        device_a.write(StoreKey::Roster, json!(["x"])).await.unwrap();
        let doc = device_b.read(StoreKey::Roster).await.unwrap().unwrap();
        assert_eq!(doc.value, json!(["x"]));
    }

    #[tokio::test]
    async fn simulated_failures() {
        let remote = MemoryRemote::new();
        remote.set_fail_writes(true);
        assert!(remote.write(StoreKey::Roster, json!([])).await.is_err());
        assert!(remote.write_log().is_empty());

        remote.set_fail_reads(true);
        assert!(remote.read(StoreKey::Roster).await.is_err());
    }

    #[tokio::test]
    async fn deferred_notifications_arrive_on_demand() {
        let remote = MemoryRemote::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = remote.subscribe(
            StoreKey::Roster,
            Arc::new(move |change: RemoteChange| sink.lock().push(change.revision)),
        );

        remote.set_deferred(true);
        remote.write(StoreKey::Roster, json!([1])).await.unwrap();
        remote.write(StoreKey::Roster, json!([2])).await.unwrap();
        assert!(seen.lock().is_empty());
        assert_eq!(remote.queued_notifications(), 2);

        assert_eq!(remote.deliver_pending(), 2);
        assert_eq!(*seen.lock(), vec![Some(1), Some(2)]);
    }

    #[tokio::test]
    async fn held_writes_wait_for_release() {
        let remote = MemoryRemote::new();
        remote.hold_writes();

        let writer = remote.clone();
        let task = tokio::spawn(async move { writer.write(StoreKey::Roster, json!([1])).await });
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(remote.document(StoreKey::Roster).is_none());

        remote.release_writes();
        let ack = task.await.unwrap().unwrap();
        assert_eq!(ack.revision, 1);
        assert!(remote.document(StoreKey::Roster).is_some());
    }
}
