//! Process-wide sync context.
//!
//! One `SyncContext` is built at startup and handed to every coordinator. It
//! owns the local cache and the remote store connection, applies the
//! replication policy and the remote timeout, and tears everything down on
//! [`SyncContext::shutdown`].

use crate::cache::{FileCache, LocalCache};
use crate::config::{SyncConfig, DEFAULT_REMOTE_TIMEOUT};
use crate::error::RemoteError;
use crate::remote::{self, Listener, RemoteDocument, RemoteResult, RemoteStore, Subscription, WriteAck};
use crate::StoreKey;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Inner {
    local: Arc<dyn LocalCache>,
    remote: Arc<dyn RemoteStore>,
    timeout: Duration,
    closed: AtomicBool,
    next_subscription: AtomicU64,
    subscriptions: Mutex<HashMap<u64, Subscription>>,
}

/// Shared handle to the stores. Cheap to clone.
#[derive(Clone)]
pub struct SyncContext {
    inner: Arc<Inner>,
}

impl SyncContext {
    pub fn new(local: Arc<dyn LocalCache>, remote: Arc<dyn RemoteStore>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                local,
                remote,
                timeout,
                closed: AtomicBool::new(false),
                next_subscription: AtomicU64::new(0),
                subscriptions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Context without a remote store.
    pub fn local_only(local: Arc<dyn LocalCache>) -> Self {
        Self::new(local, Arc::new(remote::DisabledRemote), DEFAULT_REMOTE_TIMEOUT)
    }

    /// File-backed cache plus whatever remote `config` describes.
    pub fn from_config(config: &SyncConfig) -> Self {
        let local = Arc::new(FileCache::new(&config.data_dir));
        let remote = remote::connect(config.remote.as_ref());
        Self::new(local, remote, config.remote_timeout())
    }

    pub fn local(&self) -> &dyn LocalCache {
        self.inner.local.as_ref()
    }

    pub fn is_remote_configured(&self) -> bool {
        self.inner.remote.is_configured()
    }

    /// Whether remote reads, writes and subscriptions apply to `key`.
    pub fn replicates(&self, key: StoreKey) -> bool {
        key.is_replicated() && self.is_remote_configured() && !self.is_closed()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn check_remote(&self, key: StoreKey) -> RemoteResult<()> {
        if !key.is_replicated() {
            return Err(RemoteError::LocalOnlyKey(key.to_string()));
        }
        if self.is_closed() {
            return Err(RemoteError::Closed);
        }
        if !self.is_remote_configured() {
            return Err(RemoteError::NotConfigured);
        }
        Ok(())
    }

    async fn bounded<T>(&self, op: impl Future<Output = RemoteResult<T>>) -> RemoteResult<T> {
        match tokio::time::timeout(self.inner.timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(self.inner.timeout.as_millis() as u64)),
        }
    }

    /// Read `key` from the remote store. Local-only keys are never read.
    pub async fn remote_read(&self, key: StoreKey) -> RemoteResult<Option<RemoteDocument>> {
        self.check_remote(key)?;
        self.bounded(self.inner.remote.read(key)).await
    }

    /// Write `key` to the remote store. Local-only keys are never written.
    pub async fn remote_write(&self, key: StoreKey, value: Value) -> RemoteResult<WriteAck> {
        self.check_remote(key)?;
        self.bounded(self.inner.remote.write(key, value)).await
    }

    /// Subscribe to remote changes of `key`.
    ///
    /// The returned handle unsubscribes when dropped. Subscriptions still alive
    /// at [`shutdown`](Self::shutdown) are torn down then, and no listener runs
    /// after shutdown.
    pub fn remote_subscribe(&self, key: StoreKey, listener: Listener) -> Subscription {
        if self.check_remote(key).is_err() {
            return Subscription::inert();
        }

        let weak = Arc::downgrade(&self.inner);
        let gated: Listener = Arc::new(move |change| {
            let open = weak
                .upgrade()
                .is_some_and(|inner| !inner.closed.load(Ordering::Acquire));
            if open {
                listener(change);
            }
        });

        let subscription = self.inner.remote.subscribe(key, gated);
        if subscription.is_inert() {
            return subscription;
        }

        let id = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.inner.subscriptions.lock().insert(id, subscription);
        tracing::debug!(key = %key, subscription = id, "Remote subscription registered");

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let removed = inner.subscriptions.lock().remove(&id);
                drop(removed);
            }
        })
    }

    pub fn active_subscriptions(&self) -> usize {
        self.inner.subscriptions.lock().len()
    }

    /// Stop all remote activity. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let subscriptions: Vec<Subscription> = self
            .inner
            .subscriptions
            .lock()
            .drain()
            .map(|(_, s)| s)
            .collect();
        tracing::info!(
            subscriptions = subscriptions.len(),
            "Sync context shut down"
        );
        drop(subscriptions);
    }
}
