//! Per-key synchronization between memory, the local cache and the remote
//! store.
//!
//! A [`KeySync`] owns the in-memory value of one key and moves through
//! `Uninitialized -> Loading -> Steady`:
//!
//! 1. **Load** reads the local cache and the remote store. A present remote
//!    value wins and overwrites the cache; otherwise a non-vacant cached value
//!    is adopted and backfilled into the remote store; otherwise the caller's
//!    default is used. Failed or malformed reads fall through to the next
//!    source.
//! 2. **Mutations** update memory immediately, write the local cache
//!    synchronously and queue the remote write on a per-key writer task, so
//!    remote writes leave in mutation order.
//! 3. **Live updates** pass through the [`EchoGuard`] first. Notifications
//!    caused by our own writes are discarded; genuine peer changes are
//!    applied to memory and the local cache.

use crate::context::SyncContext;
use crate::migrate;
use crate::record::Document;
use crate::remote::{Listener, RemoteChange, Subscription};
use crate::StoreKey;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

/// Lifecycle of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Loading,
    Steady,
}

/// Which source a load adopted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Remote,
    Local,
    Default,
}

/// Classification of a live update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoVerdict {
    /// Reflection of our own write. Discard.
    Echo,
    /// Older than our acknowledged write. Discard and keep waiting.
    Stale,
    /// Change made elsewhere. Apply.
    Genuine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingWrite {
    id: u64,
    revision: Option<u64>,
}

/// Self-write marker for one key.
///
/// At most one marker exists at a time: starting a new write replaces any
/// previous one, and a failed write clears its own. A stuck marker can
/// therefore swallow at most one notification.
///
/// Independently of the marker, the guard keeps a watermark: the highest
/// revision this key already reflects, from our own acknowledged writes,
/// the loaded document or applied peer changes. Notifications at or below
/// it are never applied, however late they arrive.
#[derive(Debug, Default)]
pub struct EchoGuard {
    pending: Option<PendingWrite>,
    next_id: u64,
    watermark: Option<u64>,
}

impl EchoGuard {
    /// Mark a write as in flight. Returns its id.
    pub fn begin(&mut self) -> u64 {
        self.next_id += 1;
        self.pending = Some(PendingWrite {
            id: self.next_id,
            revision: None,
        });
        self.next_id
    }

    /// Record the revision the store assigned to write `id`.
    pub fn acknowledge(&mut self, id: u64, revision: u64) {
        self.observe(revision);
        if let Some(pending) = self.pending.as_mut().filter(|p| p.id == id) {
            pending.revision = Some(revision);
        }
    }

    /// Raise the watermark to `revision`.
    pub fn observe(&mut self, revision: u64) {
        self.watermark = Some(self.watermark.map_or(revision, |w| w.max(revision)));
    }

    pub fn watermark(&self) -> Option<u64> {
        self.watermark
    }

    /// Drop the marker of a failed write; its echo will never arrive.
    pub fn abandon(&mut self, id: u64) {
        if self.pending.is_some_and(|p| p.id == id) {
            self.pending = None;
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Decide what to do with a notification carrying `revision`.
    ///
    /// A revision at or below the watermark is already reflected: it is the
    /// echo of the acknowledged write or stale, and never touches a marker
    /// that belongs to a newer write. Otherwise, without a marker the
    /// notification is genuine; with one it is our echo, unless the
    /// acknowledged revision says it came after our write.
    pub fn classify(&mut self, revision: Option<u64>) -> EchoVerdict {
        if let (Some(rev), Some(mark)) = (revision, self.watermark) {
            if rev <= mark {
                if self.pending.is_some_and(|p| p.revision == Some(rev)) {
                    self.pending = None;
                    return EchoVerdict::Echo;
                }
                return EchoVerdict::Stale;
            }
        }

        let Some(pending) = self.pending.take() else {
            return EchoVerdict::Genuine;
        };
        match (pending.revision, revision) {
            (Some(ack), Some(rev)) if rev > ack => EchoVerdict::Genuine,
            _ => EchoVerdict::Echo,
        }
    }
}

/// Counters describing what a coordinator did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub remote_writes: u64,
    pub failed_remote_writes: u64,
    pub echoes_discarded: u64,
    pub remote_changes_applied: u64,
}

#[derive(Default)]
struct Counters {
    remote_writes: AtomicU64,
    failed_remote_writes: AtomicU64,
    echoes_discarded: AtomicU64,
    remote_changes_applied: AtomicU64,
}

enum Command {
    Write(Value),
    Flush(oneshot::Sender<()>),
}

struct Shared<T> {
    key: StoreKey,
    ctx: SyncContext,
    state: watch::Sender<T>,
    /// Serializes read-modify-write of `state` with remote application.
    mutation: Mutex<()>,
    phase: Mutex<Phase>,
    source: Mutex<Option<Source>>,
    echo: Mutex<EchoGuard>,
    counters: Counters,
}

impl<T: Document> Shared<T> {
    fn write_local(&self, value: &T) {
        let raw = match serde_json::to_value(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Failed to encode value for local cache");
                return;
            }
        };
        let local = self.ctx.local();
        // A local-only flag that turns off is removed so a restart cannot
        // resurrect it.
        if !self.key.is_replicated() && value.is_vacant() {
            local.remove(self.key);
        } else {
            local.write(self.key, &raw);
        }
    }

    fn apply_remote(&self, change: RemoteChange) {
        let verdict = self.echo.lock().classify(change.revision);
        match verdict {
            EchoVerdict::Echo => {
                self.counters.echoes_discarded.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %self.key, revision = ?change.revision, "Discarding echo of own write");
                return;
            }
            EchoVerdict::Stale => {
                tracing::debug!(key = %self.key, revision = ?change.revision, "Discarding stale notification");
                return;
            }
            EchoVerdict::Genuine => {}
        }

        let Some(raw) = change.value.filter(|v| !v.is_null()) else {
            tracing::warn!(key = %self.key, "Ignoring remote notification without a value");
            return;
        };
        let Some(value) = migrate::decode::<T>(self.key, raw) else {
            return;
        };

        if let Some(revision) = change.revision {
            self.echo.lock().observe(revision);
        }

        let _serial = self.mutation.lock();
        if *self.state.borrow() == value {
            return;
        }
        self.write_local(&value);
        self.state.send_replace(value);
        self.counters
            .remote_changes_applied
            .fetch_add(1, Ordering::Relaxed);
        tracing::info!(key = %self.key, revision = ?change.revision, "Applied remote change");
    }
}

/// Coordinator for one key.
pub struct KeySync<T: Document> {
    shared: Arc<Shared<T>>,
    writer: Option<mpsc::UnboundedSender<Command>>,
    subscription: Mutex<Option<Subscription>>,
}

impl<T: Document> KeySync<T> {
    /// Create a coordinator holding `initial` until [`load`](Self::load) runs.
    ///
    /// Replicated keys get a writer task, which requires a tokio runtime. Off
    /// a runtime the key degrades to local-only persistence.
    pub fn new(ctx: SyncContext, key: StoreKey, initial: T) -> Self {
        let (state, _) = watch::channel(initial);
        let shared = Arc::new(Shared {
            key,
            ctx,
            state,
            mutation: Mutex::new(()),
            phase: Mutex::new(Phase::Uninitialized),
            source: Mutex::new(None),
            echo: Mutex::new(EchoGuard::default()),
            counters: Counters::default(),
        });

        let writer = if shared.ctx.replicates(key) {
            spawn_writer(shared.clone())
        } else {
            None
        };

        Self {
            shared,
            writer,
            subscription: Mutex::new(None),
        }
    }

    pub fn key(&self) -> StoreKey {
        self.shared.key
    }

    pub fn phase(&self) -> Phase {
        *self.shared.phase.lock()
    }

    /// Source adopted by the last load, `None` before loading.
    pub fn source(&self) -> Option<Source> {
        *self.shared.source.lock()
    }

    /// Current in-memory value.
    pub fn get(&self) -> T {
        self.shared.state.borrow().clone()
    }

    /// Receiver notified whenever the value changes.
    pub fn watch(&self) -> watch::Receiver<T> {
        self.shared.state.subscribe()
    }

    pub fn stats(&self) -> SyncStats {
        let c = &self.shared.counters;
        SyncStats {
            remote_writes: c.remote_writes.load(Ordering::Relaxed),
            failed_remote_writes: c.failed_remote_writes.load(Ordering::Relaxed),
            echoes_discarded: c.echoes_discarded.load(Ordering::Relaxed),
            remote_changes_applied: c.remote_changes_applied.load(Ordering::Relaxed),
        }
    }

    /// Resolve the value of this key from both stores.
    ///
    /// Once the key is steady, further calls return the current value without
    /// touching either store.
    pub async fn load(&self, default: T) -> T {
        {
            let mut phase = self.shared.phase.lock();
            if *phase == Phase::Steady {
                return self.get();
            }
            *phase = Phase::Loading;
        }

        let key = self.shared.key;
        let ctx = &self.shared.ctx;

        let local = ctx
            .local()
            .read(key)
            .and_then(|raw| migrate::decode::<T>(key, raw));

        let remote = if ctx.replicates(key) {
            match ctx.remote_read(key).await {
                // A null document is how an absent value looks on the wire.
                Ok(Some(doc)) if !doc.value.is_null() => {
                    let revision = doc.revision;
                    migrate::decode::<T>(key, doc.value).map(|value| (value, revision))
                }
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Remote read failed, falling back to local cache");
                    None
                }
            }
        } else {
            None
        };

        let (value, source) = match (remote, local) {
            (Some((remote, revision)), _) => {
                tracing::debug!(key = %key, revision, "Adopting remote value");
                self.shared.echo.lock().observe(revision);
                self.shared.write_local(&remote);
                (remote, Source::Remote)
            }
            (None, Some(local)) if !local.is_vacant() => {
                tracing::debug!(key = %key, "Adopting cached value");
                if ctx.replicates(key) {
                    self.backfill(&local).await;
                }
                (local, Source::Local)
            }
            _ => {
                tracing::debug!(key = %key, "No stored value, using default");
                (default, Source::Default)
            }
        };

        {
            let _serial = self.shared.mutation.lock();
            self.shared.state.send_replace(value.clone());
        }
        *self.shared.source.lock() = Some(source);
        *self.shared.phase.lock() = Phase::Steady;
        value
    }

    async fn backfill(&self, value: &T) {
        let key = self.shared.key;
        let raw = match serde_json::to_value(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to encode value for remote backfill");
                return;
            }
        };
        let counters = &self.shared.counters;
        match self.shared.ctx.remote_write(key, raw).await {
            Ok(ack) => {
                self.shared.echo.lock().observe(ack.revision);
                counters.remote_writes.fetch_add(1, Ordering::Relaxed);
                tracing::info!(key = %key, revision = ack.revision, "Seeded remote store from local cache");
            }
            Err(e) => {
                counters.failed_remote_writes.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key, error = %e, "Remote backfill failed");
            }
        }
    }

    /// Mutate the value in place and persist the result.
    ///
    /// Memory and the local cache are updated before this returns; the remote
    /// write happens later on the writer task. Nothing is persisted when `f`
    /// leaves the value unchanged.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let _serial = self.shared.mutation.lock();
        let mut value = self.shared.state.borrow().clone();
        let result = f(&mut value);
        let changed = value != *self.shared.state.borrow();
        if changed {
            self.persist(&value);
            self.shared.state.send_replace(value);
        }
        result
    }

    /// Replace the whole value.
    pub fn set(&self, value: T) {
        self.update(|current| *current = value);
    }

    fn persist(&self, value: &T) {
        self.shared.write_local(value);

        let Some(writer) = &self.writer else {
            return;
        };
        if !self.shared.ctx.replicates(self.shared.key) {
            return;
        }
        match serde_json::to_value(value) {
            Ok(raw) => {
                if writer.send(Command::Write(raw)).is_err() {
                    tracing::warn!(key = %self.shared.key, "Writer task is gone, remote write dropped");
                }
            }
            Err(e) => {
                tracing::warn!(key = %self.shared.key, error = %e, "Failed to encode value for remote store");
            }
        }
    }

    /// Start applying live updates from the remote store.
    pub fn attach(&self) {
        if !self.shared.ctx.replicates(self.shared.key) {
            return;
        }
        let mut slot = self.subscription.lock();
        if slot.is_some() {
            return;
        }
        let weak = Arc::downgrade(&self.shared);
        let listener: Listener = Arc::new(move |change| {
            if let Some(shared) = weak.upgrade() {
                shared.apply_remote(change);
            }
        });
        *slot = Some(self.shared.ctx.remote_subscribe(self.shared.key, listener));
    }

    /// Stop applying live updates.
    pub fn detach(&self) {
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.unsubscribe();
        }
    }

    pub fn is_attached(&self) -> bool {
        self.subscription
            .lock()
            .as_ref()
            .is_some_and(|s| !s.is_inert())
    }

    /// Wait until every remote write queued so far has finished.
    pub async fn flush(&self) {
        let Some(writer) = &self.writer else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if writer.send(Command::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

fn spawn_writer<T: Document>(shared: Arc<Shared<T>>) -> Option<mpsc::UnboundedSender<Command>> {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::error!(key = %shared.key, "No tokio runtime, remote writes disabled for key");
        return None;
    };
    let (tx, rx) = mpsc::unbounded_channel();
    // The task only needs the context and the echo guard; holding the Arc keeps
    // both alive until the sender side is dropped.
    runtime.spawn(run_writer(shared, rx));
    Some(tx)
}

async fn run_writer<T: Document>(shared: Arc<Shared<T>>, mut rx: mpsc::UnboundedReceiver<Command>) {
    let key = shared.key;
    while let Some(command) = rx.recv().await {
        let mut latest = None;
        let mut waiters = Vec::new();
        match command {
            Command::Write(value) => latest = Some(value),
            Command::Flush(done) => waiters.push(done),
        }
        // Coalesce whatever queued up meanwhile: only the newest whole value
        // needs to reach the store.
        while let Ok(command) = rx.try_recv() {
            match command {
                Command::Write(value) => latest = Some(value),
                Command::Flush(done) => waiters.push(done),
            }
        }

        if let Some(value) = latest {
            let id = shared.echo.lock().begin();
            match shared.ctx.remote_write(key, value).await {
                Ok(ack) => {
                    shared.echo.lock().acknowledge(id, ack.revision);
                    shared.counters.remote_writes.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = %key, revision = ack.revision, "Remote write acknowledged");
                }
                Err(e) => {
                    shared.echo.lock().abandon(id);
                    shared
                        .counters
                        .failed_remote_writes
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(key = %key, error = %e, "Remote write failed, will retry on next mutation");
                }
            }
        }

        for done in waiters {
            let _ = done.send(());
        }
    }
    tracing::debug!(key = %key, "Writer task stopped");
}
