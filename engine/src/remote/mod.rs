//! Optional shared document store with live updates.
//!
//! A [`RemoteStore`] holds one whole document per key. Reads distinguish an
//! absent document (`Ok(None)`) from a present but empty one, writes replace the
//! whole value (last write wins), and subscriptions deliver every change,
//! including changes made by this same process. Telling those echoes apart from
//! peer writes is the coordinator's job, not the store's.
//!
//! Implementations:
//!
//! - [`HttpRemoteStore`] talks to `rollcall-server`
//! - [`MemoryRemote`] is an in-process store whose clones share state
//! - [`DisabledRemote`] is the no-op used when no remote is configured or the
//!   configured one could not be constructed

mod http;
mod memory;

pub use http::{HttpRemoteStore, SseDecoder};
pub use memory::MemoryRemote;

use crate::config::RemoteConfig;
use crate::error::RemoteError;
use crate::StoreKey;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Result type for remote operations.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// A document as currently held by the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDocument {
    pub value: Value,
    pub revision: u64,
}

/// Acknowledgement returned by a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteAck {
    /// Revision assigned to the written value. Live updates caused by this
    /// write carry the same revision.
    pub revision: u64,
}

/// A live-update notification.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteChange {
    pub key: StoreKey,
    /// New value, `None` when the document no longer exists.
    pub value: Option<Value>,
    /// Revision of the change, when the store reports one.
    pub revision: Option<u64>,
}

/// Callback invoked for every change of a subscribed key.
pub type Listener = Arc<dyn Fn(RemoteChange) + Send + Sync>;

/// Handle for a live subscription. Dropping it unsubscribes.
#[must_use = "dropping a Subscription immediately unsubscribes"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription that never delivers anything.
    pub fn inert() -> Self {
        Self { cancel: None }
    }

    pub fn is_inert(&self) -> bool {
        self.cancel.is_none()
    }

    /// Stop delivering updates.
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &!self.is_inert())
            .finish()
    }
}

/// A networked (or simulated) document store.
pub trait RemoteStore: Send + Sync {
    /// Whether this store can ever succeed. `false` only for [`DisabledRemote`].
    fn is_configured(&self) -> bool {
        true
    }

    /// Read the document stored under `key`.
    fn read(&self, key: StoreKey) -> BoxFuture<'_, RemoteResult<Option<RemoteDocument>>>;

    /// Replace the document stored under `key`.
    fn write(&self, key: StoreKey, value: Value) -> BoxFuture<'_, RemoteResult<WriteAck>>;

    /// Register `listener` for changes of `key`.
    fn subscribe(&self, key: StoreKey, listener: Listener) -> Subscription;
}

/// Remote store used in local-only mode. Every call fails or reads absent.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledRemote;

impl RemoteStore for DisabledRemote {
    fn is_configured(&self) -> bool {
        false
    }

    fn read(&self, _key: StoreKey) -> BoxFuture<'_, RemoteResult<Option<RemoteDocument>>> {
        Box::pin(async { Ok(None) })
    }

    fn write(&self, _key: StoreKey, _value: Value) -> BoxFuture<'_, RemoteResult<WriteAck>> {
        Box::pin(async { Err(RemoteError::NotConfigured) })
    }

    fn subscribe(&self, _key: StoreKey, _listener: Listener) -> Subscription {
        Subscription::inert()
    }
}

/// Build the remote store described by `config`.
///
/// No configuration, or a configuration that cannot be turned into a client,
/// yields [`DisabledRemote`] and the engine runs in local-only mode.
pub fn connect(config: Option<&RemoteConfig>) -> Arc<dyn RemoteStore> {
    let Some(config) = config else {
        tracing::info!("No remote store configured, running in local-only mode");
        return Arc::new(DisabledRemote);
    };

    match HttpRemoteStore::new(config) {
        Ok(store) => {
            tracing::info!(
                url = %config.base_url,
                collection = %config.collection,
                "Remote store configured"
            );
            Arc::new(store)
        }
        Err(e) => {
            tracing::error!(
                url = %config.base_url,
                error = %e,
                "Remote store initialization failed, running in local-only mode"
            );
            Arc::new(DisabledRemote)
        }
    }
}
