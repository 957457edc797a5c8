//! Durable local key/value cache.
//!
//! The cache is a best-effort accelerator: reads are synchronous and return
//! `None` for anything missing or unreadable, writes report success as a bool
//! and never propagate errors. Each key is an independent slot with no
//! cross-key transactions.

use crate::error::CacheError;
use crate::migrate;
use crate::record::Document;
use crate::StoreKey;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Local persistence for synchronized keys.
pub trait LocalCache: Send + Sync {
    /// Read the raw value stored under `key`.
    fn read(&self, key: StoreKey) -> Option<Value>;

    /// Store `value` under `key`. Failures are logged and reported as `false`.
    fn write(&self, key: StoreKey, value: &Value) -> bool;

    /// Delete the value stored under `key`. Removing a missing key succeeds.
    fn remove(&self, key: StoreKey) -> bool;
}

/// Read and decode `key`, falling back to `default` when the slot is empty or
/// malformed.
pub fn read_or<T: Document>(cache: &dyn LocalCache, key: StoreKey, default: T) -> T {
    cache
        .read(key)
        .and_then(|raw| migrate::decode(key, raw))
        .unwrap_or(default)
}

/// One JSON file per key inside a data directory.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: StoreKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.as_str()))
    }

    fn try_read(&self, key: StoreKey) -> Result<Option<Value>, CacheError> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn try_write(&self, key: StoreKey, value: &Value) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");

        // Write to a sibling file first so a crash never leaves a torn value.
        {
            let mut file = fs::File::create(&tmp)?;
            serde_json::to_writer(&mut file, value)?;
            file.flush()?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn try_remove(&self, key: StoreKey) -> Result<(), CacheError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl LocalCache for FileCache {
    fn read(&self, key: StoreKey) -> Option<Value> {
        match self.try_read(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to read local cache");
                None
            }
        }
    }

    fn write(&self, key: StoreKey, value: &Value) -> bool {
        match self.try_write(key, value) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to write local cache");
                false
            }
        }
    }

    fn remove(&self, key: StoreKey) -> bool {
        match self.try_remove(key) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to remove local cache entry");
                false
            }
        }
    }
}

/// In-process cache for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryCache {
    slots: Mutex<HashMap<StoreKey, Value>>,
    fail_writes: Mutex<bool>,
    writes: Mutex<Vec<(StoreKey, Option<Value>)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a slot without recording it as a write.
    pub fn with_value(self, key: StoreKey, value: Value) -> Self {
        self.slots.lock().insert(key, value);
        self
    }

    /// Make every subsequent write and remove fail.
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock() = fail;
    }

    /// Every attempted write (`Some`) and remove (`None`), in order.
    pub fn write_log(&self) -> Vec<(StoreKey, Option<Value>)> {
        self.writes.lock().clone()
    }

    pub fn contains(&self, key: StoreKey) -> bool {
        self.slots.lock().contains_key(&key)
    }

    fn check_writable(&self, key: StoreKey) -> Result<(), CacheError> {
        if *self.fail_writes.lock() {
            return Err(CacheError::Rejected(key.to_string()));
        }
        Ok(())
    }
}

impl LocalCache for MemoryCache {
    fn read(&self, key: StoreKey) -> Option<Value> {
        self.slots.lock().get(&key).cloned()
    }

    fn write(&self, key: StoreKey, value: &Value) -> bool {
        self.writes.lock().push((key, Some(value.clone())));
        if let Err(e) = self.check_writable(key) {
            tracing::warn!(key = %key, error = %e, "Failed to write local cache");
            return false;
        }
        self.slots.lock().insert(key, value.clone());
        true
    }

    fn remove(&self, key: StoreKey) -> bool {
        self.writes.lock().push((key, None));
        if let Err(e) = self.check_writable(key) {
            tracing::warn!(key = %key, error = %e, "Failed to remove local cache entry");
            return false;
        }
        self.slots.lock().remove(&key);
        true
    }
}
