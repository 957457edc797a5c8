//! Error types for the Rollcall engine.

use thiserror::Error;

/// Errors surfaced to callers of the engine.
///
/// Transient storage failures never appear here: local and remote I/O
/// problems are logged and absorbed by the sync layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("roster entry already exists: {name} (grade {grade})")]
    DuplicateEntry { name: String, grade: String },

    #[error("invalid roster entry: {0}")]
    InvalidEntry(String),

    #[error("no roster entries match {0}")]
    EmptyScope(String),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the durable local cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("cache write rejected for {0}")]
    Rejected(String),
}

/// Failures of the remote document store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote store is not configured")]
    NotConfigured,

    #[error("key {0} is never replicated")]
    LocalOnlyKey(String),

    #[error("remote operation timed out after {0} ms")]
    Timeout(u64),

    #[error("remote transport error: {0}")]
    Transport(String),

    #[error("remote returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("remote sent malformed data: {0}")]
    Malformed(String),

    #[error("remote store has been shut down")]
    Closed,
}
