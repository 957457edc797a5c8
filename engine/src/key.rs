//! Persisted keys and their replication policy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One independently resolved slot in the local cache and remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreKey {
    #[serde(rename = "roster")]
    Roster,
    #[serde(rename = "attendanceRecords")]
    AttendanceRecords,
    #[serde(rename = "adminCredential")]
    AdminCredential,
    /// Local-session flag. Logging in on one device must never log in another.
    #[serde(rename = "adminSessionActive")]
    AdminSessionActive,
}

impl StoreKey {
    pub const ALL: [StoreKey; 4] = [
        StoreKey::Roster,
        StoreKey::AttendanceRecords,
        StoreKey::AdminCredential,
        StoreKey::AdminSessionActive,
    ];

    /// Wire name of the key, used for cache file names and remote document ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::Roster => "roster",
            StoreKey::AttendanceRecords => "attendanceRecords",
            StoreKey::AdminCredential => "adminCredential",
            StoreKey::AdminSessionActive => "adminSessionActive",
        }
    }

    pub fn parse(name: &str) -> Option<StoreKey> {
        StoreKey::ALL.into_iter().find(|k| k.as_str() == name)
    }

    /// Whether the key may ever be read from or written to the remote store.
    pub fn is_replicated(&self) -> bool {
        !matches!(self, StoreKey::AdminSessionActive)
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
