//! Whole-dataset export and import.
//!
//! A snapshot carries the roster and every attendance record in one JSON
//! document. Import runs the same record upgrade as the load path, so files
//! exported by older clients (`students` / `attendanceData`, no format
//! version) are accepted.

use crate::error::{Error, Result};
use crate::migrate;
use crate::record::{AttendanceRecord, RosterEntry};
use crate::StoreKey;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Point-in-time copy of the dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub format_version: u32,
    pub roster: Vec<RosterEntry>,
    pub attendance_records: Vec<AttendanceRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// Snapshot of the given collections, stamped with the current time.
    pub fn new(roster: Vec<RosterEntry>, attendance_records: Vec<AttendanceRecord>) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            roster,
            attendance_records,
            exported_at: Some(Utc::now()),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Parse and upgrade a snapshot document.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;
        let Value::Object(mut doc) = value else {
            return Err(Error::InvalidSnapshot("expected a JSON object".into()));
        };

        let format_version = match doc.get("formatVersion") {
            None => 0,
            Some(v) => v
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| Error::InvalidSnapshot(format!("bad format version: {}", v)))?,
        };
        if format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        let roster = take_collection(&mut doc, StoreKey::Roster, &["roster", "students"])?;
        let attendance_records = take_collection(
            &mut doc,
            StoreKey::AttendanceRecords,
            &["attendanceRecords", "attendanceData"],
        )?;
        // An unreadable timestamp is not worth rejecting a backup over.
        let exported_at = doc
            .remove("exportedAt")
            .and_then(|v| serde_json::from_value(v).ok());

        Ok(Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            roster,
            attendance_records,
            exported_at,
        })
    }
}

fn take_collection<T: DeserializeOwned>(
    doc: &mut Map<String, Value>,
    key: StoreKey,
    names: &[&str],
) -> Result<Vec<T>> {
    let raw = names
        .iter()
        .find_map(|name| doc.remove(*name))
        .ok_or_else(|| Error::InvalidSnapshot(format!("missing {}", names[0])))?;
    if !raw.is_array() {
        return Err(Error::InvalidSnapshot(format!("{} is not an array", names[0])));
    }
    serde_json::from_value(migrate::upgrade(key, raw))
        .map_err(|e| Error::InvalidSnapshot(format!("{}: {}", names[0], e)))
}
