//! Record upgrade applied at the load boundary.
//!
//! The persisted documents carry no version field, so every value read from
//! the local cache, the remote store, or a live update passes through
//! [`upgrade`] before it is decoded. The upgrade is total (any JSON value is
//! accepted) and idempotent (`upgrade(upgrade(v)) == upgrade(v)`).
//!
//! Known legacy shapes:
//!
//! - roster entries written with `talent` instead of `points` and
//!   `baptismName` instead of `baptismalName`, or without `points` and
//!   `department` at all
//! - numeric grades (`6` rather than `"6"`)
//! - attendance records keyed by `student`/`grade`/`talentEarned`

use crate::record::Document;
use crate::StoreKey;
use serde_json::{Map, Value};

/// Upgrade a raw persisted value for `key` to the current record layout.
pub fn upgrade(key: StoreKey, value: Value) -> Value {
    match key {
        StoreKey::Roster => map_objects(value, upgrade_roster_entry),
        StoreKey::AttendanceRecords => map_objects(value, upgrade_attendance_record),
        StoreKey::AdminCredential | StoreKey::AdminSessionActive => value,
    }
}

/// Upgrade and decode a raw value.
///
/// Returns `None` when the value does not have the shape of `T`; callers treat
/// that exactly like an absent value.
pub fn decode<T: Document>(key: StoreKey, value: Value) -> Option<T> {
    match serde_json::from_value(upgrade(key, value)) {
        Ok(doc) => Some(doc),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Discarding malformed persisted value");
            None
        }
    }
}

fn map_objects(value: Value, f: fn(&mut Map<String, Value>)) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|mut item| {
                    if let Value::Object(fields) = &mut item {
                        f(fields);
                    }
                    item
                })
                .collect(),
        ),
        other => other,
    }
}

fn upgrade_roster_entry(fields: &mut Map<String, Value>) {
    rename(fields, "talent", "points");
    rename(fields, "baptismName", "baptismalName");

    let points = fields.get("points").map(normalize_points).unwrap_or(0);
    fields.insert("points".into(), Value::from(points));

    stringify(fields, "grade");
    default_string(fields, "grade");
    default_string(fields, "baptismalName");
    default_string(fields, "department");
}

fn upgrade_attendance_record(fields: &mut Map<String, Value>) {
    rename(fields, "student", "subjectName");
    rename(fields, "grade", "subjectGrade");
    rename(fields, "talentEarned", "pointsAwarded");

    stringify(fields, "subjectGrade");
    default_string(fields, "subjectGrade");
    default_string(fields, "department");

    if !matches!(fields.get("pointsAwarded"), Some(Value::Bool(_))) {
        let present = fields.get("status").and_then(Value::as_str) == Some("present");
        fields.insert("pointsAwarded".into(), Value::Bool(present));
    }
}

/// Move `from` to `to` unless `to` is already set. The legacy field is always
/// dropped.
fn rename(fields: &mut Map<String, Value>, from: &str, to: &str) {
    if let Some(old) = fields.remove(from) {
        if !fields.contains_key(to) {
            fields.insert(to.into(), old);
        }
    }
}

fn normalize_points(value: &Value) -> u64 {
    let points = match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    };
    points.min(u64::from(u32::MAX))
}

fn stringify(fields: &mut Map<String, Value>, name: &str) {
    if let Some(Value::Number(n)) = fields.get(name) {
        let s = n.to_string();
        fields.insert(name.into(), Value::String(s));
    }
}

fn default_string(fields: &mut Map<String, Value>, name: &str) {
    match fields.get(name) {
        Some(Value::String(_)) => {}
        _ => {
            fields.insert(name.into(), Value::String(String::new()));
        }
    }
}
