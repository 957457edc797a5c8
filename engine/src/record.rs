//! Record types stored under each key.

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A member of the roster.
///
/// Identity is the `(name, grade)` pair; there is no surrogate id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub name: String,
    /// Numeric grade ("1".."6") or a named cohort.
    pub grade: String,
    #[serde(default)]
    pub baptismal_name: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub points: u32,
}

impl RosterEntry {
    pub fn new(name: impl Into<String>, grade: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            grade: grade.into(),
            baptismal_name: String::new(),
            department: String::new(),
            points: 0,
        }
    }

    pub fn with_baptismal_name(mut self, baptismal_name: impl Into<String>) -> Self {
        self.baptismal_name = baptismal_name.into();
        self
    }

    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = department.into();
        self
    }

    pub fn with_points(mut self, points: u32) -> Self {
        self.points = points;
        self
    }

    /// Check whether this entry has the given identity.
    pub fn is(&self, name: &str, grade: &str) -> bool {
        self.name == name && self.grade == grade
    }

    /// Check whether two entries share an identity.
    pub fn same_identity(&self, other: &RosterEntry) -> bool {
        self.is(&other.name, &other.grade)
    }
}

/// Attendance status for one subject on one date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

/// A single attendance mark.
///
/// Identity is `(date, subject_name, subject_grade)`. Grade and department are
/// denormalized copies of the roster entry at the time of creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub date: NaiveDate,
    pub subject_name: String,
    pub subject_grade: String,
    #[serde(default)]
    pub department: String,
    pub status: AttendanceStatus,
    #[serde(default)]
    pub points_awarded: bool,
}

impl AttendanceRecord {
    /// Create a record for a roster entry.
    pub fn for_entry(
        date: NaiveDate,
        entry: &RosterEntry,
        status: AttendanceStatus,
        points_awarded: bool,
    ) -> Self {
        Self {
            date,
            subject_name: entry.name.clone(),
            subject_grade: entry.grade.clone(),
            department: entry.department.clone(),
            status,
            points_awarded,
        }
    }

    pub fn is(&self, date: NaiveDate, name: &str, grade: &str) -> bool {
        self.date == date && self.subject_name == name && self.subject_grade == grade
    }

    pub fn same_identity(&self, other: &AttendanceRecord) -> bool {
        self.is(other.date, &other.subject_name, &other.subject_grade)
    }

    pub fn is_present(&self) -> bool {
        self.status == AttendanceStatus::Present
    }
}

/// A value that can live under a key.
///
/// `is_vacant` decides whether a locally cached value is worth backfilling
/// into an empty remote store.
pub trait Document:
    Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static
{
    fn is_vacant(&self) -> bool;
}

impl Document for Vec<RosterEntry> {
    fn is_vacant(&self) -> bool {
        self.is_empty()
    }
}

impl Document for Vec<AttendanceRecord> {
    fn is_vacant(&self) -> bool {
        self.is_empty()
    }
}

impl Document for Option<String> {
    fn is_vacant(&self) -> bool {
        self.as_deref().map_or(true, str::is_empty)
    }
}

impl Document for bool {
    fn is_vacant(&self) -> bool {
        !*self
    }
}
