//! Reactive application state.
//!
//! [`ReactiveState`] is the single entry point consumers use. It owns one
//! [`KeySync`] per persisted key. Every mutator updates memory before it
//! returns; persistence to the local cache and the remote store happens
//! underneath, so callers that need it settled must `flush().await`.

use crate::context::SyncContext;
use crate::coordinator::{KeySync, SyncStats};
use crate::credential::{self, LoginOutcome};
use crate::error::{Error, Result};
use crate::record::{AttendanceRecord, AttendanceStatus, RosterEntry};
use crate::snapshot::Snapshot;
use crate::StoreKey;
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tokio::sync::watch;

/// Identity of a roster entry: `(name, grade)`.
pub type EntryId = (String, String);

/// Which part of the roster an attendance session covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Grade(String),
    Department(String),
}

impl Scope {
    fn value(&self) -> &str {
        match self {
            Scope::Grade(v) | Scope::Department(v) => v,
        }
    }

    fn includes_entry(&self, entry: &RosterEntry) -> bool {
        match self {
            Scope::Grade(grade) => entry.grade == *grade,
            Scope::Department(department) => entry.department == *department,
        }
    }

    fn includes_record(&self, record: &AttendanceRecord) -> bool {
        match self {
            Scope::Grade(grade) => record.subject_grade == *grade,
            Scope::Department(department) => record.department == *department,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Grade(grade) => write!(f, "grade {:?}", grade),
            Scope::Department(department) => write!(f, "department {:?}", department),
        }
    }
}

/// Outcome of [`ReactiveState::import_roster`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub added: usize,
    pub skipped: usize,
}

/// Outcome of [`ReactiveState::take_attendance`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceSummary {
    pub date: NaiveDate,
    pub marked: usize,
    pub present: usize,
    pub absent: usize,
    /// Entries that earned a point in this session.
    pub points_awarded: usize,
}

/// Dataset totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub entries: usize,
    pub records: usize,
    pub distinct_dates: usize,
    pub present: usize,
    pub absent: usize,
    pub total_points: u64,
}

pub struct ReactiveState {
    ctx: SyncContext,
    roster: KeySync<Vec<RosterEntry>>,
    attendance: KeySync<Vec<AttendanceRecord>>,
    credential: KeySync<Option<String>>,
    session: KeySync<bool>,
}

impl ReactiveState {
    /// Load every key and start live updates.
    ///
    /// Keys load concurrently; each one resolves on its own and never fails.
    pub async fn open(ctx: SyncContext) -> Self {
        let state = Self {
            roster: KeySync::new(ctx.clone(), StoreKey::Roster, Vec::new()),
            attendance: KeySync::new(ctx.clone(), StoreKey::AttendanceRecords, Vec::new()),
            credential: KeySync::new(ctx.clone(), StoreKey::AdminCredential, None),
            session: KeySync::new(ctx.clone(), StoreKey::AdminSessionActive, false),
            ctx,
        };

        tokio::join!(
            state.roster.load(Vec::new()),
            state.attendance.load(Vec::new()),
            state.credential.load(None),
            state.session.load(false),
        );

        state.roster.attach();
        state.attendance.attach();
        state.credential.attach();

        tracing::info!(
            entries = state.roster.get().len(),
            records = state.attendance.get().len(),
            remote = state.ctx.is_remote_configured(),
            "State loaded"
        );
        state
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn roster(&self) -> Vec<RosterEntry> {
        self.roster.get()
    }

    pub fn attendance(&self) -> Vec<AttendanceRecord> {
        self.attendance.get()
    }

    pub fn is_admin(&self) -> bool {
        self.session.get()
    }

    /// Whether first-time setup has happened.
    pub fn has_credential(&self) -> bool {
        self.credential.get().is_some_and(|c| !c.is_empty())
    }

    pub fn watch_roster(&self) -> watch::Receiver<Vec<RosterEntry>> {
        self.roster.watch()
    }

    pub fn watch_attendance(&self) -> watch::Receiver<Vec<AttendanceRecord>> {
        self.attendance.watch()
    }

    pub fn watch_admin(&self) -> watch::Receiver<bool> {
        self.session.watch()
    }

    /// Sync counters of one key.
    pub fn sync_stats(&self, key: StoreKey) -> SyncStats {
        match key {
            StoreKey::Roster => self.roster.stats(),
            StoreKey::AttendanceRecords => self.attendance.stats(),
            StoreKey::AdminCredential => self.credential.stats(),
            StoreKey::AdminSessionActive => self.session.stats(),
        }
    }

    // Roster

    /// Add an entry. Name and grade are trimmed and must not be empty.
    pub fn add_roster_entry(&self, entry: RosterEntry) -> Result<()> {
        let entry = normalize_entry(entry)?;
        self.roster.update(|roster| {
            if roster.iter().any(|e| e.same_identity(&entry)) {
                return Err(Error::DuplicateEntry {
                    name: entry.name.clone(),
                    grade: entry.grade.clone(),
                });
            }
            tracing::debug!(name = %entry.name, grade = %entry.grade, "Roster entry added");
            roster.push(entry);
            Ok(())
        })
    }

    /// Remove an entry. Its attendance records are kept.
    pub fn delete_roster_entry(&self, name: &str, grade: &str) -> bool {
        self.roster.update(|roster| {
            let before = roster.len();
            roster.retain(|e| !e.is(name, grade));
            roster.len() != before
        })
    }

    /// Add many entries at once, skipping invalid ones and duplicates
    /// (including duplicates within `entries`).
    pub fn import_roster(&self, entries: impl IntoIterator<Item = RosterEntry>) -> ImportSummary {
        let summary = self.roster.update(|roster| {
            let mut summary = ImportSummary::default();
            for entry in entries {
                match normalize_entry(entry) {
                    Ok(entry) if !roster.iter().any(|e| e.same_identity(&entry)) => {
                        roster.push(entry);
                        summary.added += 1;
                    }
                    _ => summary.skipped += 1,
                }
            }
            summary
        });
        tracing::info!(added = summary.added, skipped = summary.skipped, "Roster imported");
        summary
    }

    /// Give one point to an entry. Returns the new total, or `None` when no
    /// such entry exists.
    pub fn award_points(&self, name: &str, grade: &str) -> Option<u32> {
        self.roster.update(|roster| {
            let entry = roster.iter_mut().find(|e| e.is(name, grade))?;
            entry.points = entry.points.saturating_add(1);
            Some(entry.points)
        })
    }

    /// Set every entry's points back to zero.
    pub fn reset_points(&self) {
        self.roster.update(|roster| {
            for entry in roster.iter_mut() {
                entry.points = 0;
            }
        });
        tracing::info!("Points reset");
    }

    // Attendance

    /// Insert a record, replacing any record with the same identity.
    pub fn add_attendance_record(&self, record: AttendanceRecord) {
        self.attendance.update(|records| {
            records.retain(|r| !r.same_identity(&record));
            records.push(record);
        });
    }

    pub fn delete_attendance_record(&self, date: NaiveDate, name: &str, grade: &str) -> bool {
        self.attendance.update(|records| {
            let before = records.len();
            records.retain(|r| !r.is(date, name, grade));
            records.len() != before
        })
    }

    /// Record an attendance session.
    ///
    /// Records of `date` inside `scope` are replaced by one record per roster
    /// entry in scope. Entries missing from `statuses` count as present. Each
    /// present entry earns a point, except when the record it replaces had
    /// already earned one.
    pub fn take_attendance(
        &self,
        date: NaiveDate,
        scope: &Scope,
        statuses: &HashMap<EntryId, AttendanceStatus>,
    ) -> Result<AttendanceSummary> {
        if scope.value().trim().is_empty() {
            return Err(Error::EmptyScope(scope.to_string()));
        }
        let in_scope: Vec<RosterEntry> = self
            .roster
            .get()
            .into_iter()
            .filter(|e| scope.includes_entry(e))
            .collect();
        if in_scope.is_empty() {
            return Err(Error::EmptyScope(scope.to_string()));
        }

        let mut summary = AttendanceSummary {
            date,
            marked: in_scope.len(),
            present: 0,
            absent: 0,
            points_awarded: 0,
        };
        let mut earners: Vec<EntryId> = Vec::new();

        self.attendance.update(|records| {
            let (replaced, kept): (Vec<_>, Vec<_>) = std::mem::take(records)
                .into_iter()
                .partition(|r| r.date == date && scope.includes_record(r));
            *records = kept;

            for entry in &in_scope {
                let id = (entry.name.clone(), entry.grade.clone());
                let status = statuses
                    .get(&id)
                    .copied()
                    .unwrap_or(AttendanceStatus::Present);
                let present = status == AttendanceStatus::Present;
                // The award sticks to the date once granted, even through an
                // absent save, so re-marking present never pays twice.
                let already = replaced
                    .iter()
                    .any(|r| r.is(date, &entry.name, &entry.grade) && r.points_awarded);
                if present {
                    summary.present += 1;
                    if !already {
                        earners.push(id);
                    }
                } else {
                    summary.absent += 1;
                }
                records.push(AttendanceRecord::for_entry(date, entry, status, present || already));
            }
        });

        if !earners.is_empty() {
            self.roster.update(|roster| {
                for entry in roster.iter_mut() {
                    if earners.iter().any(|(n, g)| entry.is(n, g)) {
                        entry.points = entry.points.saturating_add(1);
                    }
                }
            });
        }
        summary.points_awarded = earners.len();

        tracing::info!(
            date = %date,
            scope = %scope,
            present = summary.present,
            absent = summary.absent,
            awarded = summary.points_awarded,
            "Attendance taken"
        );
        Ok(summary)
    }

    pub fn records_for(&self, name: &str, grade: &str) -> Vec<AttendanceRecord> {
        let mut records: Vec<_> = self
            .attendance
            .get()
            .into_iter()
            .filter(|r| r.subject_name == name && r.subject_grade == grade)
            .collect();
        records.sort_by_key(|r| r.date);
        records
    }

    pub fn records_on(&self, date: NaiveDate) -> Vec<AttendanceRecord> {
        self.attendance
            .get()
            .into_iter()
            .filter(|r| r.date == date)
            .collect()
    }

    pub fn stats(&self) -> Stats {
        let roster = self.roster.get();
        let records = self.attendance.get();
        let present = records.iter().filter(|r| r.is_present()).count();
        Stats {
            entries: roster.len(),
            records: records.len(),
            distinct_dates: records.iter().map(|r| r.date).collect::<BTreeSet<_>>().len(),
            present,
            absent: records.len() - present,
            total_points: roster.iter().map(|e| u64::from(e.points)).sum(),
        }
    }

    // Credential and session

    /// Log in, setting the credential on first use.
    ///
    /// A legacy plain-text credential is re-stored in hashed form after a
    /// successful login.
    pub fn login(&self, secret: &str) -> LoginOutcome {
        if secret.is_empty() {
            return LoginOutcome::Rejected;
        }
        let outcome = match self.credential.get().filter(|c| !c.is_empty()) {
            None => {
                self.credential.set(Some(credential::hash(secret)));
                LoginOutcome::FirstTimeSetup
            }
            Some(stored) if credential::verify(&stored, secret) => {
                if credential::is_legacy(&stored) {
                    self.credential.set(Some(credential::hash(secret)));
                }
                LoginOutcome::Authenticated
            }
            Some(_) => LoginOutcome::Rejected,
        };

        if outcome.is_success() {
            self.session.set(true);
        }
        tracing::info!(outcome = ?outcome, "Admin login");
        outcome
    }

    pub fn logout(&self) {
        self.session.set(false);
        tracing::info!("Admin logout");
    }

    /// Replace the credential. Requires the current secret.
    pub fn change_credential(&self, old: &str, new: &str) -> bool {
        if new.is_empty() || !self.verify_secret(old) {
            return false;
        }
        self.credential.set(Some(credential::hash(new)));
        tracing::info!("Admin credential changed");
        true
    }

    fn verify_secret(&self, secret: &str) -> bool {
        self.credential
            .get()
            .is_some_and(|stored| !stored.is_empty() && credential::verify(&stored, secret))
    }

    // Whole dataset

    pub fn export_snapshot(&self) -> Snapshot {
        Snapshot::new(self.roster.get(), self.attendance.get())
    }

    /// Overwrite roster and attendance with a snapshot.
    ///
    /// Roster entries repeating an identity are dropped, first one wins.
    pub fn replace_all(&self, snapshot: Snapshot) {
        let mut roster: Vec<RosterEntry> = Vec::with_capacity(snapshot.roster.len());
        for entry in snapshot.roster {
            if roster.iter().any(|e| e.same_identity(&entry)) {
                tracing::warn!(name = %entry.name, grade = %entry.grade, "Dropping duplicate roster entry from snapshot");
                continue;
            }
            roster.push(entry);
        }
        let entries = roster.len();
        let records = snapshot.attendance_records.len();

        self.roster.set(roster);
        self.attendance.set(snapshot.attendance_records);
        tracing::info!(entries, records, "Dataset replaced");
    }

    /// Erase roster and attendance after checking the admin secret.
    pub fn clear_all(&self, secret: &str) -> bool {
        if !self.verify_secret(secret) {
            tracing::warn!("Refusing to clear data: credential mismatch");
            return false;
        }
        self.roster.set(Vec::new());
        self.attendance.set(Vec::new());
        tracing::info!("All data cleared");
        true
    }

    // Lifecycle

    /// Wait for every queued remote write.
    pub async fn flush(&self) {
        tokio::join!(
            self.roster.flush(),
            self.attendance.flush(),
            self.credential.flush(),
            self.session.flush(),
        );
    }

    /// Stop live updates. The context stays usable by other owners; call
    /// [`SyncContext::shutdown`] to end remote activity for the process.
    pub fn close(&self) {
        self.roster.detach();
        self.attendance.detach();
        self.credential.detach();
        self.session.detach();
        tracing::info!("State closed");
    }
}

fn normalize_entry(mut entry: RosterEntry) -> Result<RosterEntry> {
    entry.name = entry.name.trim().to_string();
    entry.grade = entry.grade.trim().to_string();
    entry.baptismal_name = entry.baptismal_name.trim().to_string();
    entry.department = entry.department.trim().to_string();
    if entry.name.is_empty() {
        return Err(Error::InvalidEntry("name must not be empty".into()));
    }
    if entry.grade.is_empty() {
        return Err(Error::InvalidEntry("grade must not be empty".into()));
    }
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use std::sync::Arc;

    async fn local_state() -> ReactiveState {
        ReactiveState::open(SyncContext::local_only(Arc::new(MemoryCache::new()))).await
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn add_trims_and_rejects_duplicates() {
        let state = local_state().await;
        state
            .add_roster_entry(RosterEntry::new("  Kim ", "1").with_department(" choir "))
            .unwrap();
        assert_eq!(state.roster()[0].name, "Kim");
        assert_eq!(state.roster()[0].department, "choir");

        let err = state.add_roster_entry(RosterEntry::new("Kim", "1")).unwrap_err();
        assert_eq!(
            err,
            Error::DuplicateEntry {
                name: "Kim".into(),
                grade: "1".into()
            }
        );
        state.add_roster_entry(RosterEntry::new("Kim", "2")).unwrap();
        assert!(matches!(
            state.add_roster_entry(RosterEntry::new("   ", "2")),
            Err(Error::InvalidEntry(_))
        ));
        assert_eq!(state.roster().len(), 2);
    }

    #[tokio::test]
    async fn import_skips_duplicates_inside_batch() {
        let state = local_state().await;
        state.add_roster_entry(RosterEntry::new("Kim", "1")).unwrap();
        let summary = state.import_roster(vec![
            RosterEntry::new("Kim", "1"),
            RosterEntry::new("Lee", "2"),
            RosterEntry::new("Lee", "2"),
            RosterEntry::new("", "3"),
        ]);
        assert_eq!(summary, ImportSummary { added: 1, skipped: 3 });
    }

    #[tokio::test]
    async fn delete_entry_keeps_attendance() {
        let state = local_state().await;
        let kim = RosterEntry::new("Kim", "1");
        state.add_roster_entry(kim.clone()).unwrap();
        state.add_attendance_record(AttendanceRecord::for_entry(
            date("2024-03-03"),
            &kim,
            AttendanceStatus::Present,
            true,
        ));

        assert!(state.delete_roster_entry("Kim", "1"));
        assert!(!state.delete_roster_entry("Kim", "1"));
        assert_eq!(state.records_for("Kim", "1").len(), 1);
    }

    #[tokio::test]
    async fn attendance_record_is_replaced_on_identity() {
        let state = local_state().await;
        let kim = RosterEntry::new("Kim", "1");
        let day = date("2024-03-03");
        state.add_attendance_record(AttendanceRecord::for_entry(day, &kim, AttendanceStatus::Present, true));
        state.add_attendance_record(AttendanceRecord::for_entry(day, &kim, AttendanceStatus::Absent, false));

        let records = state.records_on(day);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, AttendanceStatus::Absent);
        assert!(state.delete_attendance_record(day, "Kim", "1"));
        assert!(state.attendance().is_empty());
    }

    #[tokio::test]
    async fn take_attendance_awards_once_per_session() {
        let state = local_state().await;
        state.add_roster_entry(RosterEntry::new("Kim", "1")).unwrap();
        state.add_roster_entry(RosterEntry::new("Park", "1")).unwrap();
        state.add_roster_entry(RosterEntry::new("Lee", "2")).unwrap();
        let day = date("2024-03-03");
        let scope = Scope::Grade("1".into());

        let mut statuses = HashMap::new();
        statuses.insert(("Park".to_string(), "1".to_string()), AttendanceStatus::Absent);
        let summary = state.take_attendance(day, &scope, &statuses).unwrap();
        assert_eq!(summary.marked, 2);
        assert_eq!(summary.present, 1);
        assert_eq!(summary.absent, 1);
        assert_eq!(summary.points_awarded, 1);

        // Saving the same session again replaces records without re-awarding.
        let again = state.take_attendance(day, &scope, &statuses).unwrap();
        assert_eq!(again.points_awarded, 0);
        assert_eq!(state.records_on(day).len(), 2);

        // Park turns out to have been present after all.
        let summary = state.take_attendance(day, &scope, &HashMap::new()).unwrap();
        assert_eq!(summary.points_awarded, 1);

        let points: Vec<u32> = state.roster().iter().map(|e| e.points).collect();
        assert_eq!(points, vec![1, 1, 0]);
    }

    #[tokio::test]
    async fn absent_save_does_not_reset_award() {
        let state = local_state().await;
        state.add_roster_entry(RosterEntry::new("Park", "1")).unwrap();
        let day = date("2024-03-03");
        let scope = Scope::Grade("1".into());
        let park = ("Park".to_string(), "1".to_string());

        let present = HashMap::new();
        let absent = HashMap::from([(park, AttendanceStatus::Absent)]);

        assert_eq!(state.take_attendance(day, &scope, &present).unwrap().points_awarded, 1);
        assert_eq!(state.take_attendance(day, &scope, &absent).unwrap().points_awarded, 0);
        let records = state.records_on(day);
        assert_eq!(records[0].status, AttendanceStatus::Absent);
        assert!(records[0].points_awarded);

        assert_eq!(state.take_attendance(day, &scope, &present).unwrap().points_awarded, 0);
        assert_eq!(state.roster()[0].points, 1);
    }

    #[tokio::test]
    async fn take_attendance_by_department_leaves_other_records() {
        let state = local_state().await;
        state
            .add_roster_entry(RosterEntry::new("Kim", "1").with_department("choir"))
            .unwrap();
        state.add_roster_entry(RosterEntry::new("Lee", "2")).unwrap();
        let day = date("2024-03-03");
        let lee = RosterEntry::new("Lee", "2");
        state.add_attendance_record(AttendanceRecord::for_entry(day, &lee, AttendanceStatus::Absent, false));

        state
            .take_attendance(day, &Scope::Department("choir".into()), &HashMap::new())
            .unwrap();
        assert_eq!(state.records_on(day).len(), 2);

        assert!(matches!(
            state.take_attendance(day, &Scope::Department("band".into()), &HashMap::new()),
            Err(Error::EmptyScope(_))
        ));
        assert!(matches!(
            state.take_attendance(day, &Scope::Department(String::new()), &HashMap::new()),
            Err(Error::EmptyScope(_))
        ));
    }

    #[tokio::test]
    async fn login_flow() {
        let state = local_state().await;
        assert!(!state.has_credential());
        assert_eq!(state.login(""), LoginOutcome::Rejected);
        assert_eq!(state.login("1234"), LoginOutcome::FirstTimeSetup);
        assert!(state.is_admin());
        assert!(state.has_credential());

        state.logout();
        assert!(!state.is_admin());
        assert_eq!(state.login("nope"), LoginOutcome::Rejected);
        assert!(!state.is_admin());
        assert_eq!(state.login("1234"), LoginOutcome::Authenticated);

        assert!(!state.change_credential("wrong", "5678"));
        assert!(state.change_credential("1234", "5678"));
        assert_eq!(state.login("1234"), LoginOutcome::Rejected);
        assert_eq!(state.login("5678"), LoginOutcome::Authenticated);
    }

    #[tokio::test]
    async fn legacy_credential_is_rehashed() {
        let cache = Arc::new(
            MemoryCache::new().with_value(StoreKey::AdminCredential, serde_json::json!("1234")),
        );
        let state = ReactiveState::open(SyncContext::local_only(cache)).await;
        assert_eq!(state.login("1234"), LoginOutcome::Authenticated);
        let stored = state.credential.get().unwrap();
        assert!(!credential::is_legacy(&stored));
        assert_eq!(state.login("1234"), LoginOutcome::Authenticated);
    }

    #[tokio::test]
    async fn clear_all_requires_secret() {
        let state = local_state().await;
        state.add_roster_entry(RosterEntry::new("Kim", "1")).unwrap();
        assert!(!state.clear_all("1234"));

        state.login("1234");
        assert!(!state.clear_all("wrong"));
        assert!(state.clear_all("1234"));
        assert!(state.roster().is_empty());
        assert!(state.has_credential());
    }

    #[tokio::test]
    async fn snapshot_replace_drops_duplicate_entries() {
        let state = local_state().await;
        let snapshot = Snapshot::new(
            vec![
                RosterEntry::new("Kim", "1").with_points(2),
                RosterEntry::new("Kim", "1").with_points(9),
            ],
            vec![],
        );
        state.replace_all(snapshot);
        assert_eq!(state.roster(), vec![RosterEntry::new("Kim", "1").with_points(2)]);
        assert_eq!(state.export_snapshot().roster.len(), 1);
    }

    #[tokio::test]
    async fn stats_summarize_dataset() {
        let state = local_state().await;
        let kim = RosterEntry::new("Kim", "1").with_points(3);
        let lee = RosterEntry::new("Lee", "2").with_points(1);
        state.import_roster(vec![kim.clone(), lee.clone()]);
        state.add_attendance_record(AttendanceRecord::for_entry(date("2024-03-03"), &kim, AttendanceStatus::Present, true));
        state.add_attendance_record(AttendanceRecord::for_entry(date("2024-03-03"), &lee, AttendanceStatus::Absent, false));
        state.add_attendance_record(AttendanceRecord::for_entry(date("2024-03-10"), &kim, AttendanceStatus::Present, true));

        assert_eq!(
            state.stats(),
            Stats {
                entries: 2,
                records: 3,
                distinct_dates: 2,
                present: 2,
                absent: 1,
                total_points: 4,
            }
        );
    }
}
