//! Edge case tests for rollcall-engine
//!
//! These tests cover boundary conditions and unusual persisted data.

use rollcall_engine::cache::{read_or, LocalCache, MemoryCache};
use rollcall_engine::migrate::{decode, upgrade};
use rollcall_engine::{
    AttendanceRecord, AttendanceStatus, ReactiveState, RosterEntry, Snapshot, StoreKey,
    SyncContext,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

async fn local_state() -> ReactiveState {
    ReactiveState::open(SyncContext::local_only(Arc::new(MemoryCache::new()))).await
}

// ============================================================================
// String Edge Cases
// ============================================================================

#[tokio::test]
async fn unicode_names() {
    let state = local_state().await;
    let names = vec!["김민수", "Анна", "مرحبا", "🎉", "O'Brien \"Jr\""];
    for name in &names {
        state.add_roster_entry(RosterEntry::new(*name, "1")).unwrap();
    }
    assert_eq!(state.roster().len(), names.len());
    assert_eq!(state.award_points("김민수", "1"), Some(1));
}

#[tokio::test]
async fn grade_identity_is_string_exact() {
    let state = local_state().await;
    state.add_roster_entry(RosterEntry::new("Kim", "1")).unwrap();
    state.add_roster_entry(RosterEntry::new("Kim", "01")).unwrap();
    state.add_roster_entry(RosterEntry::new("Kim", "청년부")).unwrap();
    assert_eq!(state.roster().len(), 3);
    assert_eq!(state.award_points("Kim", "01"), Some(1));
    assert_eq!(state.award_points("kim", "1"), None);
}

#[tokio::test]
async fn whitespace_only_grade_is_rejected() {
    let state = local_state().await;
    assert!(state.add_roster_entry(RosterEntry::new("Kim", " \t")).is_err());
    assert!(state.roster().is_empty());
}

// ============================================================================
// Legacy and Malformed Data
// ============================================================================

#[test]
fn numeric_grades_become_strings() {
    let roster: Vec<RosterEntry> =
        decode(StoreKey::Roster, json!([{"name": "Kim", "grade": 3}])).unwrap();
    assert_eq!(roster[0].grade, "3");
}

#[test]
fn points_are_clamped() {
    let raw = json!([
        {"name": "A", "grade": "1", "points": -4},
        {"name": "B", "grade": "1", "points": 2.7},
        {"name": "C", "grade": "1", "points": "7"},
        {"name": "D", "grade": "1", "points": 99_999_999_999u64},
        {"name": "E", "grade": "1", "points": null}
    ]);
    let roster: Vec<RosterEntry> = decode(StoreKey::Roster, raw).unwrap();
    let points: Vec<u32> = roster.iter().map(|e| e.points).collect();
    assert_eq!(points, vec![0, 2, 7, u32::MAX, 0]);
}

#[test]
fn non_object_items_fail_decoding() {
    assert!(decode::<Vec<RosterEntry>>(StoreKey::Roster, json!(["Kim"])).is_none());
    assert!(decode::<Vec<RosterEntry>>(StoreKey::Roster, json!({"0": {}})).is_none());
    assert_eq!(upgrade(StoreKey::Roster, json!(42)), json!(42));
}

#[test]
fn attendance_with_bad_date_is_rejected() {
    let raw = json!([{"date": "03/03/2024", "subjectName": "Kim", "subjectGrade": "1", "status": "present"}]);
    assert!(decode::<Vec<AttendanceRecord>>(StoreKey::AttendanceRecords, raw).is_none());
}

#[test]
fn unknown_status_is_rejected() {
    let raw = json!([{"date": "2024-03-03", "subjectName": "Kim", "subjectGrade": "1", "status": "late"}]);
    assert!(decode::<Vec<AttendanceRecord>>(StoreKey::AttendanceRecords, raw).is_none());
}

#[test]
fn read_or_falls_back_on_malformed_cache() {
    let cache = MemoryCache::new().with_value(StoreKey::Roster, json!("corrupt"));
    let roster: Vec<RosterEntry> = read_or(&cache, StoreKey::Roster, Vec::new());
    assert!(roster.is_empty());
}

#[tokio::test]
async fn malformed_cache_does_not_break_startup() {
    let cache = Arc::new(
        MemoryCache::new()
            .with_value(StoreKey::Roster, json!({"oops": true}))
            .with_value(StoreKey::AttendanceRecords, json!(null))
            .with_value(StoreKey::AdminCredential, json!(12))
            .with_value(StoreKey::AdminSessionActive, json!("yes")),
    );
    let state = ReactiveState::open(SyncContext::local_only(cache.clone())).await;
    assert!(state.roster().is_empty());
    assert!(state.attendance().is_empty());
    assert!(!state.has_credential());
    assert!(!state.is_admin());

    // The first mutation overwrites the bad value.
    state.add_roster_entry(RosterEntry::new("Kim", "1")).unwrap();
    assert!(cache.read(StoreKey::Roster).unwrap().is_array());
}

// ============================================================================
// Cache Failures
// ============================================================================

#[tokio::test]
async fn failing_cache_keeps_memory_state() {
    let cache = Arc::new(MemoryCache::new());
    cache.set_fail_writes(true);
    let state = ReactiveState::open(SyncContext::local_only(cache.clone())).await;

    state.add_roster_entry(RosterEntry::new("Kim", "1")).unwrap();
    assert_eq!(state.roster().len(), 1);
    assert!(!cache.contains(StoreKey::Roster));

    cache.set_fail_writes(false);
    state.add_roster_entry(RosterEntry::new("Lee", "2")).unwrap();
    assert_eq!(cache.read(StoreKey::Roster).unwrap().as_array().map(Vec::len), Some(2));
}

// ============================================================================
// Bulk Operations
// ============================================================================

#[tokio::test]
async fn large_roster_import() {
    let state = local_state().await;
    let entries: Vec<RosterEntry> = (0..2_000)
        .map(|i| RosterEntry::new(format!("member-{}", i % 1_500), (i % 6 + 1).to_string()))
        .collect();
    let summary = state.import_roster(entries);
    assert_eq!(summary.added + summary.skipped, 2_000);
    assert_eq!(state.roster().len(), summary.added);
}

#[tokio::test]
async fn reset_then_award() {
    let state = local_state().await;
    state.import_roster(vec![
        RosterEntry::new("Kim", "1").with_points(10),
        RosterEntry::new("Lee", "2").with_points(5),
    ]);
    state.reset_points();
    assert_eq!(state.stats().total_points, 0);
    assert_eq!(state.award_points("Lee", "2"), Some(1));
}

#[tokio::test]
async fn points_saturate() {
    let state = local_state().await;
    state.import_roster(vec![RosterEntry::new("Kim", "1").with_points(u32::MAX)]);
    assert_eq!(state.award_points("Kim", "1"), Some(u32::MAX));
}

#[tokio::test]
async fn attendance_for_deleted_entry_survives_snapshot() {
    let state = local_state().await;
    let kim = RosterEntry::new("Kim", "1");
    state.add_roster_entry(kim.clone()).unwrap();
    let day = "2024-03-03".parse().unwrap();
    state.take_attendance(day, &rollcall_engine::Scope::Grade("1".into()), &HashMap::new()).unwrap();
    state.delete_roster_entry("Kim", "1");

    let json = state.export_snapshot().to_json().unwrap();
    let other = local_state().await;
    other.replace_all(Snapshot::from_json(&json).unwrap());

    assert!(other.roster().is_empty());
    let records = other.records_for("Kim", "1");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, AttendanceStatus::Present);
    assert!(records[0].points_awarded);
}
