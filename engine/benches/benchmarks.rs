//! Performance benchmarks for rollcall-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rollcall_engine::cache::MemoryCache;
use rollcall_engine::migrate;
use rollcall_engine::{ReactiveState, RosterEntry, Scope, Snapshot, StoreKey, SyncContext};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

fn legacy_roster(size: usize) -> Value {
    Value::Array(
        (0..size)
            .map(|i| {
                json!({
                    "name": format!("member-{}", i),
                    "grade": i % 6 + 1,
                    "baptismName": "Maria",
                    "talent": i % 20
                })
            })
            .collect(),
    )
}

fn roster(size: usize) -> Vec<RosterEntry> {
    (0..size)
        .map(|i| RosterEntry::new(format!("member-{}", i), (i % 6 + 1).to_string()))
        .collect()
}

fn open_state(rt: &tokio::runtime::Runtime, size: usize) -> ReactiveState {
    rt.block_on(async {
        let state =
            ReactiveState::open(SyncContext::local_only(Arc::new(MemoryCache::new()))).await;
        state.import_roster(roster(size));
        state
    })
}

fn bench_migration(c: &mut Criterion) {
    let mut group = c.benchmark_group("migration");

    for size in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("upgrade_legacy", size), size, |b, &size| {
            let raw = legacy_roster(size);
            b.iter(|| migrate::upgrade(StoreKey::Roster, black_box(raw.clone())))
        });

        group.bench_with_input(BenchmarkId::new("upgrade_current", size), size, |b, &size| {
            let raw = migrate::upgrade(StoreKey::Roster, legacy_roster(size));
            b.iter(|| migrate::upgrade(StoreKey::Roster, black_box(raw.clone())))
        });
    }

    group.finish();
}

fn bench_state_operations(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let mut group = c.benchmark_group("state_operations");

    for size in [100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("award_points", size), size, |b, &size| {
            let state = open_state(&rt, size);
            b.iter(|| state.award_points(black_box("member-7"), black_box("2")))
        });

        group.bench_with_input(BenchmarkId::new("take_attendance", size), size, |b, &size| {
            let state = open_state(&rt, size);
            let day = "2024-03-03".parse().unwrap();
            let scope = Scope::Grade("3".into());
            let statuses = HashMap::new();
            b.iter(|| state.take_attendance(black_box(day), &scope, &statuses))
        });
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    for size in [100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("export", size), size, |b, &size| {
            let snapshot = Snapshot::new(roster(size), Vec::new());
            b.iter(|| snapshot.to_json())
        });

        group.bench_with_input(BenchmarkId::new("import", size), size, |b, &size| {
            let json = Snapshot::new(roster(size), Vec::new()).to_json().unwrap();
            b.iter(|| Snapshot::from_json(black_box(&json)))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_migration,
    bench_state_operations,
    bench_snapshot
);
criterion_main!(benches);
