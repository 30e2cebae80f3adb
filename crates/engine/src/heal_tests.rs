// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::validate::CategoryConsistency;
use ark_core::{ArchiveEvent, EngineConfig, EntityState, FakeClock, Fields};
use chrono::TimeZone;
use serde_json::json;
use std::time::Duration;

fn t(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, hour, 0, 0).unwrap()
}

fn fields(value: serde_json::Value) -> Fields {
    serde_json::from_value(value).unwrap()
}

fn config(dir: &Path) -> EngineConfig {
    let mut config = EngineConfig::rooted_at(dir);
    config.lock.acquire_timeout = Duration::ZERO;
    config
}

fn engine(dir: &Path) -> Engine<FakeClock> {
    Engine::with_clock(config(dir), FakeClock::at(t(12))).unwrap()
}

fn seed(engine: &Engine<FakeClock>) {
    let durable = engine.durable_writer();
    for id in ["acc-1", "acc-2"] {
        durable
            .record(
                Category::Accounts,
                id,
                &ArchiveEvent::created(t(9), fields(json!({"username": id}))),
            )
            .unwrap();
    }
    durable
        .record(
            Category::Requests,
            "req-1",
            &ArchiveEvent::created(t(10), fields(json!({"author_id": "acc-1", "title": "Rain"}))),
        )
        .unwrap();
}

fn baseline(accounts: Option<u64>) -> BTreeMap<String, Option<u64>> {
    Category::ALL
        .into_iter()
        .map(|c| (c.table().to_string(), None))
        .chain([("accounts".to_string(), accounts)])
        .collect()
}

fn rebuilt(accounts: u64) -> BTreeMap<String, u64> {
    BTreeMap::from([("accounts".to_string(), accounts)])
}

#[test]
fn verification_tolerates_configured_drift() {
    let consistent = ConsistencyReport::default();
    assert!(verify(&baseline(Some(5)), &rebuilt(5), &consistent, 0).passed());
    assert!(!verify(&baseline(Some(5)), &rebuilt(4), &consistent, 0).passed());
    assert!(verify(&baseline(Some(5)), &rebuilt(4), &consistent, 1).passed());
    // Uncountable backups are not compared
    assert!(verify(&baseline(None), &rebuilt(0), &consistent, 0).passed());
}

#[test]
fn verification_fails_on_orphan_rows() {
    let report = ConsistencyReport {
        categories: vec![CategoryConsistency {
            category: Category::Roles,
            rows: 1,
            archives: 0,
            orphan_rows: vec!["r-1".into()],
            orphan_archives: Vec::new(),
            unreadable: Vec::new(),
            dangling_references: Vec::new(),
        }],
        classes: Vec::new(),
    };
    let verification = verify(&baseline(None), &rebuilt(0), &report, 0);
    assert_eq!(verification.orphan_rows, 1);
    assert!(!verification.passed());
}

#[test]
fn operator_heal_promotes_an_equivalent_store() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    seed(&engine);

    let report = engine.heal(HealTrigger::Operator).unwrap();

    assert!(report.promoted());
    let phases: Vec<_> = report.phases.iter().map(|p| p.phase).collect();
    assert_eq!(
        phases,
        vec![
            HealPhase::Detecting,
            HealPhase::BackingUp,
            HealPhase::Rebuilding,
            HealPhase::Verifying,
            HealPhase::Promoting,
        ]
    );
    assert_eq!(report.baseline["accounts"], Some(2));
    assert!(report.backup.as_ref().unwrap().store.is_file());
    assert_eq!(
        engine.store().with(|s| s.count("accounts")).unwrap(),
        2
    );
    assert!(engine.validate().unwrap().is_consistent());
    assert!(engine.locks().current().unwrap().is_none());
}

#[test]
fn corrupt_store_is_healed_from_archives() {
    let dir = tempfile::tempdir().unwrap();
    {
        let engine = engine(dir.path());
        seed(&engine);
    }
    let store_path = dir.path().join("data/live.db");
    for suffix in ["-wal", "-shm"] {
        let _ = std::fs::remove_file(sidecar_path(&store_path, suffix));
    }
    std::fs::write(&store_path, vec![0x5a; 8192]).unwrap();

    let engine = engine(dir.path());
    assert!(!engine.store().is_available());
    let report = engine.heal_if_corrupt().unwrap().unwrap();

    assert!(matches!(report.trigger, HealTrigger::IntegrityCheck { .. }));
    assert!(report.baseline.values().all(Option::is_none));
    assert!(engine.store().is_available());
    let request = engine
        .store()
        .with(|s| s.get_entity(Category::Requests, "req-1"))
        .unwrap()
        .unwrap();
    assert_eq!(request.state.fields["title"], json!("Rain"));
    assert_eq!(
        std::fs::read(&report.backup.unwrap().store).unwrap(),
        vec![0x5a; 8192]
    );
}

#[test]
fn unopenable_store_is_counted_from_its_backup() {
    let dir = tempfile::tempdir().unwrap();
    let lost = {
        let engine = engine(dir.path());
        seed(&engine);
        engine
            .durable_writer()
            .record(
                Category::Accounts,
                "acc-3",
                &ArchiveEvent::created(t(11), fields(json!({"username": "acc-3"}))),
            )
            .unwrap()
            .archive_path
    };
    let store_path = dir.path().join("data/live.db");
    let conn = rusqlite::Connection::open(&store_path).unwrap();
    conn.execute_batch("DROP TABLE sessions;").unwrap();
    drop(conn);
    std::fs::remove_file(dir.path().join("archives").join(lost)).unwrap();

    let engine = engine(dir.path());
    assert!(!engine.store().is_available());
    let report = match engine.heal(HealTrigger::Operator) {
        Err(HealError::Aborted { report, .. }) => report,
        other => panic!("expected abort, got {other:?}"),
    };

    assert_eq!(report.baseline["accounts"], Some(3));
    assert_eq!(report.baseline["requests"], Some(1));
    let verification = report.attempts[0].verification.as_ref().unwrap();
    assert_eq!(
        verification.problems,
        vec!["accounts: damaged store had 3 rows, rebuild has 2".to_string()]
    );
    assert!(!engine.store().is_available());
}

#[test]
fn healthy_store_is_left_alone() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    seed(&engine);
    assert!(engine.heal_if_corrupt().unwrap().is_none());
    assert!(!dir.path().join("data/backups").exists());
}

#[test]
fn failed_verification_aborts_and_keeps_the_live_store() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    seed(&engine);
    // A row with no archive behind it cannot be rebuilt
    engine
        .store()
        .with(|s| {
            s.insert_entity(
                Category::Roles,
                &EntityState::created("r-1", t(9), fields(json!({"name": "ghost"}))),
                Path::new("roles/2026/10/r-1.txt"),
            )
        })
        .unwrap();

    let (attempts, backup, report) = match engine.heal(HealTrigger::Operator) {
        Err(HealError::Aborted {
            attempts,
            backup,
            report,
        }) => (attempts, backup, report),
        other => panic!("expected abort, got {other:?}"),
    };

    assert_eq!(attempts, 2);
    assert_eq!(report.attempts.len(), 2);
    assert!(report.attempts.iter().all(|a| a.error.is_some()));
    assert_eq!(report.final_phase(), Some(HealPhase::Aborted));
    assert!(backup.unwrap().is_file());
    assert!(!sidecar_path(&dir.path().join("data/live.db"), STAGING_SUFFIX).exists());
    assert_eq!(engine.store().with(|s| s.count("roles")).unwrap(), 1);
    assert!(engine.locks().current().unwrap().is_none());
}

#[test]
fn busy_lock_stops_heal_before_backup() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    seed(&engine);
    let _held = engine.locks().acquire("someone-else").unwrap();

    assert!(matches!(
        engine.heal(HealTrigger::Operator),
        Err(HealError::Lock(LockError::Busy { .. }))
    ));
    assert!(!dir.path().join("data/backups").exists());
}
