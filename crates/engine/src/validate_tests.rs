// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use ark_core::{ArchiveEvent, EntityState, EphemeralEvent, FakeClock, Fields, Transition};
use ark_storage::{ArchiveWriter, SnapshotStore};
use chrono::TimeZone;
use serde_json::json;
use std::sync::Arc;

fn t(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, hour, 0, 0).unwrap()
}

fn fields(value: serde_json::Value) -> Fields {
    serde_json::from_value(value).unwrap()
}

struct Fixture {
    dir: tempfile::TempDir,
    writer: ArchiveWriter,
    store: RelationalStore,
    validator: Validator,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("archives");
        Self {
            writer: ArchiveWriter::new(&root),
            store: RelationalStore::open(&dir.path().join("live.db")).unwrap(),
            validator: Validator::new(&root),
            dir,
        }
    }

    fn root(&self) -> PathBuf {
        self.dir.path().join("archives")
    }

    /// Archive an account and insert its row
    fn account(&self, id: &str) -> PathBuf {
        let value = fields(json!({"username": id}));
        let path = self
            .writer
            .append(Category::Accounts, id, &ArchiveEvent::created(t(9), value.clone()))
            .unwrap();
        self.store
            .insert_entity(Category::Accounts, &EntityState::created(id, t(9), value), &path)
            .unwrap();
        path
    }

    fn accounts(&self, report: &ConsistencyReport) -> CategoryConsistency {
        report.categories[0].clone()
    }
}

#[test]
fn matching_rows_and_archives_are_consistent() {
    let fx = Fixture::new();
    fx.account("acc-1");
    fx.account("acc-2");

    let report = fx.validator.validate(&fx.store).unwrap();
    assert!(report.is_consistent());
    let accounts = fx.accounts(&report);
    assert_eq!((accounts.rows, accounts.archives), (2, 2));
    assert!(report
        .classes
        .iter()
        .all(|c| c.status == SnapshotStatus::Empty));
}

#[test]
fn deleted_archive_leaves_one_orphan_row() {
    let fx = Fixture::new();
    fx.account("acc-1");
    let doomed = fx.account("acc-2");
    std::fs::remove_file(fx.root().join(doomed)).unwrap();

    let report = fx.validator.validate(&fx.store).unwrap();
    assert_eq!(report.orphan_row_count(), 1);
    assert_eq!(fx.accounts(&report).orphan_rows, vec!["acc-2"]);
    assert!(!report.is_consistent());
}

#[test]
fn archive_without_row_is_an_orphan_archive() {
    let fx = Fixture::new();
    fx.account("acc-1");
    let path = fx
        .writer
        .append(
            Category::Accounts,
            "acc-9",
            &ArchiveEvent::created(t(10), fields(json!({"username": "x"}))),
        )
        .unwrap();

    let report = fx.validator.validate(&fx.store).unwrap();
    assert_eq!(
        fx.accounts(&report).orphan_archives,
        vec![OrphanArchive {
            path,
            id: "acc-9".into()
        }]
    );
    assert_eq!(report.orphan_row_count(), 0);
}

#[test]
fn row_pointing_at_wrong_file_is_orphaned() {
    let fx = Fixture::new();
    let path = fx.account("acc-1");
    fx.store
        .insert_entity(
            Category::Accounts,
            &EntityState::created("acc-2", t(9), fields(json!({"username": "b"}))),
            &path,
        )
        .unwrap();

    let report = fx.validator.validate(&fx.store).unwrap();
    assert_eq!(fx.accounts(&report).orphan_rows, vec!["acc-2"]);
}

#[test]
fn unreadable_archive_is_reported() {
    let fx = Fixture::new();
    let path = fx.account("acc-1");
    std::fs::write(fx.root().join(&path), "not an archive\n").unwrap();

    let report = fx.validator.validate(&fx.store).unwrap();
    let accounts = fx.accounts(&report);
    assert_eq!(accounts.unreadable, vec![path]);
    assert_eq!(accounts.orphan_rows, vec!["acc-1"]);
}

#[test]
fn lost_parent_leaves_a_dangling_reference() {
    let fx = Fixture::new();
    fx.account("acc-1");
    let value = fields(json!({"author_id": "acc-2", "title": "Rain gauge"}));
    let path = fx
        .writer
        .append(Category::Requests, "req-1", &ArchiveEvent::created(t(10), value.clone()))
        .unwrap();
    fx.store.set_foreign_keys(false).unwrap();
    fx.store
        .insert_entity(Category::Requests, &EntityState::created("req-1", t(10), value), &path)
        .unwrap();

    let report = fx.validator.validate(&fx.store).unwrap();
    assert_eq!(report.orphan_row_count(), 0);
    assert_eq!(report.dangling_reference_count(), 1);
    let requests = report
        .categories
        .iter()
        .find(|c| c.category == Category::Requests)
        .unwrap();
    assert_eq!(requests.dangling_references[0].id, "req-1");
    assert_eq!(requests.dangling_references[0].value, "acc-2");
    assert!(!report.is_consistent());
}

#[test]
fn bucket_entries_are_matched_by_id() {
    let fx = Fixture::new();
    let event = ArchiveEvent::logged(t(9), "act-1", fields(json!({"action": "login"})));
    let path = fx.writer.append(Category::Activity, "act-1", &event).unwrap();
    fx.store
        .insert_entity(Category::Activity, &EntityState::from_entry(&event).unwrap(), &path)
        .unwrap();
    fx.writer
        .append(
            Category::Activity,
            "act-2",
            &ArchiveEvent::logged(t(10), "act-2", fields(json!({"action": "logout"}))),
        )
        .unwrap();

    let report = fx.validator.validate(&fx.store).unwrap();
    let activity = report
        .categories
        .iter()
        .find(|c| c.category == Category::Activity)
        .unwrap();
    assert_eq!(activity.archives, 1);
    assert_eq!(activity.orphan_archives.len(), 1);
    assert_eq!(activity.orphan_archives[0].id, "act-2");
}

#[test]
fn snapshot_statuses_follow_the_log() {
    let fx = Fixture::new();
    let clock = FakeClock::at(t(12));
    let snapshots = SnapshotStore::new(
        Arc::new(ArchiveWriter::new(fx.root())),
        Arc::new(EventLog::new(fx.root())),
        clock,
    );
    let event = |class, id: &str, hour| EphemeralEvent {
        class,
        entity_id: id.to_string(),
        transition: Transition::Created,
        at: t(hour),
        payload: json!({}),
    };

    snapshots
        .record_event(&fx.store, &event(EphemeralClass::Sessions, "s-1", 9))
        .unwrap();
    snapshots
        .record_event(&fx.store, &event(EphemeralClass::Tokens, "tok-1", 9))
        .unwrap();
    snapshots
        .event_log()
        .append(&event(EphemeralClass::Tokens, "tok-2", 10))
        .unwrap();
    snapshots
        .event_log()
        .append(&event(EphemeralClass::RoleGrants, "g-1", 10))
        .unwrap();

    let report = fx.validator.validate(&fx.store).unwrap();
    let statuses: Vec<_> = report.classes.iter().map(|c| (c.class, c.status)).collect();
    assert_eq!(
        statuses,
        vec![
            (EphemeralClass::Sessions, SnapshotStatus::Fresh),
            (EphemeralClass::RoleGrants, SnapshotStatus::Missing),
            (EphemeralClass::Tokens, SnapshotStatus::Stale),
            (EphemeralClass::PendingApprovals, SnapshotStatus::Empty),
        ]
    );
    assert_eq!(report.stale_snapshots(), vec![EphemeralClass::Tokens]);
    assert_eq!(report.classes[2].checkpoint, Some(t(9)));
    assert_eq!(report.classes[2].newest_log_entry, Some(t(10)));
}

#[test]
fn validation_does_not_write() {
    let fx = Fixture::new();
    fx.account("acc-1");
    let before = fx.store.counts().unwrap();
    fx.validator.validate(&fx.store).unwrap();
    assert_eq!(fx.store.counts().unwrap(), before);
    assert!(!fx.root().join("system").exists());
}
