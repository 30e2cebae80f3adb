// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::record::read_record;
use ark_core::Fields;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

fn t(month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, month, day, 8, 0, 0).unwrap()
}

fn fields(value: serde_json::Value) -> Fields {
    serde_json::from_value(value).unwrap()
}

#[test]
fn created_event_starts_record_at_addressed_path() {
    let dir = tempfile::tempdir().unwrap();
    let writer = ArchiveWriter::new(dir.path());

    let path = writer
        .append(
            Category::Accounts,
            "acc-1",
            &ArchiveEvent::created(t(3, 14), fields(json!({"username": "ana"}))),
        )
        .unwrap();

    assert_eq!(path, PathBuf::from("accounts/2026/03/acc-1.txt"));
    let text = std::fs::read_to_string(dir.path().join(&path)).unwrap();
    assert!(text.starts_with("=== accounts acc-1\n--- 2026-03-14T08:00:00Z created\n"));
}

#[test]
fn later_events_append_to_creation_month() {
    let dir = tempfile::tempdir().unwrap();
    let writer = ArchiveWriter::new(dir.path());
    writer
        .append(
            Category::Requests,
            "req-1",
            &ArchiveEvent::created(t(1, 31), fields(json!({"title": "x"}))),
        )
        .unwrap();

    // A fresh writer has no cached location and must scan for it
    let writer = ArchiveWriter::new(dir.path());
    let path = writer
        .append(
            Category::Requests,
            "req-1",
            &ArchiveEvent::status_changed(t(2, 2), "closed", None),
        )
        .unwrap();
    assert_eq!(path, PathBuf::from("requests/2026/01/req-1.txt"));

    let record = read_record(dir.path(), &path).unwrap();
    assert_eq!(record.events.len(), 2);
}

#[test]
fn second_creation_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let writer = ArchiveWriter::new(dir.path());
    let created = ArchiveEvent::created(t(5, 1), fields(json!({"name": "admin"})));
    writer.append(Category::Roles, "admin", &created).unwrap();

    let again = ArchiveEvent::created(t(6, 1), fields(json!({"name": "admin"})));
    assert!(matches!(
        writer.append(Category::Roles, "admin", &again),
        Err(ArchiveWriteError::AlreadyExists(_))
    ));
}

#[test]
fn update_without_record_fails() {
    let dir = tempfile::tempdir().unwrap();
    let writer = ArchiveWriter::new(dir.path());
    let err = writer
        .append(
            Category::Responses,
            "resp-9",
            &ArchiveEvent::updated(t(5, 1), Fields::new()),
        )
        .unwrap_err();
    assert!(matches!(err, ArchiveWriteError::MissingRecord { .. }));
}

#[test]
fn bucket_entries_share_a_monthly_file() {
    let dir = tempfile::tempdir().unwrap();
    let writer = ArchiveWriter::new(dir.path());
    for (i, day) in [1, 9, 28].into_iter().enumerate() {
        let id = format!("act-{i}");
        let event = ArchiveEvent::logged(t(7, day), &id, fields(json!({"action": "login"})));
        let path = writer.append(Category::Activity, &id, &event).unwrap();
        assert_eq!(path, PathBuf::from("activity/2026/07/activity_2026_07.txt"));
    }

    let text =
        std::fs::read_to_string(dir.path().join("activity/2026/07/activity_2026_07.txt")).unwrap();
    assert_eq!(text.matches("=== activity bucket").count(), 1);
    let record = read_record(dir.path(), Path::new("activity/2026/07/activity_2026_07.txt")).unwrap();
    assert_eq!(record.events.len(), 3);
}

#[test]
fn layout_mismatches_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let writer = ArchiveWriter::new(dir.path());

    let created = ArchiveEvent::created(t(1, 1), Fields::new());
    assert!(matches!(
        writer.append(Category::Activity, "act-1", &created),
        Err(ArchiveWriteError::WrongLayout { .. })
    ));

    let logged = ArchiveEvent::logged(t(1, 1), "x", Fields::new());
    assert!(matches!(
        writer.append(Category::Accounts, "x", &logged),
        Err(ArchiveWriteError::WrongLayout { .. })
    ));
    assert!(matches!(
        writer.append(Category::Activity, "y", &logged),
        Err(ArchiveWriteError::EntryMismatch { .. })
    ));
}

#[test]
fn unsafe_ids_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let writer = ArchiveWriter::new(dir.path());
    let created = ArchiveEvent::created(t(1, 1), Fields::new());
    assert!(matches!(
        writer.append(Category::Accounts, "../etc", &created),
        Err(ArchiveWriteError::Address(_))
    ));
}

#[test]
fn snapshot_writes_replace_whole_file() {
    let dir = tempfile::tempdir().unwrap();
    let writer = ArchiveWriter::new(dir.path());

    writer
        .write_snapshot(EphemeralClass::Tokens, "first\nversion\n")
        .unwrap();
    let path = writer.write_snapshot(EphemeralClass::Tokens, "second\n").unwrap();

    assert_eq!(path, PathBuf::from("system/current_state/tokens.txt"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join(path)).unwrap(),
        "second\n"
    );
}

#[test]
fn concurrent_appends_to_one_record_stay_whole() {
    let dir = tempfile::tempdir().unwrap();
    let writer = Arc::new(ArchiveWriter::new(dir.path()));
    writer
        .append(
            Category::Requests,
            "req-1",
            &ArchiveEvent::created(t(4, 1), Fields::new()),
        )
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let writer = Arc::clone(&writer);
            std::thread::spawn(move || {
                let event = ArchiveEvent::updated(t(4, 2), fields(json!({"n": i})));
                writer.append(Category::Requests, "req-1", &event).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let record = read_record(dir.path(), Path::new("requests/2026/04/req-1.txt")).unwrap();
    assert_eq!(record.events.len(), 9);
}

#[test]
fn file_locks_are_dropped_once_writes_finish() {
    let dir = tempfile::tempdir().unwrap();
    let writer = Arc::new(ArchiveWriter::new(dir.path()));
    std::thread::scope(|scope| {
        for i in 0..8 {
            let writer = Arc::clone(&writer);
            scope.spawn(move || {
                let id = format!("acc-{i}");
                writer
                    .append(Category::Accounts, &id, &ArchiveEvent::created(t(5, 1), Fields::new()))
                    .unwrap();
                writer
                    .append(Category::Accounts, &id, &ArchiveEvent::updated(t(5, 2), fields(json!({"n": i}))))
                    .unwrap();
            });
        }
    });
    writer.write_snapshot(EphemeralClass::Sessions, "snapshot\n").unwrap();

    assert!(lock(&writer.file_locks).is_empty());
    assert_eq!(
        writer.locate(Category::Accounts, "acc-3").unwrap(),
        Some(PathBuf::from("accounts/2026/05/acc-3.txt"))
    );
}

#[test]
fn location_cache_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let writer = ArchiveWriter::with_cache_size(dir.path(), NonZeroUsize::new(4).unwrap());
    for i in 0..10 {
        writer
            .append(Category::Roles, &format!("r-{i}"), &ArchiveEvent::created(t(6, 1), Fields::new()))
            .unwrap();
    }
    assert_eq!(lock(&writer.locations).len(), 4);

    // Evicted entries are found again by scanning
    let path = writer
        .append(Category::Roles, "r-0", &ArchiveEvent::updated(t(6, 2), fields(json!({"name": "x"}))))
        .unwrap();
    assert_eq!(path, PathBuf::from("roles/2026/06/r-0.txt"));
}
