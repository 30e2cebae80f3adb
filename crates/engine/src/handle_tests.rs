// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use ark_core::{EphemeralClass, EphemeralRecord};
use chrono::{TimeZone, Utc};

fn record(id: &str) -> EphemeralRecord {
    EphemeralRecord::new(id, Utc.with_ymd_and_hms(2026, 10, 18, 8, 0, 0).unwrap())
}

#[test]
fn opens_a_fresh_store() {
    let dir = tempfile::tempdir().unwrap();
    let handle = StoreHandle::open(&dir.path().join("live.db"));
    assert!(handle.is_available());
    assert_eq!(handle.integrity(), Integrity::Healthy);
}

#[test]
fn corrupt_store_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("live.db");
    fs::write(&path, b"this is not a database, just some bytes padded out").unwrap();

    let handle = StoreHandle::open(&path);
    assert!(!handle.is_available());
    assert!(matches!(
        handle.with(|store| store.count("accounts")),
        Err(StoreError::Unavailable(_))
    ));
    assert!(handle.integrity().needs_heal());
}

#[test]
fn promote_swaps_in_the_staged_store() {
    let dir = tempfile::tempdir().unwrap();
    let live_path = dir.path().join("live.db");
    let handle = StoreHandle::open(&live_path);
    handle
        .with(|store| store.upsert_ephemeral(EphemeralClass::Tokens, &record("old")))
        .unwrap();

    let staging_path = dir.path().join("live.db.staging");
    let staged = RelationalStore::open(&staging_path).unwrap();
    staged
        .upsert_ephemeral(EphemeralClass::Tokens, &record("new"))
        .unwrap();
    staged.close().unwrap();

    handle.promote(&staging_path).unwrap();

    assert!(!staging_path.exists());
    let ids: Vec<String> = handle
        .with(|store| store.list_ephemeral(EphemeralClass::Tokens))
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec!["new"]);
}

#[test]
fn promote_recovers_an_unavailable_handle() {
    let dir = tempfile::tempdir().unwrap();
    let live_path = dir.path().join("live.db");
    fs::write(&live_path, b"garbage garbage garbage garbage garbage").unwrap();
    let handle = StoreHandle::open(&live_path);
    assert!(!handle.is_available());

    let staging_path = dir.path().join("staging.db");
    RelationalStore::open(&staging_path).unwrap().close().unwrap();
    handle.promote(&staging_path).unwrap();

    assert!(handle.is_available());
    assert_eq!(handle.integrity(), Integrity::Healthy);
}

#[test]
fn failed_promotion_keeps_the_old_store() {
    let dir = tempfile::tempdir().unwrap();
    let handle = StoreHandle::open(&dir.path().join("live.db"));
    handle
        .with(|store| store.upsert_ephemeral(EphemeralClass::Tokens, &record("old")))
        .unwrap();

    let err = handle.promote(&dir.path().join("missing.db")).unwrap_err();
    assert!(matches!(err, StoreError::Io { .. }));
    assert_eq!(
        handle.with(|store| store.count("tokens")).unwrap(),
        1
    );
}

#[test]
fn sidecar_paths_append_suffix() {
    assert_eq!(
        sidecar_path(Path::new("data/live.db"), "-wal"),
        PathBuf::from("data/live.db-wal")
    );
}
