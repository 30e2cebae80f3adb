// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI integration tests for the operator commands
//!
//! Each test runs the `ark` binary against a temporary engine directory with
//! a hand-written archive, the way an operator would after an incident.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(deprecated)]

mod common;

use common::Workspace;
use predicates::prelude::*;
use std::fs;

fn json_stdout(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

// =============================================================================
// Basics
// =============================================================================

#[test]
fn help_lists_the_operations() {
    let ws = Workspace::new();
    ws.ark()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("heal"))
        .stdout(predicate::str::contains("rebuild-snapshots"))
        .stdout(predicate::str::contains("rebuild"));
}

#[test]
fn invalid_config_is_reported() {
    let ws = Workspace::new();
    fs::write(ws.path().join("ark.toml"), "[heal]\nmax_attempts = 0\n").unwrap();
    ws.ark()
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_attempts"));
}

#[test]
fn explicit_config_paths_resolve_against_its_directory() {
    let ws = Workspace::new();
    let nested = ws.path().join("etc");
    fs::create_dir_all(&nested).unwrap();
    fs::write(nested.join("engine.toml"), common::CONFIG).unwrap();

    ws.ark()
        .args(["--config", "etc/engine.toml", "validate"])
        .assert()
        .success();
    assert!(nested.join("data/live.db").is_file());
    assert!(!ws.store_path().exists());
}

// =============================================================================
// Validate
// =============================================================================

#[test]
fn empty_engine_is_consistent() {
    let ws = Workspace::new();
    ws.ark()
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("consistent"));
}

#[test]
fn archive_without_rows_is_inconsistent() {
    let ws = Workspace::new();
    ws.seed_archive();
    ws.ark()
        .arg("validate")
        .assert()
        .code(2)
        .stdout(predicate::str::contains("orphan archive"))
        .stdout(predicate::str::contains("inconsistent: 0 orphan rows, 4 orphan archives"));

    ws.ark().args(["validate", "--report-only"]).assert().success();
}

#[test]
fn validate_json_carries_the_verdict() {
    let ws = Workspace::new();
    ws.seed_archive();
    let output = ws
        .ark()
        .args(["--format", "json", "validate"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));

    let report = json_stdout(&output);
    assert_eq!(report["consistent"], false);
    assert_eq!(report["categories"][0]["category"], "accounts");
    assert_eq!(
        report["categories"][0]["orphan_archives"]
            .as_array()
            .unwrap()
            .len(),
        2
    );
}

// =============================================================================
// Heal
// =============================================================================

#[test]
fn heal_aborts_when_counts_disagree() {
    let ws = Workspace::new();
    ws.seed_archive();
    ws.ark()
        .arg("heal")
        .assert()
        .failure()
        .stdout(predicate::str::contains("aborted"))
        .stdout(predicate::str::contains("accounts: damaged store had 0 rows, rebuild has 2"))
        .stderr(predicate::str::contains("heal aborted after 2 attempts"))
        .stderr(predicate::str::contains("backup kept at"));

    ws.ark().arg("validate").assert().code(2);
    assert!(!ws.path().join("data/live.db.staging").exists());
}

#[test]
fn heal_fills_the_store_from_the_archive() {
    let ws = Workspace::with_config(common::LENIENT_HEAL);
    ws.seed_archive();
    ws.ark()
        .arg("heal")
        .assert()
        .success()
        .stdout(predicate::str::contains("heal after operator request: promoted"))
        .stdout(predicate::str::contains("imported 4, skipped 0, failed 0"))
        .stdout(predicate::str::contains("verification passed"));

    ws.ark()
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("consistent"));
}

#[test]
fn heal_json_reports_phases_and_backup() {
    let ws = Workspace::with_config(common::LENIENT_HEAL);
    ws.seed_archive();
    let output = ws.ark().args(["--format", "json", "heal"]).output().unwrap();
    assert!(output.status.success());

    let report = json_stdout(&output);
    assert_eq!(report["healed"], true);
    let phases: Vec<&str> = report["report"]["phases"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["phase"].as_str().unwrap())
        .collect();
    assert_eq!(
        phases,
        ["detecting", "backing_up", "rebuilding", "verifying", "promoting"]
    );
    let backup = report["report"]["backup"]["store"].as_str().unwrap();
    assert!(backup.ends_with(".bak"));
    assert!(std::path::Path::new(backup).is_file());
}

#[test]
fn heal_if_corrupt_leaves_a_healthy_store_alone() {
    let ws = Workspace::new();
    ws.ark()
        .args(["heal", "--if-corrupt"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to heal"));
    assert!(!ws.path().join("data/backups").exists());
}

#[test]
fn corrupt_store_is_reported_then_healed() {
    let ws = Workspace::new();
    ws.seed_archive();
    fs::create_dir_all(ws.path().join("data")).unwrap();
    fs::write(ws.store_path(), vec![0x5a; 8192]).unwrap();

    ws.ark()
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("is unavailable"))
        .stderr(predicate::str::contains("ark heal --if-corrupt"));

    ws.ark()
        .args(["heal", "--if-corrupt"])
        .assert()
        .success()
        .stdout(predicate::str::contains("integrity check"))
        .stdout(predicate::str::contains("promoted"));

    ws.ark().arg("validate").assert().success();
}

#[test]
fn heal_refuses_while_the_lock_is_held() {
    let ws = Workspace::new();
    ws.seed_archive();
    let record = serde_json::json!({
        "holder": "heal:4242",
        "token": "held-by-another-process",
        "acquired_at": chrono::Utc::now(),
        "timeout": "15m",
    });
    ws.write_archive("system/rebuild.lock", &record.to_string());

    ws.ark()
        .arg("heal")
        .assert()
        .failure()
        .stderr(predicate::str::contains("rebuild lock is held"))
        .stderr(predicate::str::contains("heal:4242"));
    assert!(!ws.path().join("data/backups").exists());

    ws.ark()
        .args(["validate", "--report-only"])
        .assert()
        .success()
        .stdout(predicate::str::contains("rebuild lock held by heal:4242"));
}

#[test]
fn heal_after_a_lost_parent_reports_dangling_references() {
    let ws = Workspace::with_config(common::LENIENT_HEAL);
    ws.seed_archive();
    fs::remove_file(ws.path().join("archives/accounts/2026/10/acc-1.txt")).unwrap();

    ws.ark()
        .arg("heal")
        .assert()
        .success()
        .stdout(predicate::str::contains("imported 3, skipped 0, failed 0"));

    ws.ark()
        .arg("validate")
        .assert()
        .code(2)
        .stdout(predicate::str::contains("dangling req-1 author_id -> accounts acc-1"))
        .stdout(predicate::str::contains("dangling act-1 account_id -> accounts acc-1"))
        .stdout(predicate::str::contains("2 dangling references"));
}

// =============================================================================
// Rebuild
// =============================================================================

#[test]
fn rebuild_writes_a_new_store_once() {
    let ws = Workspace::new();
    ws.seed_archive();
    ws.ark()
        .args(["rebuild", "copy.db"])
        .assert()
        .success()
        .stdout(predicate::str::contains("imported 4, skipped 0, failed 0"));
    assert!(ws.path().join("copy.db").is_file());

    ws.ark()
        .args(["rebuild", "copy.db"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not empty"));
}

#[test]
fn rebuild_lists_torn_records() {
    let ws = Workspace::new();
    ws.seed_archive();
    ws.write_archive(
        "accounts/2026/10/acc-3.txt",
        "=== accounts acc-3\n--- 2026-10-04T09:00:00Z created\n{\"username\":",
    );
    ws.ark()
        .args(["rebuild", "copy.db"])
        .assert()
        .success()
        .stdout(predicate::str::contains("accounts/2026/10/acc-3.txt"))
        .stdout(predicate::str::contains("imported 4, skipped 0, failed 1"));
}

#[test]
fn rebuild_snapshots_covers_every_class() {
    let ws = Workspace::new();
    ws.ark()
        .arg("rebuild-snapshots")
        .assert()
        .success()
        .stdout(predicate::str::contains("sessions"))
        .stdout(predicate::str::contains("role_grants"))
        .stdout(predicate::str::contains("tokens"))
        .stdout(predicate::str::contains("pending_approvals"));
    assert!(ws
        .path()
        .join("archives/system/current_state/sessions.txt")
        .is_file());
}
