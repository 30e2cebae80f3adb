// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn empty_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ark.toml");
    std::fs::write(&path, "").unwrap();

    let config = EngineConfig::load(&path).unwrap();
    assert_eq!(config, EngineConfig::rooted_at(dir.path()));
    assert_eq!(config.archive_root, dir.path().join("archives"));
    assert_eq!(config.heal.max_attempts, 2);
    assert_eq!(config.lock.stale_threshold, Duration::from_secs(900));
}

#[test]
fn durations_use_humantime() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ark.toml");
    std::fs::write(
        &path,
        r#"
archive_root = "/srv/archives"
store_path = "db/live.db"

[lock]
stale_threshold = "2m"
acquire_timeout = "750ms"

[heal]
max_attempts = 3
count_tolerance = 5
"#,
    )
    .unwrap();

    let config = EngineConfig::load(&path).unwrap();
    assert_eq!(config.archive_root, PathBuf::from("/srv/archives"));
    assert_eq!(config.store_path, dir.path().join("db/live.db"));
    assert_eq!(config.lock.stale_threshold, Duration::from_secs(120));
    assert_eq!(config.lock.acquire_timeout, Duration::from_millis(750));
    assert_eq!(config.lock.poll_interval, Duration::from_millis(100));
    assert_eq!(config.heal.count_tolerance, 5);
    assert_eq!(
        config.lock_path(),
        PathBuf::from("/srv/archives/system/rebuild.lock")
    );
}

#[test]
fn zero_attempts_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ark.toml");
    std::fs::write(&path, "[heal]\nmax_attempts = 0\n").unwrap();
    assert!(matches!(
        EngineConfig::load(&path),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn store_inside_archive_root_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ark.toml");
    std::fs::write(&path, "store_path = \"archives/live.db\"\n").unwrap();
    assert!(matches!(
        EngineConfig::load(&path),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn missing_file_reports_path() {
    let err = EngineConfig::load(Path::new("/nonexistent/ark.toml")).unwrap_err();
    assert!(err.to_string().contains("/nonexistent/ark.toml"));
}
