// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for CLI integration tests.

#![allow(dead_code)]

use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Engine config with a lock that never waits, so busy paths fail fast
pub const CONFIG: &str = r#"archive_root = "archives"
store_path = "data/live.db"
backup_dir = "data/backups"

[lock]
acquire_timeout = "0s"
"#;

/// Lets a heal promote over an empty live store
pub const LENIENT_HEAL: &str = "\n[heal]\ncount_tolerance = 10\n";

/// A temporary engine directory with an `ark.toml`
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self::with_config("")
    }

    /// Workspace whose `ark.toml` has `extra` appended to the base config
    pub fn with_config(extra: &str) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        fs::write(dir.path().join("ark.toml"), format!("{CONFIG}{extra}"))
            .expect("Failed to write config");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn store_path(&self) -> PathBuf {
        self.path().join("data/live.db")
    }

    /// `ark` running inside the workspace
    pub fn ark(&self) -> Command {
        let mut cmd = Command::cargo_bin("ark").expect("ark binary should build");
        cmd.current_dir(self.path()).env("RUST_LOG", "warn");
        cmd
    }

    /// Write a file relative to the archive root
    pub fn write_archive(&self, relative: &str, text: &str) {
        let path = self.path().join("archives").join(relative);
        fs::create_dir_all(path.parent().expect("archive path has a parent"))
            .expect("Failed to create archive directory");
        fs::write(path, text).expect("Failed to write archive file");
    }

    /// Two accounts, a request and a month of activity
    pub fn seed_archive(&self) {
        self.write_archive(
            "accounts/2026/10/acc-1.txt",
            "=== accounts acc-1\n\
             --- 2026-10-01T09:00:00Z created\n\
             {\"username\":\"ada\",\"email\":\"ada@example.org\"}\n",
        );
        self.write_archive(
            "accounts/2026/10/acc-2.txt",
            "=== accounts acc-2\n\
             --- 2026-10-02T09:00:00Z created\n\
             {\"username\":\"brook\"}\n\
             --- 2026-10-05T09:00:00Z status_changed\n\
             {\"status\":\"suspended\"}\n",
        );
        self.write_archive(
            "requests/2026/10/req-1.txt",
            "=== requests req-1\n\
             --- 2026-10-03T10:00:00Z created\n\
             {\"author_id\":\"acc-1\",\"title\":\"Rain gauge\"}\n",
        );
        self.write_archive(
            "activity/2026/10/activity_2026_10.txt",
            "=== activity bucket 2026-10\n\
             --- 2026-10-03T10:00:00Z logged act-1\n\
             {\"account_id\":\"acc-1\",\"action\":\"login\"}\n",
        );
    }
}
