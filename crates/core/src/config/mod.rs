// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file is valid.
//! Relative paths resolve against the directory holding the config file.

use crate::address::SYSTEM_DIR;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// File name of the rebuild lock under `<archive_root>/system`
pub const LOCK_FILE_NAME: &str = "rebuild.lock";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Rebuild lock timing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// Age after which a held lock is treated as abandoned
    #[serde(with = "humantime_serde")]
    pub stale_threshold: Duration,
    /// How long `acquire` waits before reporting the lock busy
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            stale_threshold: Duration::from_secs(15 * 60),
            acquire_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Healing policy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealSettings {
    /// Rebuild + verify attempts before aborting
    pub max_attempts: u32,
    /// Allowed per-category row count drift between backup and rebuild
    pub count_tolerance: u64,
}

impl Default for HealSettings {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            count_tolerance: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root of the archive tree (source of truth)
    pub archive_root: PathBuf,
    /// Live relational store file
    pub store_path: PathBuf,
    /// Where pre-heal copies of the live store are kept
    pub backup_dir: PathBuf,
    pub lock: LockSettings,
    pub heal: HealSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            archive_root: PathBuf::from("archives"),
            store_path: PathBuf::from("data/live.db"),
            backup_dir: PathBuf::from("data/backups"),
            lock: LockSettings::default(),
            heal: HealSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Default layout rooted at `dir`
    pub fn rooted_at(dir: &Path) -> Self {
        Self::default().resolved_against(dir)
    }

    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let config = config.resolved_against(base);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heal.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "heal.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.lock.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "lock.poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.lock.stale_threshold.is_zero() {
            return Err(ConfigError::Invalid(
                "lock.stale_threshold must be greater than zero".to_string(),
            ));
        }
        if self.store_path.starts_with(&self.archive_root) {
            return Err(ConfigError::Invalid(
                "store_path must live outside archive_root".to_string(),
            ));
        }
        Ok(())
    }

    /// Path of the advisory rebuild lock
    pub fn lock_path(&self) -> PathBuf {
        self.archive_root.join(SYSTEM_DIR).join(LOCK_FILE_NAME)
    }

    fn resolved_against(mut self, base: &Path) -> Self {
        for path in [
            &mut self.archive_root,
            &mut self.store_path,
            &mut self.backup_dir,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
