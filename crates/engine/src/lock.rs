// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Advisory rebuild lock
//!
//! The lock is a JSON record at `<archive_root>/system/rebuild.lock`. Reading
//! the record and claiming it happens under an exclusive `fs2` lock on a
//! sidecar guard file, so two processes can never both see the lock free.
//! Whether an attempt is granted is decided by the pure [`decide`].

use ark_core::{Clock, LockSettings, SystemClock};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

const GUARD_EXTENSION: &str = "guard";

#[derive(Debug, Error)]
pub enum LockError {
    #[error("rebuild lock is busy: held by {holder} since {acquired_at}")]
    Busy {
        holder: String,
        acquired_at: DateTime<Utc>,
    },
    #[error("failed to access lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode lock record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Contents of the lock file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub holder: String,
    /// Unique per acquisition; release only removes a record with this token
    pub token: String,
    pub acquired_at: DateTime<Utc>,
    /// Age after which the record may be reclaimed
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl LockRecord {
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.acquired_at);
        age.to_std().is_ok_and(|age| age > self.timeout)
    }
}

/// Outcome of one acquisition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockDecision {
    Grant,
    /// The current record is stale and is taken over
    Reclaim { previous: LockRecord },
    Deny { current: LockRecord },
}

/// Decide an acquisition attempt against the current record
pub fn decide(current: Option<&LockRecord>, now: DateTime<Utc>) -> LockDecision {
    match current {
        None => LockDecision::Grant,
        Some(record) if record.is_stale(now) => LockDecision::Reclaim {
            previous: record.clone(),
        },
        Some(record) => LockDecision::Deny {
            current: record.clone(),
        },
    }
}

/// Identifies one successful acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub holder: String,
    pub token: String,
}

/// Releases the lock when dropped
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    handle: LockHandle,
}

impl LockGuard {
    pub fn handle(&self) -> &LockHandle {
        &self.handle
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = release_at(&self.path, &self.handle) {
            tracing::error!(path = %self.path.display(), error = %e, "failed to release rebuild lock");
        }
    }
}

/// Serializes rebuild and heal operations
pub struct LockManager<C: Clock = SystemClock> {
    path: PathBuf,
    settings: LockSettings,
    clock: C,
}

impl<C: Clock> LockManager<C> {
    pub fn new(path: impl Into<PathBuf>, settings: LockSettings, clock: C) -> Self {
        Self {
            path: path.into(),
            settings,
            clock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the lock, polling until the configured timeout elapses
    pub fn acquire(&self, owner: &str) -> Result<LockGuard, LockError> {
        let deadline = Instant::now() + self.settings.acquire_timeout;
        loop {
            match self.try_acquire(owner) {
                Err(LockError::Busy { .. }) if Instant::now() < deadline => {
                    std::thread::sleep(self.settings.poll_interval);
                }
                result => return result,
            }
        }
    }

    /// Make a single acquisition attempt
    pub fn try_acquire(&self, owner: &str) -> Result<LockGuard, LockError> {
        let _guard = GuardFile::lock(&self.path)?;
        let now = self.clock.now();
        let current = read_record(&self.path)?;

        match decide(current.as_ref(), now) {
            LockDecision::Deny { current } => {
                return Err(LockError::Busy {
                    holder: current.holder,
                    acquired_at: current.acquired_at,
                });
            }
            LockDecision::Reclaim { previous } => {
                tracing::warn!(
                    previous_holder = %previous.holder,
                    acquired_at = %previous.acquired_at,
                    new_holder = owner,
                    "forcing takeover of stale rebuild lock"
                );
                remove_if_present(&self.path)?;
            }
            LockDecision::Grant => {}
        }

        let record = LockRecord {
            holder: owner.to_string(),
            token: uuid::Uuid::new_v4().to_string(),
            acquired_at: now,
            timeout: self.settings.stale_threshold,
        };
        write_record(&self.path, &record)?;
        tracing::info!(holder = owner, "rebuild lock acquired");

        Ok(LockGuard {
            path: self.path.clone(),
            handle: LockHandle {
                holder: record.holder,
                token: record.token,
            },
        })
    }

    /// Release a handle; returns whether a record was removed
    ///
    /// Releasing an already released or foreign handle is a no-op.
    pub fn release(&self, handle: &LockHandle) -> Result<bool, LockError> {
        release_at(&self.path, handle)
    }

    /// Current lock record, if any
    pub fn current(&self) -> Result<Option<LockRecord>, LockError> {
        read_record(&self.path)
    }
}

/// Exclusive OS lock on the sidecar guard file, released on drop
struct GuardFile {
    file: File,
}

impl GuardFile {
    fn lock(lock_path: &Path) -> Result<Self, LockError> {
        let path = lock_path.with_extension(GUARD_EXTENSION);
        let io_err = |source| LockError::Io {
            path: path.clone(),
            source,
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(io_err)?;
        file.lock_exclusive().map_err(io_err)?;
        Ok(Self { file })
    }
}

impl Drop for GuardFile {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn release_at(path: &Path, handle: &LockHandle) -> Result<bool, LockError> {
    let _guard = GuardFile::lock(path)?;
    match read_record(path)? {
        Some(record) if record.token == handle.token => {
            remove_if_present(path)?;
            tracing::info!(holder = %handle.holder, "rebuild lock released");
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Read the lock record
///
/// Records are only written under the guard, so one that cannot be parsed
/// was left by a crash mid-write. It is treated as held by an unknown holder
/// since the file's modification time, with no timeout, and is reclaimed by
/// the next attempt.
fn read_record(path: &Path) -> Result<Option<LockRecord>, LockError> {
    let io_err = |source| LockError::Io {
        path: path.to_path_buf(),
        source,
    };
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(e)),
    };
    match serde_json::from_str(&text) {
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable rebuild lock record");
            let modified = fs::metadata(path).and_then(|m| m.modified()).map_err(io_err)?;
            Ok(Some(LockRecord {
                holder: "unknown".to_string(),
                token: String::new(),
                acquired_at: DateTime::<Utc>::from(modified),
                timeout: Duration::ZERO,
            }))
        }
    }
}

fn write_record(path: &Path, record: &LockRecord) -> Result<(), LockError> {
    let io_err = |source| LockError::Io {
        path: path.to_path_buf(),
        source,
    };
    let json = serde_json::to_string_pretty(record)?;
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(io_err)?;
    file.write_all(json.as_bytes()).map_err(io_err)?;
    file.sync_all().map_err(io_err)
}

fn remove_if_present(path: &Path) -> Result<(), LockError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(LockError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
