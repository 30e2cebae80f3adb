// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Live relational store handle
//!
//! Callers borrow the live store through [`StoreHandle::with`], which holds a
//! read lock for the duration of the call. Promotion takes the write lock,
//! closes the old connection and swaps in a freshly opened store, so no caller
//! can keep using a connection to a replaced file.
//!
//! Mutations go through [`StoreHandle::with_writes`] instead. A heal holds the
//! write gate from its baseline until promotion, so mutations wait for the
//! promoted store while reads carry on against the old one.

use ark_storage::{inspect, Integrity, RelationalStore, StoreError};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// SQLite sidecar suffixes of a WAL-mode database
pub(crate) const SIDECAR_SUFFIXES: [&str; 2] = ["-wal", "-shm"];

pub struct StoreHandle {
    path: PathBuf,
    /// `None` while the store cannot be opened
    live: RwLock<Option<RelationalStore>>,
    /// Shared by mutations, held exclusively by a heal
    writes: RwLock<()>,
}

impl StoreHandle {
    /// Open the live store, leaving the handle unavailable if it is corrupt
    pub fn open(path: &Path) -> Self {
        let live = match inspect(path) {
            Integrity::Corrupt(problems) => {
                tracing::warn!(path = %path.display(), ?problems, "live store is corrupt, leaving it closed");
                None
            }
            Integrity::Healthy | Integrity::Missing => match RelationalStore::open(path) {
                Ok(store) => Some(store),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to open live store");
                    None
                }
            },
        };
        Self {
            path: path.to_path_buf(),
            live: RwLock::new(live),
            writes: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_available(&self) -> bool {
        self.read().is_some()
    }

    /// Run `f` against the live store
    pub fn with<T, E>(&self, f: impl FnOnce(&RelationalStore) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        match self.read().as_ref() {
            Some(store) => f(store),
            None => Err(StoreError::Unavailable(self.path.clone()).into()),
        }
    }

    /// Run a mutation `f` against the live store, waiting out any heal
    pub fn with_writes<T, E>(&self, f: impl FnOnce(&RelationalStore) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let _gate = self.writes.read().unwrap_or_else(PoisonError::into_inner);
        self.with(f)
    }

    /// Block mutations until the returned guard is dropped
    pub(crate) fn hold_writes(&self) -> RwLockWriteGuard<'_, ()> {
        self.writes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Integrity of the live store; an unavailable store counts as corrupt
    pub fn integrity(&self) -> Integrity {
        match self.with(|store| store.integrity()) {
            Ok(integrity) => integrity,
            Err(e) if !self.path.exists() => {
                tracing::debug!(error = %e, "live store file is missing");
                Integrity::Missing
            }
            Err(e) => Integrity::Corrupt(vec![e.to_string()]),
        }
    }

    /// Run `f` while no caller can use the live store
    pub fn paused<T>(&self, f: impl FnOnce(Option<&RelationalStore>) -> T) -> T {
        let live = self.write();
        f(live.as_ref())
    }

    /// Replace the live store with the closed store at `staging`
    ///
    /// The staging file is renamed over the live path. If the rename fails the
    /// previous store is reopened and the error returned.
    pub fn promote(&self, staging: &Path) -> Result<(), StoreError> {
        let mut live = self.write();
        if let Some(old) = live.take() {
            if let Err(e) = old.close() {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to close replaced store cleanly");
            }
        }

        remove_sidecars(&self.path)?;
        if let Err(source) = fs::rename(staging, &self.path) {
            *live = RelationalStore::open(&self.path).ok();
            return Err(StoreError::Io {
                path: staging.to_path_buf(),
                source,
            });
        }
        remove_sidecars(staging)?;
        if let Some(dir) = self.path.parent() {
            if let Ok(handle) = File::open(dir) {
                let _ = handle.sync_all();
            }
        }

        *live = Some(RelationalStore::open(&self.path)?);
        tracing::info!(path = %self.path.display(), "promoted rebuilt store");
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<RelationalStore>> {
        self.live.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<RelationalStore>> {
        self.live.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Paths of a database's WAL sidecars
pub(crate) fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Delete a database file and its sidecars, ignoring files that do not exist
pub(crate) fn remove_store_files(path: &Path) -> Result<(), StoreError> {
    remove_file(path)?;
    remove_sidecars(path)
}

fn remove_sidecars(path: &Path) -> Result<(), StoreError> {
    for suffix in SIDECAR_SUFFIXES {
        remove_file(&sidecar_path(path, suffix))?;
    }
    Ok(())
}

fn remove_file(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
#[path = "handle_tests.rs"]
mod tests;
