// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Archive writer
//!
//! Appends lifecycle events to durable archive files and atomically replaces
//! snapshot files. Every write is flushed to disk before returning, so a
//! caller that sees `Ok` may safely commit the matching relational change.

use crate::record::{render_block, sorted_names, RecordHeader};
use ark_core::address::{self, AddressError, RECORD_EXTENSION};
use ark_core::{ArchiveEvent, Category, EphemeralClass, EventBody, Layout};
use lru::LruCache;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Record locations remembered before the least recently used is evicted
const LOCATION_CACHE_SIZE: usize = 4096;

type FileLocks = Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>;

#[derive(Debug, Error)]
pub enum ArchiveWriteError {
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error("archive record already exists: {0}")]
    AlreadyExists(PathBuf),
    #[error("no archive record for {category} {id}")]
    MissingRecord { category: Category, id: String },
    #[error("{kind} events cannot be written to {category} archives")]
    WrongLayout { category: Category, kind: String },
    #[error("entry id {entry} does not match {id}")]
    EntryMismatch { id: String, entry: String },
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ArchiveWriteError + '_ {
    move |source| ArchiveWriteError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Appends to the archive tree rooted at `root`
///
/// Appends to one file are serialized; appends to different files proceed
/// concurrently.
pub struct ArchiveWriter {
    root: PathBuf,
    /// Recently used record locations, keyed by category and entity id
    locations: Mutex<LruCache<(Category, String), PathBuf>>,
    /// Locks of files with a write in flight
    file_locks: FileLocks,
}

impl ArchiveWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let capacity = NonZeroUsize::new(LOCATION_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self::with_cache_size(root, capacity)
    }

    fn with_cache_size(root: impl Into<PathBuf>, capacity: NonZeroUsize) -> Self {
        Self {
            root: root.into(),
            locations: Mutex::new(LruCache::new(capacity)),
            file_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Append an event for `id`, returning the record's archive-relative path
    ///
    /// A `created` event starts a new per-entity record and fails if one
    /// already exists. Later events go to the record found by [`Self::locate`].
    /// Bucket categories only accept `logged` entries whose entry id is `id`.
    pub fn append(
        &self,
        category: Category,
        id: &str,
        event: &ArchiveEvent,
    ) -> Result<PathBuf, ArchiveWriteError> {
        address::validate_id(id)?;
        match (category.layout(), &event.body) {
            (Layout::PerEntity, EventBody::Created { .. }) => self.create_record(category, id, event),
            (Layout::PerEntity, EventBody::Logged { .. })
            | (Layout::MonthlyBucket, EventBody::Created { .. })
            | (Layout::MonthlyBucket, EventBody::Updated { .. })
            | (Layout::MonthlyBucket, EventBody::StatusChanged { .. }) => {
                Err(ArchiveWriteError::WrongLayout {
                    category,
                    kind: event.kind().to_string(),
                })
            }
            (Layout::PerEntity, _) => {
                let relative = self.locate(category, id)?.ok_or_else(|| {
                    ArchiveWriteError::MissingRecord {
                        category,
                        id: id.to_string(),
                    }
                })?;
                self.append_block(&relative, None, event)?;
                Ok(relative)
            }
            (Layout::MonthlyBucket, EventBody::Logged { entry_id, .. }) => {
                if entry_id != id {
                    return Err(ArchiveWriteError::EntryMismatch {
                        id: id.to_string(),
                        entry: entry_id.clone(),
                    });
                }
                let address = address::address_for(category, id, &event.at)?;
                let relative = address.relative_path();
                let header = RecordHeader::for_address(&address).render();
                self.append_block(&relative, Some(&header), event)?;
                Ok(relative)
            }
        }
    }

    /// Find the record of a per-entity id
    ///
    /// Checks the location cache, then scans `<category>/<YYYY>/<MM>/`.
    pub fn locate(
        &self,
        category: Category,
        id: &str,
    ) -> Result<Option<PathBuf>, ArchiveWriteError> {
        address::validate_id(id)?;
        let key = (category, id.to_string());
        if let Some(path) = lock(&self.locations).get(&key) {
            if self.root.join(path).is_file() {
                return Ok(Some(path.clone()));
            }
        }

        let file_name = format!("{id}.{RECORD_EXTENSION}");
        let category_dir = PathBuf::from(category.as_str());
        for year in sorted_dirs(&self.root.join(&category_dir))? {
            for month in sorted_dirs(&self.root.join(&category_dir).join(&year))? {
                let relative = category_dir.join(&year).join(&month).join(&file_name);
                if self.root.join(&relative).is_file() {
                    lock(&self.locations).put(key, relative.clone());
                    return Ok(Some(relative));
                }
            }
        }
        Ok(None)
    }

    /// Atomically replace the snapshot file of `class`
    pub fn write_snapshot(
        &self,
        class: EphemeralClass,
        contents: &str,
    ) -> Result<PathBuf, ArchiveWriteError> {
        let relative = address::snapshot_path(class);
        let path = self.root.join(&relative);
        self.with_file_lock(&relative, || -> Result<(), ArchiveWriteError> {
            let dir = parent_dir(&path);
            fs::create_dir_all(dir).map_err(io_error(dir))?;
            let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_error(dir))?;
            tmp.write_all(contents.as_bytes()).map_err(io_error(&path))?;
            tmp.as_file().sync_all().map_err(io_error(&path))?;
            tmp.persist(&path).map_err(|e| ArchiveWriteError::Io {
                path: path.clone(),
                source: e.error,
            })?;
            Ok(())
        })?;
        Ok(relative)
    }

    fn create_record(
        &self,
        category: Category,
        id: &str,
        event: &ArchiveEvent,
    ) -> Result<PathBuf, ArchiveWriteError> {
        let key = (category, id.to_string());
        if let Some(existing) = self.locate(category, id)? {
            return Err(ArchiveWriteError::AlreadyExists(existing));
        }

        let address = address::address_for(category, id, &event.at)?;
        let relative = address.relative_path();
        let path = self.root.join(&relative);
        self.with_file_lock(&relative, || -> Result<(), ArchiveWriteError> {
            let dir = parent_dir(&path);
            fs::create_dir_all(dir).map_err(io_error(dir))?;
            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    return Err(ArchiveWriteError::AlreadyExists(relative.clone()));
                }
                Err(e) => return Err(io_error(&path)(e)),
            };

            let mut text = RecordHeader::for_address(&address).render();
            text.push_str(&render_block(event)?);
            write_synced(&mut file, &path, &text)?;
            sync_dir(dir);
            Ok(())
        })?;

        lock(&self.locations).put(key, relative.clone());
        tracing::debug!(category = %category, id, path = %relative.display(), "archive record created");
        Ok(relative)
    }

    /// Append a block, writing `header` first when the file is new
    fn append_block(
        &self,
        relative: &Path,
        header: Option<&str>,
        event: &ArchiveEvent,
    ) -> Result<(), ArchiveWriteError> {
        let path = self.root.join(relative);
        let block = render_block(event)?;
        self.with_file_lock(relative, || -> Result<(), ArchiveWriteError> {
            let dir = parent_dir(&path);
            if header.is_some() {
                fs::create_dir_all(dir).map_err(io_error(dir))?;
            }
            let mut file = OpenOptions::new()
                .create(header.is_some())
                .append(true)
                .open(&path)
                .map_err(io_error(&path))?;
            let is_new = file.metadata().map_err(io_error(&path))?.len() == 0;

            let text = match header {
                Some(header) if is_new => format!("{header}{block}"),
                _ => block,
            };
            write_synced(&mut file, &path, &text)?;
            if is_new {
                sync_dir(dir);
            }
            Ok(())
        })
    }

    /// Run `f` holding the lock of one file
    ///
    /// The last holder removes the lock from the table, so it only holds files
    /// with a write in flight.
    fn with_file_lock<T>(&self, relative: &Path, f: impl FnOnce() -> T) -> T {
        let mutex = Arc::clone(lock(&self.file_locks).entry(relative.to_path_buf()).or_default());
        let value = {
            let _held = lock(&mutex);
            f()
        };
        let mut table = lock(&self.file_locks);
        // The table's reference and ours
        if Arc::strong_count(&mutex) == 2 {
            table.remove(relative);
        }
        value
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn parent_dir(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new("."))
}

fn write_synced(file: &mut File, path: &Path, text: &str) -> Result<(), ArchiveWriteError> {
    file.write_all(text.as_bytes()).map_err(io_error(path))?;
    file.sync_all().map_err(io_error(path))
}

/// Best-effort fsync of a directory so a new entry survives a crash
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

fn sorted_dirs(dir: &Path) -> Result<Vec<String>, ArchiveWriteError> {
    sorted_names(dir, true).map_err(io_error(dir))
}

#[cfg(test)]
#[path = "writer_tests.rs"]
mod tests;
