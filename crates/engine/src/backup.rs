// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pre-heal backups of the live store
//!
//! The store file and any WAL sidecars are copied to
//! `<backup_dir>/<stem>.<timestamp>.<suffix>.bak`. Each copy is hashed while
//! written and re-hashed from disk afterwards. Backups are never deleted here.

use crate::handle::{sidecar_path, SIDECAR_SUFFIXES};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const BACKUP_EXTENSION: &str = "bak";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%6fZ";

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("failed to back up {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("backup {path} does not match its source")]
    DigestMismatch { path: PathBuf },
}

/// One copied file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupFile {
    pub source: PathBuf,
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupInfo {
    /// Copy of the store file itself
    pub store: PathBuf,
    pub files: Vec<BackupFile>,
}

/// Copy the store at `store_path` into `backup_dir`
///
/// Returns `None` when there is no store file to back up.
pub fn back_up(
    store_path: &Path,
    backup_dir: &Path,
    now: DateTime<Utc>,
) -> Result<Option<BackupInfo>, BackupError> {
    if !store_path.is_file() {
        return Ok(None);
    }
    fs::create_dir_all(backup_dir).map_err(|source| BackupError::Io {
        path: backup_dir.to_path_buf(),
        source,
    })?;

    let mut sources = vec![(store_path.to_path_buf(), "")];
    for suffix in SIDECAR_SUFFIXES {
        let sidecar = sidecar_path(store_path, suffix);
        if sidecar.is_file() {
            sources.push((sidecar, suffix));
        }
    }

    let targets = free_names(store_path, backup_dir, now, &sources);
    let mut files = Vec::new();
    for ((source, _), target) in sources.iter().zip(targets) {
        files.push(copy_verified(source, &target)?);
    }

    let info = BackupInfo {
        store: files[0].path.clone(),
        files,
    };
    tracing::info!(backup = %info.store.display(), files = info.files.len(), "live store backed up");
    Ok(Some(info))
}

/// Hex SHA-256 of a file's contents
pub fn file_digest(path: &Path) -> Result<String, BackupError> {
    let io_err = |source| BackupError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io_err)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(io_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_encode(&hasher.finalize()))
}

/// Backup names for every source, avoiding names already taken
fn free_names(
    store_path: &Path,
    backup_dir: &Path,
    now: DateTime<Utc>,
    sources: &[(PathBuf, &str)],
) -> Vec<PathBuf> {
    let file_name = store_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (stem, extension) = match file_name.split_once('.') {
        Some((stem, extension)) => (stem.to_string(), extension.to_string()),
        None => (file_name.clone(), String::new()),
    };
    let stamp = now.format(TIMESTAMP_FORMAT).to_string();

    let names_for = |stamp: &str| -> Vec<PathBuf> {
        sources
            .iter()
            .map(|(_, sidecar)| {
                let suffix = format!("{extension}{sidecar}");
                let suffix = suffix.trim_start_matches('-');
                let name = if suffix.is_empty() {
                    format!("{stem}.{stamp}.{BACKUP_EXTENSION}")
                } else {
                    format!("{stem}.{stamp}.{suffix}.{BACKUP_EXTENSION}")
                };
                backup_dir.join(name)
            })
            .collect()
    };

    let mut names = names_for(&stamp);
    let mut attempt = 1;
    while names.iter().any(|p| p.exists()) {
        names = names_for(&format!("{stamp}-{attempt}"));
        attempt += 1;
    }
    names
}

fn copy_verified(source: &Path, target: &Path) -> Result<BackupFile, BackupError> {
    let src_err = |e| BackupError::Io {
        path: source.to_path_buf(),
        source: e,
    };
    let dst_err = |e| BackupError::Io {
        path: target.to_path_buf(),
        source: e,
    };

    let mut input = File::open(source).map_err(src_err)?;
    let mut output = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .map_err(dst_err)?;

    let mut hasher = Sha256::new();
    let mut bytes = 0u64;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = input.read(&mut buf).map_err(src_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        output.write_all(&buf[..n]).map_err(dst_err)?;
        bytes += n as u64;
    }
    output.sync_all().map_err(dst_err)?;

    let sha256 = hex_encode(&hasher.finalize());
    if file_digest(target)? != sha256 {
        return Err(BackupError::DigestMismatch {
            path: target.to_path_buf(),
        });
    }
    Ok(BackupFile {
        source: source.to_path_buf(),
        path: target.to_path_buf(),
        bytes,
        sha256,
    })
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
#[path = "backup_tests.rs"]
mod tests;
