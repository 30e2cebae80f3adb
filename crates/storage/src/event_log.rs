// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only event logs for ephemeral classes
//!
//! One JSONL file per class per month under `system/event_log/`. Each line
//! carries a CRC32 of its content; reading a file stops at the first line that
//! fails to parse or verify, so a torn trailing append loses only itself.

use ark_core::address::{self, AddressError, TimeBucket};
use ark_core::{EphemeralClass, EphemeralEvent, LiveSet, Transition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode log entry: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Address(#[from] AddressError),
}

/// One line of an event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub entity: String,
    pub transition: Transition,
    #[serde(default)]
    pub payload: Value,
    /// CRC32 of the serialized entry without this field
    pub checksum: u32,
}

#[derive(Serialize)]
struct ChecksumInput<'a> {
    at: &'a DateTime<Utc>,
    entity: &'a str,
    transition: Transition,
    payload: &'a Value,
}

impl LogEntry {
    pub fn new(event: &EphemeralEvent) -> Self {
        let mut entry = Self {
            at: event.at,
            entity: event.entity_id.clone(),
            transition: event.transition,
            payload: event.payload.clone(),
            checksum: 0,
        };
        entry.checksum = entry.calculate_checksum();
        entry
    }

    fn calculate_checksum(&self) -> u32 {
        let input = ChecksumInput {
            at: &self.at,
            entity: &self.entity,
            transition: self.transition,
            payload: &self.payload,
        };
        // Serializing plain data into a String cannot fail
        let json = serde_json::to_string(&input).unwrap_or_default();
        crc32fast::hash(json.as_bytes())
    }

    pub fn verify(&self) -> bool {
        self.checksum == self.calculate_checksum()
    }

    pub fn into_event(self, class: EphemeralClass) -> EphemeralEvent {
        EphemeralEvent {
            class,
            entity_id: self.entity,
            transition: self.transition,
            at: self.at,
            payload: self.payload,
        }
    }
}

/// A log line that could not be trusted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogCorruption {
    pub path: PathBuf,
    pub line: u64,
    pub reason: String,
}

/// Events of one class plus any corruption met while reading them
#[derive(Debug, Clone, Default)]
pub struct LogScan {
    /// Ordered by time; ties keep append order
    pub events: Vec<EphemeralEvent>,
    pub corruptions: Vec<LogCorruption>,
}

/// Event logs rooted at an archive root
pub struct EventLog {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl EventLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Append one event and fsync, returning the archive-relative log path
    pub fn append(&self, event: &EphemeralEvent) -> Result<PathBuf, EventLogError> {
        let relative = address::event_log_path(event.class, &event.at)?;
        let path = self.root.join(&relative);
        let line = serde_json::to_string(&LogEntry::new(event))?;

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let io_err = |source| EventLogError::Io {
            path: path.clone(),
            source,
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;
        writeln!(file, "{line}").map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        Ok(relative)
    }

    /// Log files of a class, oldest month first
    pub fn bucket_files(&self, class: EphemeralClass) -> Result<Vec<(TimeBucket, PathBuf)>, EventLogError> {
        let dir = self.root.join(address::event_log_dir());
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(EventLogError::Io { path: dir, source }),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| EventLogError::Io {
                path: dir.clone(),
                source,
            })?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            match address::parse_event_log_name(name) {
                Ok((found, bucket)) if found == class => files.push((bucket, entry.path())),
                Ok(_) => {}
                Err(_) => tracing::debug!(file = name, "ignoring unrecognized event log file"),
            }
        }
        files.sort();
        Ok(files)
    }

    /// Read every trustworthy event of a class
    pub fn scan(&self, class: EphemeralClass) -> Result<LogScan, EventLogError> {
        let mut scan = LogScan::default();
        for (_, path) in self.bucket_files(class)? {
            read_file(&path, class, &mut scan)?;
        }
        scan.events.sort_by_key(|e| e.at);
        Ok(scan)
    }

    /// Every trustworthy event of a class in replay order
    pub fn read_all(&self, class: EphemeralClass) -> Result<Vec<EphemeralEvent>, EventLogError> {
        Ok(self.scan(class)?.events)
    }

    /// Live set produced by replaying the whole log of a class
    pub fn replay(&self, class: EphemeralClass) -> Result<LiveSet, EventLogError> {
        Ok(LiveSet::replay(&self.read_all(class)?))
    }

    /// Timestamp of the newest trustworthy event of a class
    pub fn newest_timestamp(&self, class: EphemeralClass) -> Result<Option<DateTime<Utc>>, EventLogError> {
        let scan = self.scan(class)?;
        Ok(scan.events.last().map(|e| e.at))
    }
}

fn read_file(path: &Path, class: EphemeralClass, scan: &mut LogScan) -> Result<(), EventLogError> {
    let io_err = |source| EventLogError::Io {
        path: path.to_path_buf(),
        source,
    };
    let reader = BufReader::new(File::open(path).map_err(io_err)?);

    for (index, line) in reader.lines().enumerate() {
        let line_no = index as u64 + 1;
        let line = line.map_err(io_err)?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let reason = match serde_json::from_str::<LogEntry>(trimmed) {
            Ok(entry) if entry.verify() => {
                scan.events.push(entry.into_event(class));
                continue;
            }
            Ok(_) => "checksum mismatch".to_string(),
            Err(e) => e.to_string(),
        };
        tracing::warn!(path = %path.display(), line = line_no, %reason, "event log truncated at corrupt entry");
        scan.corruptions.push(LogCorruption {
            path: path.to_path_buf(),
            line: line_no,
            reason,
        });
        break;
    }
    Ok(())
}

#[cfg(test)]
#[path = "event_log_tests.rs"]
mod tests;
