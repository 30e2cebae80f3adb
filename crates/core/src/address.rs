// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Archive addressing
//!
//! Maps entities onto deterministic, archive-root-relative paths and back:
//!
//! ```text
//! <category>/<yyyy>/<mm>/<id>.txt                    per-entity categories
//! <category>/<yyyy>/<mm>/<category>_<yyyy>_<mm>.txt  bucket categories
//! system/current_state/<class>.txt                   snapshots
//! system/event_log/<class>_<yyyy>_<mm>.txt           event logs
//! ```

use crate::category::{Category, EphemeralClass, Layout};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Extension shared by every archive text file
pub const RECORD_EXTENSION: &str = "txt";
/// Directory for snapshots, event logs and the rebuild lock
pub const SYSTEM_DIR: &str = "system";
pub const SNAPSHOT_DIR: &str = "current_state";
pub const EVENT_LOG_DIR: &str = "event_log";

const MAX_ID_LEN: usize = 128;

/// Errors for malformed addresses (programmer errors, fail fast)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("invalid category: {0}")]
    InvalidCategory(String),
    #[error("invalid entity id: {0:?}")]
    InvalidId(String),
    #[error("invalid time bucket: {0}")]
    InvalidBucket(String),
    #[error("unrecognized archive path: {0}")]
    UnrecognizedPath(String),
}

/// Year and month an archive file is bucketed under
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeBucket {
    pub year: i32,
    pub month: u32,
}

impl TimeBucket {
    pub fn new(year: i32, month: u32) -> Result<Self, AddressError> {
        if !(1..=9999).contains(&year) || !(1..=12).contains(&month) {
            return Err(AddressError::InvalidBucket(format!("{year}-{month}")));
        }
        Ok(Self { year, month })
    }

    /// Bucket containing the given timestamp
    pub fn of(timestamp: &DateTime<Utc>) -> Result<Self, AddressError> {
        Self::new(timestamp.year(), timestamp.month())
    }

    fn from_parts(year: &str, month: &str) -> Result<Self, AddressError> {
        let invalid = || AddressError::InvalidBucket(format!("{year}/{month}"));
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse().map_err(|_| invalid())?;
        let month = month.parse().map_err(|_| invalid())?;
        Self::new(year, month)
    }

    /// Parse a `YYYY-MM` label
    pub fn parse_label(label: &str) -> Result<Self, AddressError> {
        let (year, month) = label
            .split_once('-')
            .ok_or_else(|| AddressError::InvalidBucket(label.to_string()))?;
        Self::from_parts(year, month)
    }

    fn year_dir(&self) -> String {
        format!("{:04}", self.year)
    }

    fn month_dir(&self) -> String {
        format!("{:02}", self.month)
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// What a durable archive file holds
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKey {
    /// The full lifecycle of one entity
    Entity(String),
    /// A month of independent entries
    Bucket,
}

/// Decoded location of a durable archive file
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArchiveAddress {
    pub category: Category,
    pub key: RecordKey,
    pub bucket: TimeBucket,
}

impl ArchiveAddress {
    /// Entity id for per-entity files
    pub fn entity_id(&self) -> Option<&str> {
        match &self.key {
            RecordKey::Entity(id) => Some(id),
            RecordKey::Bucket => None,
        }
    }

    pub fn file_name(&self) -> String {
        match &self.key {
            RecordKey::Entity(id) => format!("{id}.{RECORD_EXTENSION}"),
            RecordKey::Bucket => format!(
                "{}_{}_{}.{RECORD_EXTENSION}",
                self.category,
                self.bucket.year_dir(),
                self.bucket.month_dir()
            ),
        }
    }

    /// Path relative to the archive root
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(self.category.as_str())
            .join(self.bucket.year_dir())
            .join(self.bucket.month_dir())
            .join(self.file_name())
    }
}

/// Check that an id is safe to embed in a file name
pub fn validate_id(id: &str) -> Result<(), AddressError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AddressError::InvalidId(id.to_string()))
    }
}

/// Address for an entity created at `timestamp`
///
/// Bucket categories still validate `id`, since the entry id is written into
/// the bucket file's block header.
pub fn address_for(
    category: Category,
    id: &str,
    timestamp: &DateTime<Utc>,
) -> Result<ArchiveAddress, AddressError> {
    validate_id(id)?;
    let bucket = TimeBucket::of(timestamp)?;
    let key = match category.layout() {
        Layout::PerEntity => RecordKey::Entity(id.to_string()),
        Layout::MonthlyBucket => RecordKey::Bucket,
    };
    Ok(ArchiveAddress {
        category,
        key,
        bucket,
    })
}

/// Relative archive path for an entity created at `timestamp`
pub fn path_for(
    category: Category,
    id: &str,
    timestamp: &DateTime<Utc>,
) -> Result<PathBuf, AddressError> {
    Ok(address_for(category, id, timestamp)?.relative_path())
}

/// Decode a durable archive path
///
/// Accepts archive-root-relative paths and absolute paths; only the last
/// four components are inspected.
pub fn parse(path: &Path) -> Result<ArchiveAddress, AddressError> {
    let unrecognized = || AddressError::UnrecognizedPath(path.display().to_string());

    let parts: Vec<&str> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();
    let [.., category, year, month, file] = parts.as_slice() else {
        return Err(unrecognized());
    };

    let category =
        Category::parse(category).ok_or_else(|| AddressError::InvalidCategory(category.to_string()))?;
    let bucket = TimeBucket::from_parts(year, month)?;
    let stem = file
        .strip_suffix(&format!(".{RECORD_EXTENSION}"))
        .ok_or_else(unrecognized)?;

    let key = match category.layout() {
        Layout::PerEntity => {
            validate_id(stem)?;
            RecordKey::Entity(stem.to_string())
        }
        Layout::MonthlyBucket => {
            let expected = ArchiveAddress {
                category,
                key: RecordKey::Bucket,
                bucket,
            };
            if expected.file_name() != *file {
                return Err(unrecognized());
            }
            RecordKey::Bucket
        }
    };

    Ok(ArchiveAddress {
        category,
        key,
        bucket,
    })
}

/// Snapshot path for a class (always the same path)
pub fn snapshot_path(class: EphemeralClass) -> PathBuf {
    PathBuf::from(SYSTEM_DIR)
        .join(SNAPSHOT_DIR)
        .join(format!("{class}.{RECORD_EXTENSION}"))
}

/// Directory holding every event log bucket
pub fn event_log_dir() -> PathBuf {
    PathBuf::from(SYSTEM_DIR).join(EVENT_LOG_DIR)
}

/// Event log path for the month containing `timestamp`
pub fn event_log_path(
    class: EphemeralClass,
    timestamp: &DateTime<Utc>,
) -> Result<PathBuf, AddressError> {
    let bucket = TimeBucket::of(timestamp)?;
    Ok(event_log_dir().join(event_log_file_name(class, bucket)))
}

pub fn event_log_file_name(class: EphemeralClass, bucket: TimeBucket) -> String {
    format!(
        "{class}_{}_{}.{RECORD_EXTENSION}",
        bucket.year_dir(),
        bucket.month_dir()
    )
}

/// Decode an event log file name into its class and month
pub fn parse_event_log_name(file_name: &str) -> Result<(EphemeralClass, TimeBucket), AddressError> {
    let unrecognized = || AddressError::UnrecognizedPath(file_name.to_string());
    let stem = file_name
        .strip_suffix(&format!(".{RECORD_EXTENSION}"))
        .ok_or_else(unrecognized)?;
    let mut parts = stem.rsplitn(3, '_');
    let (Some(month), Some(year), Some(class)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(unrecognized());
    };
    let class =
        EphemeralClass::parse(class).ok_or_else(|| AddressError::InvalidCategory(class.to_string()))?;
    Ok((class, TimeBucket::from_parts(year, month)?))
}

#[cfg(test)]
#[path = "address_tests.rs"]
mod tests;
