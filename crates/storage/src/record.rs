// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Text format of durable archive records
//!
//! ```text
//! === requests req-0001
//! --- 2026-10-18T10:00:00Z created
//! {"author_id":"acc-1","title":"Rain"}
//! --- 2026-10-19T08:12:00Z status_changed
//! {"status":"approved"}
//! ```
//!
//! Bucket files use `=== activity bucket 2026-10` and carry the entry id at
//! the end of each block header. A block is always one header line followed
//! by one JSON payload line, so a block is appended with a single write.

use ark_core::address::{self, ArchiveAddress, RecordKey, TimeBucket, RECORD_EXTENSION};
use ark_core::event::{format_timestamp, parse_timestamp, ArchiveEvent, EventKind};
use ark_core::Category;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const RECORD_MARKER: &str = "===";
pub const BLOCK_MARKER: &str = "---";
const BUCKET_WORD: &str = "bucket";

/// Errors reading an archive record (recoverable during import)
#[derive(Debug, Error)]
pub enum ArchiveParseError {
    #[error("{origin}: line {line}: {reason}")]
    Malformed {
        origin: String,
        line: usize,
        reason: String,
    },
    #[error("{origin}: header does not match file address ({reason})")]
    HeaderMismatch { origin: String, reason: String },
    #[error("{origin}: {source}")]
    Address {
        origin: String,
        #[source]
        source: address::AddressError,
    },
    #[error("failed to read {origin}: {source}")]
    Io {
        origin: String,
        #[source]
        source: std::io::Error,
    },
}

/// Identity line at the top of every record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub category: Category,
    pub key: RecordKey,
    /// Only present for bucket records
    pub bucket: Option<TimeBucket>,
}

impl RecordHeader {
    pub fn for_address(address: &ArchiveAddress) -> Self {
        let bucket = match address.key {
            RecordKey::Bucket => Some(address.bucket),
            RecordKey::Entity(_) => None,
        };
        Self {
            category: address.category,
            key: address.key.clone(),
            bucket,
        }
    }

    pub fn render(&self) -> String {
        match (&self.key, self.bucket) {
            (RecordKey::Entity(id), _) => format!("{RECORD_MARKER} {} {id}\n", self.category),
            (RecordKey::Bucket, Some(bucket)) => {
                format!("{RECORD_MARKER} {} {BUCKET_WORD} {bucket}\n", self.category)
            }
            (RecordKey::Bucket, None) => format!("{RECORD_MARKER} {} {BUCKET_WORD}\n", self.category),
        }
    }

    fn parse(line: &str) -> Result<Self, String> {
        let rest = line
            .strip_prefix(RECORD_MARKER)
            .ok_or_else(|| format!("expected `{RECORD_MARKER}` header"))?;
        let tokens: Vec<&str> = rest.split_whitespace().collect();
        let (category, key, bucket) = match tokens.as_slice() {
            [category, BUCKET_WORD, label] => {
                let bucket = TimeBucket::parse_label(label).map_err(|e| e.to_string())?;
                (*category, RecordKey::Bucket, Some(bucket))
            }
            [category, id] => (*category, RecordKey::Entity(id.to_string()), None),
            _ => return Err("header must be `=== <category> <id>`".to_string()),
        };
        let category =
            Category::parse(category).ok_or_else(|| format!("unknown category {category}"))?;
        Ok(Self {
            category,
            key,
            bucket,
        })
    }
}

/// A parsed archive record, events in file order
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveRecord {
    pub header: RecordHeader,
    pub events: Vec<ArchiveEvent>,
}

/// Render one event block (header line + payload line)
pub fn render_block(event: &ArchiveEvent) -> Result<String, serde_json::Error> {
    let payload = serde_json::to_string(&event.payload())?;
    let header = match event.entry_id() {
        Some(id) => format!(
            "{BLOCK_MARKER} {} {} {id}",
            format_timestamp(&event.at),
            event.kind()
        ),
        None => format!("{BLOCK_MARKER} {} {}", format_timestamp(&event.at), event.kind()),
    };
    Ok(format!("{header}\n{payload}\n"))
}

/// Parse the full text of a record
pub fn parse_record(text: &str, origin: &str) -> Result<ArchiveRecord, ArchiveParseError> {
    let malformed = |line: usize, reason: String| ArchiveParseError::Malformed {
        origin: origin.to_string(),
        line,
        reason,
    };

    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l))
        .filter(|(_, l)| !l.trim().is_empty());

    let (line_no, first) = lines
        .next()
        .ok_or_else(|| malformed(1, "empty record".to_string()))?;
    let header = RecordHeader::parse(first).map_err(|reason| malformed(line_no, reason))?;

    let mut events = Vec::new();
    while let Some((line_no, block_line)) = lines.next() {
        let rest = block_line
            .strip_prefix(BLOCK_MARKER)
            .ok_or_else(|| malformed(line_no, format!("expected `{BLOCK_MARKER}` block header")))?;
        let tokens: Vec<&str> = rest.split_whitespace().collect();
        let (at, kind, entry_id) = match tokens.as_slice() {
            [at, kind] => (*at, *kind, None),
            [at, kind, id] => (*at, *kind, Some(id.to_string())),
            _ => return Err(malformed(line_no, "block header must be `--- <time> <kind>`".into())),
        };
        let at = parse_timestamp(at).map_err(|e| malformed(line_no, e.to_string()))?;
        let kind = EventKind::parse(kind).map_err(|e| malformed(line_no, e.to_string()))?;

        let (payload_no, payload_line) = lines
            .next()
            .ok_or_else(|| malformed(line_no, "block has no payload".to_string()))?;
        let payload = serde_json::from_str(payload_line)
            .map_err(|e| malformed(payload_no, format!("invalid payload: {e}")))?;
        let event = ArchiveEvent::from_parts(kind, at, entry_id, payload)
            .map_err(|e| malformed(payload_no, e.to_string()))?;
        events.push(event);
    }

    Ok(ArchiveRecord { header, events })
}

/// Read a record and check its header against the path it was found at
pub fn read_record(root: &Path, relative: &Path) -> Result<ArchiveRecord, ArchiveParseError> {
    let origin = relative.display().to_string();
    let address = address::parse(relative).map_err(|source| ArchiveParseError::Address {
        origin: origin.clone(),
        source,
    })?;
    let text = std::fs::read_to_string(root.join(relative)).map_err(|source| {
        ArchiveParseError::Io {
            origin: origin.clone(),
            source,
        }
    })?;
    let record = parse_record(&text, &origin)?;

    let expected = RecordHeader::for_address(&address);
    if record.header != expected {
        return Err(ArchiveParseError::HeaderMismatch {
            origin,
            reason: format!(
                "expected `{}`, found `{}`",
                expected.render().trim_end(),
                record.header.render().trim_end()
            ),
        });
    }
    Ok(record)
}

/// Archive-relative paths of every record file of a category
///
/// Sorted by year, then month, then file name. Files without the record
/// extension are not records and are left out.
pub fn list_records(root: &Path, category: Category) -> io::Result<Vec<PathBuf>> {
    let category_dir = PathBuf::from(category.as_str());
    let suffix = format!(".{RECORD_EXTENSION}");
    let mut records = Vec::new();
    for year in sorted_names(&root.join(&category_dir), true)? {
        let year_dir = category_dir.join(&year);
        for month in sorted_names(&root.join(&year_dir), true)? {
            let month_dir = year_dir.join(&month);
            for file in sorted_names(&root.join(&month_dir), false)? {
                if file.ends_with(&suffix) {
                    records.push(month_dir.join(file));
                }
            }
        }
    }
    Ok(records)
}

/// Sorted entry names of `dir` that are directories (or files); a missing
/// directory has none
pub(crate) fn sorted_names(dir: &Path, dirs: bool) -> io::Result<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() == dirs {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
