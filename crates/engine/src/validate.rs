// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Consistency validator
//!
//! Cross-checks relational rows against archive files in both directions and
//! checks each ephemeral snapshot against its event log. Never writes.

use ark_core::address::RecordKey;
use ark_core::{Category, EphemeralClass};
use ark_storage::{
    list_records, load_snapshot, read_record, DanglingReference, EventLog, EventLogError,
    RelationalStore, StoreError,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidateError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    EventLog(#[from] EventLogError),
    #[error("failed to list archives under {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An archived entity with no relational row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanArchive {
    pub path: PathBuf,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryConsistency {
    pub category: Category,
    pub rows: u64,
    pub archives: u64,
    /// Row ids whose archive file is missing, unreadable or lacks the id
    pub orphan_rows: Vec<String>,
    pub orphan_archives: Vec<OrphanArchive>,
    /// Archive files that failed to parse
    pub unreadable: Vec<PathBuf>,
    /// Rows naming a parent id with no row, left by a lost parent archive
    pub dangling_references: Vec<DanglingReference>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    Fresh,
    /// The log holds an entry newer than the checkpoint
    Stale,
    /// The log has entries but no snapshot was written
    Missing,
    Unreadable,
    /// Neither a snapshot nor log entries exist
    Empty,
}

impl SnapshotStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotStatus::Fresh => "fresh",
            SnapshotStatus::Stale => "stale",
            SnapshotStatus::Missing => "missing",
            SnapshotStatus::Unreadable => "unreadable",
            SnapshotStatus::Empty => "empty",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassConsistency {
    pub class: EphemeralClass,
    pub status: SnapshotStatus,
    pub checkpoint: Option<DateTime<Utc>>,
    pub newest_log_entry: Option<DateTime<Utc>>,
    pub log_corruptions: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    pub categories: Vec<CategoryConsistency>,
    pub classes: Vec<ClassConsistency>,
}

impl ConsistencyReport {
    pub fn orphan_row_count(&self) -> usize {
        self.categories.iter().map(|c| c.orphan_rows.len()).sum()
    }

    pub fn orphan_archive_count(&self) -> usize {
        self.categories.iter().map(|c| c.orphan_archives.len()).sum()
    }

    pub fn unreadable_count(&self) -> usize {
        self.categories.iter().map(|c| c.unreadable.len()).sum()
    }

    pub fn dangling_reference_count(&self) -> usize {
        self.categories.iter().map(|c| c.dangling_references.len()).sum()
    }

    pub fn classes_with(&self, status: SnapshotStatus) -> Vec<EphemeralClass> {
        self.classes
            .iter()
            .filter(|c| c.status == status)
            .map(|c| c.class)
            .collect()
    }

    pub fn stale_snapshots(&self) -> Vec<EphemeralClass> {
        self.classes_with(SnapshotStatus::Stale)
    }

    pub fn missing_snapshots(&self) -> Vec<EphemeralClass> {
        self.classes_with(SnapshotStatus::Missing)
    }

    pub fn is_consistent(&self) -> bool {
        self.orphan_row_count() == 0
            && self.orphan_archive_count() == 0
            && self.unreadable_count() == 0
            && self.dangling_reference_count() == 0
            && self.classes.iter().all(|c| {
                matches!(c.status, SnapshotStatus::Fresh | SnapshotStatus::Empty)
                    && c.log_corruptions == 0
            })
    }
}

pub struct Validator {
    root: PathBuf,
}

impl Validator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn validate(&self, store: &RelationalStore) -> Result<ConsistencyReport, ValidateError> {
        let mut report = ConsistencyReport::default();
        for category in Category::ALL {
            report.categories.push(self.check_category(store, category)?);
        }
        let log = EventLog::new(&self.root);
        for class in EphemeralClass::ALL {
            report.classes.push(self.check_class(&log, class)?);
        }

        for class in report.stale_snapshots() {
            tracing::warn!(class = %class, "snapshot is stale");
        }
        tracing::info!(
            orphan_rows = report.orphan_row_count(),
            orphan_archives = report.orphan_archive_count(),
            unreadable = report.unreadable_count(),
            dangling_references = report.dangling_reference_count(),
            consistent = report.is_consistent(),
            "validation complete"
        );
        Ok(report)
    }

    fn check_category(
        &self,
        store: &RelationalStore,
        category: Category,
    ) -> Result<CategoryConsistency, ValidateError> {
        let files = list_records(&self.root, category).map_err(|source| ValidateError::Io {
            path: self.root.join(category.as_str()),
            source,
        })?;

        let mut archived: BTreeMap<PathBuf, BTreeSet<String>> = BTreeMap::new();
        let mut unreadable = Vec::new();
        for relative in files {
            match read_record(&self.root, &relative) {
                Ok(record) => {
                    let ids = match record.header.key {
                        RecordKey::Entity(id) => BTreeSet::from([id]),
                        RecordKey::Bucket => record
                            .events
                            .iter()
                            .filter_map(|e| e.entry_id().map(str::to_string))
                            .collect(),
                    };
                    archived.insert(relative, ids);
                }
                Err(e) => {
                    tracing::warn!(category = %category, path = %relative.display(), error = %e, "unreadable archive record");
                    unreadable.push(relative);
                }
            }
        }

        let refs = store.archive_refs(category)?;
        let mut referenced: BTreeMap<&Path, BTreeSet<&str>> = BTreeMap::new();
        let mut orphan_rows = Vec::new();
        for (id, path) in &refs {
            let resolved = archived.get(path).is_some_and(|ids| ids.contains(id));
            if resolved {
                referenced.entry(path.as_path()).or_default().insert(id.as_str());
            } else {
                orphan_rows.push(id.clone());
            }
        }

        let mut orphan_archives = Vec::new();
        for (path, ids) in &archived {
            for id in ids {
                let has_row = referenced
                    .get(path.as_path())
                    .is_some_and(|rows| rows.contains(id.as_str()));
                if !has_row {
                    orphan_archives.push(OrphanArchive {
                        path: path.clone(),
                        id: id.clone(),
                    });
                }
            }
        }

        let dangling_references = store.dangling_references(category)?;
        for dangling in &dangling_references {
            tracing::warn!(
                category = %category,
                id = %dangling.id,
                column = dangling.column,
                parent = %dangling.parent,
                value = %dangling.value,
                "dangling reference"
            );
        }

        Ok(CategoryConsistency {
            category,
            rows: refs.len() as u64,
            archives: (archived.len() + unreadable.len()) as u64,
            orphan_rows,
            orphan_archives,
            unreadable,
            dangling_references,
        })
    }

    fn check_class(&self, log: &EventLog, class: EphemeralClass) -> Result<ClassConsistency, ValidateError> {
        let scan = log.scan(class)?;
        let newest = scan.events.last().map(|e| e.at);

        let (status, checkpoint) = match load_snapshot(&self.root, class) {
            Ok(Some(snapshot)) if snapshot.is_stale(newest) => (SnapshotStatus::Stale, snapshot.checkpoint),
            Ok(Some(snapshot)) => (SnapshotStatus::Fresh, snapshot.checkpoint),
            Ok(None) if newest.is_some() => (SnapshotStatus::Missing, None),
            Ok(None) => (SnapshotStatus::Empty, None),
            Err(e) => {
                tracing::warn!(class = %class, error = %e, "unreadable snapshot");
                (SnapshotStatus::Unreadable, None)
            }
        };

        Ok(ClassConsistency {
            class,
            status,
            checkpoint,
            newest_log_entry: newest,
            log_corruptions: scan.corruptions.len(),
        })
    }
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
