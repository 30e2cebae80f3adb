// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Importer / rebuilder
//!
//! Populates an empty relational store from the archive tree. Durable
//! categories are imported in dependency order, one transaction each. A bad
//! record is counted and logged and the import moves on.
//!
//! Foreign keys are not enforced while importing: a row whose parent archive
//! is lost still rebuilds, and the validator reports the dangling reference.

use ark_core::address::RecordKey;
use ark_core::entity::fold;
use ark_core::{Category, Clock, EntityState, EphemeralClass, EphemeralRecord, Layout, SystemClock};
use ark_storage::{list_records, load_snapshot, read_record, EventLog, RelationalStore, StoreError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to list archives under {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Per-category import counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCounts {
    pub category: Category,
    pub imported: u64,
    /// Rows the store rejected (duplicate id, bad shape)
    pub skipped: u64,
    /// Records that could not be parsed or folded
    pub failed: u64,
}

impl CategoryCounts {
    fn new(category: Category) -> Self {
        Self {
            category,
            imported: 0,
            skipped: 0,
            failed: 0,
        }
    }
}

/// Where an ephemeral class was restored from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RestoreSource {
    Snapshot,
    /// The snapshot was unusable and the full log was replayed
    EventLog { reason: String },
    /// Neither source could be read
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassRestore {
    pub class: EphemeralClass,
    pub source: RestoreSource,
    pub imported: u64,
    /// Live records left out because they had already expired
    pub expired: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Failed,
    Skipped,
}

/// One record that did not make it into the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub category: Category,
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub kind: FailureKind,
    pub reason: String,
}

/// Outcome of one rebuild; never persisted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub durable: Vec<CategoryCounts>,
    pub ephemeral: Vec<ClassRestore>,
    pub failures: Vec<RecordFailure>,
}

impl RebuildReport {
    pub fn counts(&self, category: Category) -> Option<&CategoryCounts> {
        self.durable.iter().find(|c| c.category == category)
    }

    pub fn imported(&self) -> u64 {
        self.durable.iter().map(|c| c.imported).sum()
    }

    pub fn skipped(&self) -> u64 {
        self.durable.iter().map(|c| c.skipped).sum()
    }

    pub fn failed(&self) -> u64 {
        self.durable.iter().map(|c| c.failed).sum()
    }
}

/// Rebuilds relational state from the archive rooted at `root`
pub struct Importer<C: Clock = SystemClock> {
    root: PathBuf,
    clock: C,
}

impl<C: Clock> Importer<C> {
    pub fn new(root: impl Into<PathBuf>, clock: C) -> Self {
        Self {
            root: root.into(),
            clock,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Import every archive into `target`, which must be empty
    pub fn rebuild(&self, target: &RelationalStore) -> Result<RebuildReport, ImportError> {
        target.ensure_empty()?;
        target.set_foreign_keys(false)?;
        let result = self.import_all(target);
        let restored = target.set_foreign_keys(true);
        let report = result?;
        restored?;

        tracing::info!(
            target = %target.path().display(),
            imported = report.imported(),
            skipped = report.skipped(),
            failed = report.failed(),
            "rebuild complete"
        );
        Ok(report)
    }

    fn import_all(&self, target: &RelationalStore) -> Result<RebuildReport, ImportError> {
        let mut report = RebuildReport::default();
        for category in Category::ALL {
            let counts = self.import_category(target, category, &mut report.failures)?;
            tracing::debug!(
                category = %category,
                imported = counts.imported,
                skipped = counts.skipped,
                failed = counts.failed,
                "category imported"
            );
            report.durable.push(counts);
        }
        for class in EphemeralClass::ALL {
            report.ephemeral.push(self.restore_class(target, class)?);
        }
        Ok(report)
    }

    fn import_category(
        &self,
        target: &RelationalStore,
        category: Category,
        failures: &mut Vec<RecordFailure>,
    ) -> Result<CategoryCounts, ImportError> {
        let mut counts = CategoryCounts::new(category);
        let files = list_records(&self.root, category).map_err(|source| ImportError::Io {
            path: self.root.join(category.as_str()),
            source,
        })?;

        let mut rows: Vec<(EntityState, PathBuf)> = Vec::new();
        for relative in files {
            match self.states_of(category, &relative) {
                Ok(states) => rows.extend(states.into_iter().map(|s| (s, relative.clone()))),
                Err((id, reason)) => {
                    tracing::warn!(category = %category, path = %relative.display(), %reason, "archive record failed");
                    counts.failed += 1;
                    failures.push(RecordFailure {
                        category,
                        path: relative,
                        id,
                        kind: FailureKind::Failed,
                        reason,
                    });
                }
            }
        }

        target.with_transaction(|tx| {
            for (state, relative) in &rows {
                match tx.insert_entity(category, state, relative) {
                    Ok(()) => counts.imported += 1,
                    Err(e) if e.is_rejection() => {
                        tracing::warn!(category = %category, id = %state.id, error = %e, "archive row skipped");
                        counts.skipped += 1;
                        failures.push(RecordFailure {
                            category,
                            path: relative.clone(),
                            id: Some(state.id.clone()),
                            kind: FailureKind::Skipped,
                            reason: e.to_string(),
                        });
                    }
                    Err(e) => return Err(ImportError::Store(e)),
                }
            }
            Ok(())
        })?;
        Ok(counts)
    }

    /// Entity states held by one archive file
    ///
    /// Per-entity files fold into one state; every bucket entry is its own.
    /// On failure returns the entity id, if known, and the reason.
    fn states_of(
        &self,
        category: Category,
        relative: &Path,
    ) -> Result<Vec<EntityState>, (Option<String>, String)> {
        let record = read_record(&self.root, relative).map_err(|e| (None, e.to_string()))?;
        match (category.layout(), &record.header.key) {
            (Layout::PerEntity, RecordKey::Entity(id)) => fold(id, &record.events)
                .map(|state| vec![state])
                .map_err(|e| (Some(id.clone()), e.to_string())),
            (Layout::MonthlyBucket, RecordKey::Bucket) => record
                .events
                .iter()
                .map(|event| {
                    EntityState::from_entry(event).ok_or_else(|| {
                        (
                            event.entry_id().map(str::to_string),
                            format!("{} block in a bucket record", event.kind()),
                        )
                    })
                })
                .collect(),
            _ => Err((None, "record key does not match its category layout".to_string())),
        }
    }

    fn restore_class(
        &self,
        target: &RelationalStore,
        class: EphemeralClass,
    ) -> Result<ClassRestore, ImportError> {
        let (source, records) = self.live_records(class);
        let now = self.clock.now();
        let (live, expired): (Vec<EphemeralRecord>, Vec<EphemeralRecord>) =
            records.into_iter().partition(|r| r.is_live(&now));

        target.with_transaction(|tx| {
            for record in &live {
                tx.upsert_ephemeral(class, record)?;
            }
            Ok::<_, ImportError>(())
        })?;

        match &source {
            RestoreSource::Snapshot => {
                tracing::debug!(class = %class, entries = live.len(), "class restored from snapshot");
            }
            RestoreSource::EventLog { reason } => {
                tracing::warn!(class = %class, entries = live.len(), %reason, "class restored by replaying event log");
            }
            RestoreSource::Unavailable { reason } => {
                tracing::error!(class = %class, %reason, "class could not be restored");
            }
        }
        Ok(ClassRestore {
            class,
            source,
            imported: live.len() as u64,
            expired: expired.len() as u64,
        })
    }

    /// Pick the restore source of a class and read its records
    fn live_records(&self, class: EphemeralClass) -> (RestoreSource, Vec<EphemeralRecord>) {
        let log = EventLog::new(&self.root);
        let newest = match log.newest_timestamp(class) {
            Ok(newest) => newest,
            Err(e) => {
                // Without the log a snapshot cannot be checked for staleness
                return match load_snapshot(&self.root, class) {
                    Ok(Some(snapshot)) => (RestoreSource::Snapshot, snapshot.records),
                    _ => (
                        RestoreSource::Unavailable {
                            reason: e.to_string(),
                        },
                        Vec::new(),
                    ),
                };
            }
        };

        let reason = match load_snapshot(&self.root, class) {
            Ok(Some(snapshot)) if !snapshot.is_stale(newest) => {
                return (RestoreSource::Snapshot, snapshot.records);
            }
            Ok(Some(_)) => "stale snapshot".to_string(),
            Ok(None) => "missing snapshot".to_string(),
            Err(e) => format!("unreadable snapshot: {e}"),
        };
        match log.replay(class) {
            Ok(live) => (RestoreSource::EventLog { reason }, live.into_records()),
            Err(e) => (
                RestoreSource::Unavailable {
                    reason: format!("{reason}; {e}"),
                },
                Vec::new(),
            ),
        }
    }
}

#[cfg(test)]
#[path = "import_tests.rs"]
mod tests;
