// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Current-state snapshots of ephemeral classes
//!
//! ```text
//! # snapshot class=sessions checkpoint=2026-10-18T12:00:00Z entries=2
//! {"id":"s-1","owner_id":"acc-1","created_at":"2026-10-18T11:00:00Z"}
//! {"id":"s-2","created_at":"2026-10-18T11:30:00Z"}
//! ```
//!
//! The checkpoint is the newest event-log timestamp the snapshot reflects.
//! A log entry newer than the checkpoint means the snapshot is stale.

use crate::event_log::{EventLog, EventLogError};
use crate::relational::{RelationalStore, StoreError};
use crate::writer::{ArchiveWriteError, ArchiveWriter};
use ark_core::address;
use ark_core::event::{format_timestamp, parse_timestamp};
use ark_core::{Clock, EphemeralClass, EphemeralEvent, EphemeralRecord, LiveSet, SystemClock};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

const HEADER_PREFIX: &str = "# snapshot";
const NO_CHECKPOINT: &str = "none";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid snapshot {path}: {reason}")]
    InvalidFormat { path: PathBuf, reason: String },
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    EventLog(#[from] EventLogError),
    #[error(transparent)]
    Write(#[from] ArchiveWriteError),
}

/// Parsed contents of one snapshot file
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub class: EphemeralClass,
    pub checkpoint: Option<DateTime<Utc>>,
    pub records: Vec<EphemeralRecord>,
}

impl Snapshot {
    pub fn render(&self) -> Result<String, serde_json::Error> {
        let checkpoint = self
            .checkpoint
            .as_ref()
            .map(format_timestamp)
            .unwrap_or_else(|| NO_CHECKPOINT.to_string());
        let mut text = format!(
            "{HEADER_PREFIX} class={} checkpoint={checkpoint} entries={}\n",
            self.class,
            self.records.len()
        );
        for record in &self.records {
            text.push_str(&serde_json::to_string(record)?);
            text.push('\n');
        }
        Ok(text)
    }

    /// Parse snapshot text; `origin` is only used in errors
    ///
    /// The entry count in the header must match, so a truncated file is
    /// rejected rather than restored partially.
    pub fn parse(text: &str, origin: &Path) -> Result<Self, SnapshotError> {
        let invalid = |reason: String| SnapshotError::InvalidFormat {
            path: origin.to_path_buf(),
            reason,
        };

        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let header = lines.next().ok_or_else(|| invalid("empty file".into()))?;
        let fields = header
            .strip_prefix(HEADER_PREFIX)
            .ok_or_else(|| invalid(format!("expected `{HEADER_PREFIX}` header")))?;

        let mut class = None;
        let mut checkpoint = None;
        let mut entries = None;
        for pair in fields.split_whitespace() {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| invalid(format!("malformed header field {pair}")))?;
            match key {
                "class" => {
                    class = Some(
                        EphemeralClass::parse(value)
                            .ok_or_else(|| invalid(format!("unknown class {value}")))?,
                    );
                }
                "checkpoint" if value == NO_CHECKPOINT => checkpoint = Some(None),
                "checkpoint" => {
                    let at = parse_timestamp(value).map_err(|e| invalid(e.to_string()))?;
                    checkpoint = Some(Some(at));
                }
                "entries" => {
                    entries = Some(
                        value
                            .parse::<usize>()
                            .map_err(|e| invalid(format!("entries: {e}")))?,
                    );
                }
                _ => {}
            }
        }
        let class = class.ok_or_else(|| invalid("header lacks class".into()))?;
        let checkpoint = checkpoint.ok_or_else(|| invalid("header lacks checkpoint".into()))?;
        let entries = entries.ok_or_else(|| invalid("header lacks entries".into()))?;

        let records = lines
            .enumerate()
            .map(|(i, line)| {
                serde_json::from_str::<EphemeralRecord>(line)
                    .map_err(|e| invalid(format!("entry {}: {e}", i + 1)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if records.len() != entries {
            return Err(invalid(format!(
                "header promises {entries} entries, found {}",
                records.len()
            )));
        }

        Ok(Self {
            class,
            checkpoint,
            records,
        })
    }

    /// Whether a log entry at `newest` is not reflected by this snapshot
    pub fn is_stale(&self, newest: Option<DateTime<Utc>>) -> bool {
        match (self.checkpoint, newest) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(checkpoint), Some(newest)) => newest > checkpoint,
        }
    }
}

/// Summary of one rewritten snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotSummary {
    pub class: EphemeralClass,
    pub entries: usize,
    pub checkpoint: Option<DateTime<Utc>>,
    pub path: PathBuf,
}

/// Maintains snapshot files and the event logs behind them
pub struct SnapshotStore<C: Clock = SystemClock> {
    writer: Arc<ArchiveWriter>,
    log: Arc<EventLog>,
    clock: C,
    class_locks: Mutex<HashMap<EphemeralClass, Arc<Mutex<()>>>>,
}

impl<C: Clock> SnapshotStore<C> {
    pub fn new(writer: Arc<ArchiveWriter>, log: Arc<EventLog>, clock: C) -> Self {
        Self {
            writer,
            log,
            clock,
            class_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    /// Record one ephemeral transition
    ///
    /// The event log append happens first and must succeed; the relational
    /// row is then updated and the class snapshot rewritten.
    pub fn record_event(
        &self,
        store: &RelationalStore,
        event: &EphemeralEvent,
    ) -> Result<SnapshotSummary, SnapshotError> {
        let class_lock = self.class_lock(event.class);
        let _guard = lock(&class_lock);

        self.log.append(event)?;

        let existing = store.get_ephemeral(event.class, &event.entity_id)?;
        let mut live = LiveSet::from_records(existing);
        live.apply(event);
        match live.get(&event.entity_id) {
            Some(record) => store.upsert_ephemeral(event.class, record)?,
            None => {
                store.delete_ephemeral(event.class, &event.entity_id)?;
            }
        }

        let previous = self.load(event.class).ok().flatten().and_then(|s| s.checkpoint);
        let checkpoint = previous.map_or(event.at, |p| p.max(event.at));
        self.write_class(store, event.class, Some(checkpoint))
    }

    /// Rewrite one class's snapshot from current relational state
    pub fn rebuild_snapshot(
        &self,
        store: &RelationalStore,
        class: EphemeralClass,
    ) -> Result<SnapshotSummary, SnapshotError> {
        let class_lock = self.class_lock(class);
        let _guard = lock(&class_lock);
        let checkpoint = self.log.newest_timestamp(class)?;
        self.write_class(store, class, checkpoint)
    }

    /// Rewrite every class's snapshot
    pub fn rebuild_all_snapshots(
        &self,
        store: &RelationalStore,
    ) -> Result<Vec<SnapshotSummary>, SnapshotError> {
        EphemeralClass::ALL
            .into_iter()
            .map(|class| self.rebuild_snapshot(store, class))
            .collect()
    }

    /// Read a class's snapshot; `None` if it was never written
    pub fn load(&self, class: EphemeralClass) -> Result<Option<Snapshot>, SnapshotError> {
        load_snapshot(self.writer.root(), class)
    }

    fn write_class(
        &self,
        store: &RelationalStore,
        class: EphemeralClass,
        checkpoint: Option<DateTime<Utc>>,
    ) -> Result<SnapshotSummary, SnapshotError> {
        let now = self.clock.now();
        let records: Vec<EphemeralRecord> = store
            .list_ephemeral(class)?
            .into_iter()
            .filter(|r| r.is_live(&now))
            .collect();
        let snapshot = Snapshot {
            class,
            checkpoint,
            records,
        };
        let path = self.writer.write_snapshot(class, &snapshot.render()?)?;
        tracing::debug!(class = %class, entries = snapshot.records.len(), "snapshot rewritten");
        Ok(SnapshotSummary {
            class,
            entries: snapshot.records.len(),
            checkpoint,
            path,
        })
    }

    fn class_lock(&self, class: EphemeralClass) -> Arc<Mutex<()>> {
        Arc::clone(lock(&self.class_locks).entry(class).or_default())
    }
}

/// Read a class's snapshot under an archive root
pub fn load_snapshot(root: &Path, class: EphemeralClass) -> Result<Option<Snapshot>, SnapshotError> {
    let path = root.join(address::snapshot_path(class));
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(SnapshotError::Io { path, source }),
    };
    let snapshot = Snapshot::parse(&text, &path)?;
    if snapshot.class != class {
        return Err(SnapshotError::InvalidFormat {
            path,
            reason: format!("holds {} instead of {class}", snapshot.class),
        });
    }
    Ok(Some(snapshot))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
