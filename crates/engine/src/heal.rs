// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Healing orchestrator
//!
//! ```text
//! Detecting ──► BackingUp ──► Rebuilding ──► Verifying ──► Promoting
//!                   │              ▲             │
//!                   │              └── retry ────┤
//!                   ▼                            ▼
//!                Aborted ◄──────── attempts exhausted
//! ```
//!
//! The rebuild lock is held for the whole heal. The damaged store is copied
//! aside before anything else happens and the copy is only ever read. Durable
//! and ephemeral writes wait from the backup until promotion, so the baseline
//! counts and the archive the rebuild reads stay in step.

use crate::backup::{back_up, BackupError, BackupInfo};
use crate::engine::Engine;
use crate::handle::{remove_store_files, sidecar_path};
use crate::import::{ImportError, RebuildReport};
use crate::lock::LockError;
use crate::validate::{ConsistencyReport, ValidateError};
use ark_core::{Category, Clock};
use ark_storage::{Integrity, RelationalStore, StoreError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

const STAGING_SUFFIX: &str = ".staging";

#[derive(Debug, Error)]
pub enum HealError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("backup failed, heal aborted: {0}")]
    BackupFailed(#[source] BackupError),
    #[error("rebuilt store failed verification: {}", problems.join("; "))]
    Verification { problems: Vec<String> },
    #[error("heal aborted after {attempts} attempts, manual intervention required (backup: {})", describe_backup(backup.as_deref()))]
    Aborted {
        attempts: u32,
        backup: Option<PathBuf>,
        report: Box<HealReport>,
    },
    #[error("failed to promote rebuilt store: {0}")]
    Promotion(#[source] StoreError),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error(transparent)]
    Validate(#[from] ValidateError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn describe_backup(backup: Option<&Path>) -> String {
    backup.map_or_else(|| "none".to_string(), |p| p.display().to_string())
}

/// Why a heal was started
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HealTrigger {
    Operator,
    /// A caller hit an error using the live store
    AccessError { reason: String },
    IntegrityCheck { problems: Vec<String> },
    MissingStore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealPhase {
    Detecting,
    BackingUp,
    Rebuilding,
    Verifying,
    Promoting,
    Aborted,
}

impl HealPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            HealPhase::Detecting => "detecting",
            HealPhase::BackingUp => "backing_up",
            HealPhase::Rebuilding => "rebuilding",
            HealPhase::Verifying => "verifying",
            HealPhase::Promoting => "promoting",
            HealPhase::Aborted => "aborted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseRecord {
    pub phase: HealPhase,
    pub at: DateTime<Utc>,
}

/// Row count of one durable table, before and after the rebuild
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountCheck {
    pub table: String,
    /// `None` when the damaged store could not be counted
    pub backup: Option<u64>,
    pub rebuilt: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub counts: Vec<CountCheck>,
    pub orphan_rows: usize,
    pub problems: Vec<String>,
}

impl Verification {
    pub fn passed(&self) -> bool {
        self.problems.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealAttempt {
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rebuild: Option<RebuildReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<Verification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealReport {
    pub trigger: HealTrigger,
    pub phases: Vec<PhaseRecord>,
    pub backup: Option<BackupInfo>,
    /// Durable row counts of the damaged store, per table
    pub baseline: BTreeMap<String, Option<u64>>,
    pub attempts: Vec<HealAttempt>,
}

impl HealReport {
    fn new(trigger: HealTrigger) -> Self {
        Self {
            trigger,
            phases: Vec::new(),
            backup: None,
            baseline: BTreeMap::new(),
            attempts: Vec::new(),
        }
    }

    fn enter(&mut self, phase: HealPhase, at: DateTime<Utc>) {
        tracing::info!(?phase, "heal phase");
        self.phases.push(PhaseRecord { phase, at });
    }

    pub fn final_phase(&self) -> Option<HealPhase> {
        self.phases.last().map(|p| p.phase)
    }

    pub fn promoted(&self) -> bool {
        self.final_phase() == Some(HealPhase::Promoting)
    }
}

/// Compare a rebuilt store against the damaged store's counts
///
/// Only durable tables are compared: expired ephemeral rows are dropped on
/// rebuild, so their counts legitimately shrink.
pub fn verify(
    baseline: &BTreeMap<String, Option<u64>>,
    rebuilt: &BTreeMap<String, u64>,
    consistency: &ConsistencyReport,
    tolerance: u64,
) -> Verification {
    let mut verification = Verification::default();
    for category in Category::ALL {
        let table = category.table();
        let backup = baseline.get(table).copied().flatten();
        let count = rebuilt.get(table).copied().unwrap_or(0);
        if let Some(expected) = backup {
            if expected.abs_diff(count) > tolerance {
                verification.problems.push(format!(
                    "{table}: damaged store had {expected} rows, rebuild has {count}"
                ));
            }
        }
        verification.counts.push(CountCheck {
            table: table.to_string(),
            backup,
            rebuilt: count,
        });
    }

    verification.orphan_rows = consistency.orphan_row_count();
    if verification.orphan_rows > 0 {
        verification
            .problems
            .push(format!("{} rows without an archive", verification.orphan_rows));
    }
    verification
}

/// Durable table counts of the damaged store, each best-effort
///
/// An open live store is counted directly, since its WAL may not be in the
/// copied main file yet. Otherwise the backup copy is opened read-only.
fn baseline_counts(
    live: Option<&RelationalStore>,
    backup: Option<&BackupInfo>,
) -> BTreeMap<String, Option<u64>> {
    let copy = match (live, backup) {
        (None, Some(backup)) => match RelationalStore::open_read_only(&backup.store) {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!(backup = %backup.store.display(), error = %e, "backup cannot be opened for counting");
                None
            }
        },
        _ => None,
    };
    let source = live.or(copy.as_ref());
    Category::ALL
        .into_iter()
        .map(|category| {
            let table = category.table();
            let count = source.and_then(|store| match store.count(table) {
                Ok(count) => Some(count),
                Err(e) => {
                    tracing::warn!(table, error = %e, "damaged store table cannot be counted");
                    None
                }
            });
            (table.to_string(), count)
        })
        .collect()
}

fn heal_owner() -> String {
    format!("heal:{}", std::process::id())
}

impl<C: Clock> Engine<C> {
    /// Back up the live store, rebuild it from archives and promote the result
    pub fn heal(&self, trigger: HealTrigger) -> Result<HealReport, HealError> {
        let mut report = HealReport::new(trigger);
        report.enter(HealPhase::Detecting, self.clock.now());
        tracing::warn!(trigger = ?report.trigger, "starting heal");
        let _lock = self.locks.acquire(&heal_owner())?;
        let _writes = self.handle.hold_writes();

        report.enter(HealPhase::BackingUp, self.clock.now());
        let backed_up = self.handle.paused(|live| {
            back_up(self.handle.path(), &self.config.backup_dir, self.clock.now()).map(|backup| {
                let baseline = baseline_counts(live, backup.as_ref());
                (backup, baseline)
            })
        });
        match backed_up {
            Ok((backup, baseline)) => {
                report.backup = backup;
                report.baseline = baseline;
            }
            Err(e) => {
                report.enter(HealPhase::Aborted, self.clock.now());
                tracing::error!(error = %e, "heal aborted: backup failed");
                return Err(HealError::BackupFailed(e));
            }
        }

        let staging = sidecar_path(self.handle.path(), STAGING_SUFFIX);
        let max_attempts = self.config.heal.max_attempts;
        for attempt in 1..=max_attempts {
            report.enter(HealPhase::Rebuilding, self.clock.now());
            let mut record = HealAttempt {
                attempt,
                rebuild: None,
                verification: None,
                error: None,
            };
            let result = self.rebuild_and_verify(&staging, &mut report, &mut record);
            if let Err(e) = &result {
                tracing::warn!(attempt, max_attempts, error = %e, "heal attempt failed");
                record.error = Some(e.to_string());
                if let Err(e) = remove_store_files(&staging) {
                    tracing::warn!(error = %e, "failed to remove staging store");
                }
            }
            report.attempts.push(record);
            if result.is_err() {
                continue;
            }

            report.enter(HealPhase::Promoting, self.clock.now());
            if let Err(e) = self.handle.promote(&staging) {
                report.enter(HealPhase::Aborted, self.clock.now());
                tracing::error!(error = %e, "heal aborted: promotion failed");
                return Err(HealError::Promotion(e));
            }
            tracing::info!(attempt, "heal complete");
            return Ok(report);
        }

        report.enter(HealPhase::Aborted, self.clock.now());
        let backup = report.backup.as_ref().map(|b| b.store.clone());
        tracing::error!(
            attempts = max_attempts,
            backup = %describe_backup(backup.as_deref()),
            "heal aborted, manual intervention required"
        );
        Err(HealError::Aborted {
            attempts: max_attempts,
            backup,
            report: Box::new(report),
        })
    }

    /// Heal only if the live store fails its integrity check
    pub fn heal_if_corrupt(&self) -> Result<Option<HealReport>, HealError> {
        let trigger = match self.handle.integrity() {
            Integrity::Healthy => return Ok(None),
            Integrity::Missing => HealTrigger::MissingStore,
            Integrity::Corrupt(problems) => HealTrigger::IntegrityCheck { problems },
        };
        self.heal(trigger).map(Some)
    }

    fn rebuild_and_verify(
        &self,
        staging: &Path,
        report: &mut HealReport,
        attempt: &mut HealAttempt,
    ) -> Result<(), HealError> {
        remove_store_files(staging)?;
        let store = RelationalStore::open(staging)?;
        attempt.rebuild = Some(self.importer.rebuild(&store)?);

        report.enter(HealPhase::Verifying, self.clock.now());
        let consistency = self.validator.validate(&store)?;
        let verification = verify(
            &report.baseline,
            &store.counts()?,
            &consistency,
            self.config.heal.count_tolerance,
        );
        let problems = verification.problems.clone();
        attempt.verification = Some(verification);
        store.close()?;

        if problems.is_empty() {
            Ok(())
        } else {
            Err(HealError::Verification { problems })
        }
    }
}

#[cfg(test)]
#[path = "heal_tests.rs"]
mod tests;
