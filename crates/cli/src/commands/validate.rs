// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Consistency check between the archive and the live store

use crate::output::{self, OutputFormat};
use anyhow::Result;
use ark_core::EphemeralClass;
use ark_engine::{ConsistencyReport, Engine, LockRecord};
use serde::Serialize;
use std::fmt;
use std::process::ExitCode;

/// Exit status when the check ran but found problems
pub const INCONSISTENT: u8 = 2;

#[derive(clap::Args)]
pub struct ValidateArgs {
    /// Exit 0 even when inconsistencies are found
    #[arg(long)]
    report_only: bool,
}

#[derive(Serialize)]
struct ValidateOutput<'a> {
    consistent: bool,
    /// Rebuild lock record, when a rebuild or heal holds it
    lock: Option<LockRecord>,
    #[serde(flatten)]
    report: &'a ConsistencyReport,
}

impl fmt::Display for ValidateOutput<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in &self.report.categories {
            writeln!(f, "{:<10} {} rows, {} archives", c.category, c.rows, c.archives)?;
            for id in &c.orphan_rows {
                writeln!(f, "  orphan row {id}")?;
            }
            for orphan in &c.orphan_archives {
                writeln!(f, "  orphan archive {} ({})", orphan.path.display(), orphan.id)?;
            }
            for path in &c.unreadable {
                writeln!(f, "  unreadable {}", path.display())?;
            }
            for d in &c.dangling_references {
                writeln!(f, "  dangling {} {} -> {} {}", d.id, d.column, d.parent, d.value)?;
            }
        }
        for class in &self.report.classes {
            write!(f, "{:<18} snapshot {}", class.class, class.status.as_str())?;
            if let Some(checkpoint) = class.checkpoint {
                write!(f, ", checkpoint {}", checkpoint.to_rfc3339())?;
            }
            if class.log_corruptions > 0 {
                write!(f, ", {} corrupt log lines", class.log_corruptions)?;
            }
            writeln!(f)?;
        }

        if let Some(lock) = &self.lock {
            writeln!(
                f,
                "rebuild lock held by {} since {}",
                lock.holder,
                lock.acquired_at.to_rfc3339()
            )?;
        }

        if self.consistent {
            return writeln!(f, "consistent");
        }
        writeln!(
            f,
            "inconsistent: {} orphan rows, {} orphan archives, {} unreadable, {} dangling references, stale snapshots: {}, missing snapshots: {}",
            self.report.orphan_row_count(),
            self.report.orphan_archive_count(),
            self.report.unreadable_count(),
            self.report.dangling_reference_count(),
            class_list(&self.report.stale_snapshots()),
            class_list(&self.report.missing_snapshots()),
        )
    }
}

fn class_list(classes: &[EphemeralClass]) -> String {
    if classes.is_empty() {
        return "none".to_string();
    }
    classes
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn handle(engine: &Engine, args: ValidateArgs, format: OutputFormat) -> Result<ExitCode> {
    let report = engine.validate()?;
    let consistent = report.is_consistent();
    let lock = engine.locks().current()?;
    output::print(
        &ValidateOutput {
            consistent,
            lock,
            report: &report,
        },
        format,
    );
    if consistent || args.report_only {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(INCONSISTENT))
    }
}
