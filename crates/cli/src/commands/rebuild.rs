// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Explicit rebuild of the archive into a fresh store

use crate::output::{self, OutputFormat};
use anyhow::{Context, Result};
use ark_engine::{Engine, RebuildReport, RestoreSource};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(clap::Args)]
pub struct RebuildArgs {
    /// Path of the new store; it must not exist or be empty
    target: PathBuf,
}

#[derive(Serialize)]
struct RebuildOutput<'a> {
    target: &'a PathBuf,
    #[serde(flatten)]
    report: &'a RebuildReport,
}

impl fmt::Display for RebuildOutput<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for counts in &self.report.durable {
            writeln!(
                f,
                "{:<18} imported {}, skipped {}, failed {}",
                counts.category, counts.imported, counts.skipped, counts.failed
            )?;
        }
        for class in &self.report.ephemeral {
            let source = match &class.source {
                RestoreSource::Snapshot => "snapshot".to_string(),
                RestoreSource::EventLog { reason } => format!("event log, {reason}"),
                RestoreSource::Unavailable { reason } => format!("not restored, {reason}"),
            };
            writeln!(
                f,
                "{:<18} imported {}, expired {} ({source})",
                class.class, class.imported, class.expired
            )?;
        }
        for failure in &self.report.failures {
            writeln!(
                f,
                "  {} {}: {}",
                failure.category,
                failure.path.display(),
                failure.reason
            )?;
        }
        writeln!(
            f,
            "rebuilt into {}: imported {}, skipped {}, failed {}",
            self.target.display(),
            self.report.imported(),
            self.report.skipped(),
            self.report.failed()
        )
    }
}

pub fn handle(engine: &Engine, args: RebuildArgs, format: OutputFormat) -> Result<ExitCode> {
    let report = engine
        .rebuild_into(&args.target)
        .with_context(|| format!("failed to rebuild into {}", args.target.display()))?;
    output::print(
        &RebuildOutput {
            target: &args.target,
            report: &report,
        },
        format,
    );
    Ok(ExitCode::SUCCESS)
}
