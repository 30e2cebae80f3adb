// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::output::{self, OutputFormat};
use anyhow::Result;
use ark_engine::Engine;
use ark_storage::SnapshotSummary;
use serde::Serialize;
use std::fmt;
use std::process::ExitCode;

#[derive(Serialize)]
#[serde(transparent)]
struct SnapshotsOutput(Vec<SnapshotSummary>);

impl fmt::Display for SnapshotsOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for summary in &self.0 {
            let checkpoint = summary
                .checkpoint
                .map_or_else(|| "none".to_string(), |c| c.to_rfc3339());
            writeln!(
                f,
                "{:<18} {} entries, checkpoint {checkpoint}",
                summary.class, summary.entries
            )?;
        }
        Ok(())
    }
}

pub fn handle(engine: &Engine, format: OutputFormat) -> Result<ExitCode> {
    let summaries = engine.rebuild_all_snapshots()?;
    output::print(&SnapshotsOutput(summaries), format);
    Ok(ExitCode::SUCCESS)
}
