// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Back up, rebuild and promote the live store

use crate::output::{self, OutputFormat};
use anyhow::Result;
use ark_engine::{Engine, HealError, HealReport, HealTrigger};
use serde::Serialize;
use std::fmt;
use std::process::ExitCode;

#[derive(clap::Args)]
pub struct HealArgs {
    /// Only heal when the live store is missing or fails its integrity check
    #[arg(long)]
    if_corrupt: bool,
}

#[derive(Serialize)]
struct HealOutput<'a> {
    healed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<&'a HealReport>,
}

fn describe_trigger(trigger: &HealTrigger) -> String {
    match trigger {
        HealTrigger::Operator => "operator request".to_string(),
        HealTrigger::AccessError { reason } => format!("access error ({reason})"),
        HealTrigger::IntegrityCheck { problems } => {
            format!("integrity check ({} problems)", problems.len())
        }
        HealTrigger::MissingStore => "missing store".to_string(),
    }
}

impl fmt::Display for HealOutput<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(report) = self.report else {
            return writeln!(f, "live store is healthy, nothing to heal");
        };

        let outcome = if report.promoted() { "promoted" } else { "aborted" };
        writeln!(f, "heal after {}: {outcome}", describe_trigger(&report.trigger))?;
        let phases: Vec<_> = report.phases.iter().map(|p| p.phase.as_str()).collect();
        writeln!(f, "  phases: {}", phases.join(" -> "))?;
        match &report.backup {
            Some(backup) => writeln!(
                f,
                "  backup: {} ({} files)",
                backup.store.display(),
                backup.files.len()
            )?,
            None => writeln!(f, "  backup: none, no live store on disk")?,
        }

        for attempt in &report.attempts {
            write!(f, "  attempt {}", attempt.attempt)?;
            if let Some(rebuild) = &attempt.rebuild {
                write!(
                    f,
                    ": imported {}, skipped {}, failed {}",
                    rebuild.imported(),
                    rebuild.skipped(),
                    rebuild.failed()
                )?;
            }
            writeln!(f)?;
            if let Some(verification) = &attempt.verification {
                if verification.passed() {
                    writeln!(f, "    verification passed")?;
                }
                for problem in &verification.problems {
                    writeln!(f, "    {problem}")?;
                }
            }
            if let Some(error) = &attempt.error {
                writeln!(f, "    error: {error}")?;
            }
        }
        Ok(())
    }
}

pub fn handle(engine: &Engine, args: HealArgs, format: OutputFormat) -> Result<ExitCode> {
    let result = if args.if_corrupt {
        engine.heal_if_corrupt()
    } else {
        engine.heal(HealTrigger::Operator).map(Some)
    };

    match result {
        Ok(report) => {
            output::print(
                &HealOutput {
                    healed: report.is_some(),
                    report: report.as_ref(),
                },
                format,
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(HealError::Aborted {
            attempts,
            backup,
            report,
        }) => {
            // Print the report before failing
            output::print(
                &HealOutput {
                    healed: false,
                    report: Some(&*report),
                },
                format,
            );
            Err(HealError::Aborted {
                attempts,
                backup,
                report,
            }
            .into())
        }
        Err(e) => Err(e.into()),
    }
}
