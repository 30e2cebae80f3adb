// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ark - operator tool for the archive-first persistence engine

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod commands;
mod error;
mod output;

use anyhow::{Context, Result};
use ark_core::EngineConfig;
use ark_engine::Engine;
use clap::{Parser, Subcommand};
use commands::{heal, rebuild, snapshots, validate};
use error::ArkError;
use output::OutputFormat;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Config file picked up from the working directory
const DEFAULT_CONFIG: &str = "ark.toml";

#[derive(Parser)]
#[command(
    name = "ark",
    version,
    about = "Validate, rebuild and heal a live store from its text archive"
)]
struct Cli {
    /// Engine config file [default: ./ark.toml when present]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cross-check the live store against the archive (exit 2 when inconsistent)
    Validate(validate::ValidateArgs),
    /// Back up the live store, rebuild it from the archive and swap it in
    Heal(heal::HealArgs),
    /// Rewrite every ephemeral snapshot from the live store
    RebuildSnapshots,
    /// Rebuild the archive into a new, empty store
    Rebuild(rebuild::RebuildArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging();

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprint!("{}", ArkError::describe(&err));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;
    tracing::debug!(
        archive_root = %config.archive_root.display(),
        store = %config.store_path.display(),
        "config loaded"
    );
    let engine = Engine::open(config).context("failed to open engine")?;

    match cli.command {
        Commands::Validate(args) => validate::handle(&engine, args, cli.format),
        Commands::Heal(args) => heal::handle(&engine, args, cli.format),
        Commands::RebuildSnapshots => snapshots::handle(&engine, cli.format),
        Commands::Rebuild(args) => rebuild::handle(&engine, args, cli.format),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let cwd = std::env::current_dir().context("failed to read working directory")?;
            let default = cwd.join(DEFAULT_CONFIG);
            if !default.is_file() {
                return Ok(EngineConfig::rooted_at(&cwd));
            }
            default
        }
    };
    EngineConfig::load(&path).with_context(|| format!("failed to load config {}", path.display()))
}

/// Structured logs go to stderr so stdout stays machine-readable
fn setup_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
