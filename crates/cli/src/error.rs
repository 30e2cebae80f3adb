// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator-facing error display with context and suggestions

use ark_engine::{EngineError, HealError, LockError, ValidateError};
use ark_storage::{SnapshotError, StoreError};
use std::fmt;

/// Error with context and recovery suggestions
#[derive(Debug)]
pub struct ArkError {
    /// What went wrong
    pub message: String,
    /// Why it might have happened
    pub context: Vec<String>,
    /// How to fix it
    pub suggestions: Vec<String>,
}

impl ArkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context.push(ctx.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Explain an error from a command, falling back to its cause chain
    pub fn describe(err: &anyhow::Error) -> Self {
        if let Some(LockError::Busy {
            holder,
            acquired_at,
        }) = find_lock_error(err)
        {
            return Self::lock_held(holder, &acquired_at.to_rfc3339());
        }
        if let Some(HealError::Aborted {
            attempts, backup, ..
        }) = err.downcast_ref::<HealError>()
        {
            return Self::heal_aborted(*attempts, backup.as_deref());
        }
        if let Some(StoreError::Unavailable(path)) = find_store_error(err) {
            return Self::store_unavailable(&path.display().to_string());
        }
        Self::new(format!("{err:#}"))
    }

    /// Another rebuild or heal holds the lock
    pub fn lock_held(holder: &str, since: &str) -> Self {
        ArkError::new("the rebuild lock is held")
            .with_context(format!("held by '{holder}' since {since}"))
            .with_suggestion("wait for the running rebuild or heal to finish")
            .with_suggestion("a crashed holder is taken over once its timeout passes")
    }

    pub fn heal_aborted(attempts: u32, backup: Option<&std::path::Path>) -> Self {
        let mut err = ArkError::new(format!("heal aborted after {attempts} attempts"))
            .with_context("the rebuilt store did not match the damaged store")
            .with_context("the live store was left in place");
        if let Some(backup) = backup {
            err = err.with_context(format!("backup kept at {}", backup.display()));
        }
        err.with_suggestion("inspect the report above for failed records")
            .with_suggestion("check archive consistency: ark validate")
    }

    pub fn store_unavailable(path: &str) -> Self {
        ArkError::new(format!("live store {path} is unavailable"))
            .with_context("the database failed its integrity check on open")
            .with_suggestion("rebuild it from the archive: ark heal --if-corrupt")
    }
}

fn find_lock_error(err: &anyhow::Error) -> Option<&LockError> {
    err.chain().find_map(|cause| {
        if let Some(lock) = cause.downcast_ref::<LockError>() {
            return Some(lock);
        }
        if let Some(HealError::Lock(lock)) = cause.downcast_ref::<HealError>() {
            return Some(lock);
        }
        match cause.downcast_ref::<EngineError>() {
            Some(EngineError::Lock(lock)) => Some(lock),
            _ => None,
        }
    })
}

/// Transparent variants hide the store error from the cause chain
fn find_store_error(err: &anyhow::Error) -> Option<&StoreError> {
    err.chain().find_map(|cause| {
        if let Some(store) = cause.downcast_ref::<StoreError>() {
            return Some(store);
        }
        if let Some(engine) = cause.downcast_ref::<EngineError>() {
            return match engine {
                EngineError::Store(store)
                | EngineError::Validate(ValidateError::Store(store))
                | EngineError::Snapshot(SnapshotError::Store(store)) => Some(store),
                _ => None,
            };
        }
        match cause.downcast_ref::<HealError>() {
            Some(HealError::Store(store) | HealError::Validate(ValidateError::Store(store))) => {
                Some(store)
            }
            _ => None,
        }
    })
}

impl fmt::Display for ArkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "error: {}", self.message)?;

        if !self.context.is_empty() {
            writeln!(f)?;
            for ctx in &self.context {
                writeln!(f, "  -> {}", ctx)?;
            }
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            writeln!(f, "suggestions:")?;
            for (i, suggestion) in self.suggestions.iter().enumerate() {
                writeln!(f, "  {}. {}", i + 1, suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for ArkError {}
