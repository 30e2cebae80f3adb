// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operational surface
//!
//! [`Engine`] wires the archive, the live store and the rebuild machinery
//! together from one [`EngineConfig`]. Healing lives in [`crate::heal`].

use crate::handle::StoreHandle;
use crate::import::{ImportError, Importer, RebuildReport};
use crate::lock::{LockError, LockManager};
use crate::validate::{ConsistencyReport, ValidateError, Validator};
use crate::write_path::DurableWriter;
use ark_core::{Clock, ConfigError, EngineConfig, EphemeralEvent, SystemClock};
use ark_storage::{
    ArchiveWriter, EventLog, RelationalStore, SnapshotError, SnapshotStore, SnapshotSummary,
    StoreError,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Validate(#[from] ValidateError),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct Engine<C: Clock = SystemClock> {
    pub(crate) config: EngineConfig,
    pub(crate) clock: C,
    pub(crate) handle: StoreHandle,
    pub(crate) writer: Arc<ArchiveWriter>,
    pub(crate) snapshots: SnapshotStore<C>,
    pub(crate) locks: LockManager<C>,
    pub(crate) importer: Importer<C>,
    pub(crate) validator: Validator,
}

impl Engine<SystemClock> {
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> Engine<C> {
    /// Open the engine; a corrupt live store leaves the handle unavailable
    /// until [`Engine::heal`] replaces it
    pub fn with_clock(config: EngineConfig, clock: C) -> Result<Self, EngineError> {
        config.validate()?;
        let root = &config.archive_root;
        std::fs::create_dir_all(root).map_err(|source| EngineError::Io {
            path: root.clone(),
            source,
        })?;

        let writer = Arc::new(ArchiveWriter::new(root));
        let snapshots = SnapshotStore::new(
            Arc::clone(&writer),
            Arc::new(EventLog::new(root)),
            clock.clone(),
        );
        let locks = LockManager::new(config.lock_path(), config.lock.clone(), clock.clone());
        let importer = Importer::new(root, clock.clone());
        let validator = Validator::new(root);
        let handle = StoreHandle::open(&config.store_path);
        tracing::info!(
            archive_root = %root.display(),
            store = %config.store_path.display(),
            available = handle.is_available(),
            "engine opened"
        );

        Ok(Self {
            config,
            clock,
            handle,
            writer,
            snapshots,
            locks,
            importer,
            validator,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &StoreHandle {
        &self.handle
    }

    pub fn locks(&self) -> &LockManager<C> {
        &self.locks
    }

    pub fn snapshots(&self) -> &SnapshotStore<C> {
        &self.snapshots
    }

    /// Hook for durable mutations
    pub fn durable_writer(&self) -> DurableWriter<'_> {
        DurableWriter::new(&self.writer, &self.handle)
    }

    /// Hook for ephemeral transitions
    pub fn record_ephemeral(&self, event: &EphemeralEvent) -> Result<SnapshotSummary, EngineError> {
        Ok(self
            .handle
            .with_writes(|store| self.snapshots.record_event(store, event))?)
    }

    /// Cross-check the live store against the archive
    pub fn validate(&self) -> Result<ConsistencyReport, EngineError> {
        Ok(self.handle.with(|store| self.validator.validate(store))?)
    }

    /// Rewrite every snapshot from live relational state
    pub fn rebuild_all_snapshots(&self) -> Result<Vec<SnapshotSummary>, EngineError> {
        let summaries = self
            .handle
            .with_writes(|store| self.snapshots.rebuild_all_snapshots(store))?;
        tracing::info!(classes = summaries.len(), "snapshots rebuilt");
        Ok(summaries)
    }

    /// Rebuild the archive into a new store at `target`, which must be empty
    pub fn rebuild_into(&self, target: &Path) -> Result<RebuildReport, EngineError> {
        let _lock = self.locks.acquire(&format!("rebuild:{}", std::process::id()))?;
        let store = RelationalStore::open(target)?;
        let report = self.importer.rebuild(&store)?;
        store.close()?;
        Ok(report)
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
