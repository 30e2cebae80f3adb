// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ark recovery engine: rebuild, validation, locking and healing

pub mod backup;
mod engine;
mod handle;
pub mod heal;
pub mod import;
pub mod lock;
pub mod validate;
mod write_path;

pub use backup::{BackupError, BackupFile, BackupInfo};
pub use engine::{Engine, EngineError};
pub use handle::StoreHandle;
pub use heal::{HealError, HealPhase, HealReport, HealTrigger, Verification};
pub use import::{ClassRestore, ImportError, Importer, RebuildReport, RestoreSource};
pub use lock::{LockError, LockGuard, LockHandle, LockManager, LockRecord};
pub use validate::{ConsistencyReport, SnapshotStatus, ValidateError, Validator};
pub use write_path::{DurableWriter, WriteError};
