// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ark-core: domain model for the archive-first persistence engine
//!
//! This crate provides:
//! - Archive addressing (entity ↔ deterministic file path)
//! - Lifecycle events and the pure folds that rebuild state from them
//! - Ephemeral entity transitions replayed into live sets
//! - Engine configuration and a testable clock

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod address;
pub mod category;
pub mod clock;
pub mod config;
pub mod entity;
pub mod ephemeral;
pub mod event;

pub use address::{AddressError, ArchiveAddress, RecordKey, TimeBucket};
pub use category::{Category, Column, EphemeralClass, Layout};
pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{ConfigError, EngineConfig, HealSettings, LockSettings};
pub use entity::{EntityState, FoldError};
pub use ephemeral::{EphemeralEvent, EphemeralRecord, LiveSet, Transition};
pub use event::{ArchiveEvent, EventBody, EventError, EventKind, Fields};
