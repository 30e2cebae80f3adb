// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ark-storage: archive files and the relational store derived from them

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod event_log;
pub mod record;
pub mod relational;
pub mod snapshot;
pub mod writer;

pub use event_log::{EventLog, EventLogError, LogCorruption, LogScan};
pub use record::{list_records, read_record, ArchiveParseError, ArchiveRecord, RecordHeader};
pub use relational::{
    check_row, inspect, table_names, DanglingReference, DurableRow, Integrity, RelationalStore, StoreError, StoreTx,
};
pub use snapshot::{load_snapshot, Snapshot, SnapshotError, SnapshotStore, SnapshotSummary};
pub use writer::{ArchiveWriteError, ArchiveWriter};
