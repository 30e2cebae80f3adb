// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI command implementations

pub mod heal;
pub mod rebuild;
pub mod snapshots;
pub mod validate;
