// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Archive categories and ephemeral entity classes
//!
//! Durable categories are listed in dependency order: a category only
//! references ids introduced by the categories before it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a durable category maps entities onto files
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    /// One file per entity, named after its id
    PerEntity,
    /// One file per month holding many independent entries
    MonthlyBucket,
}

/// A relational column promoted out of the entity's attribute map
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub required: bool,
    /// Category whose ids this column references
    pub references: Option<Category>,
}

const fn col(name: &'static str, required: bool, references: Option<Category>) -> Column {
    Column {
        name,
        required,
        references,
    }
}

const ACCOUNT_COLUMNS: &[Column] = &[
    col("username", true, None),
    col("display_name", false, None),
    col("email", false, None),
];
const ROLE_COLUMNS: &[Column] = &[col("name", true, None), col("description", false, None)];
const REQUEST_COLUMNS: &[Column] = &[
    col("author_id", true, Some(Category::Accounts)),
    col("title", true, None),
    col("body", false, None),
];
const RESPONSE_COLUMNS: &[Column] = &[
    col("request_id", true, Some(Category::Requests)),
    col("author_id", true, Some(Category::Accounts)),
    col("body", false, None),
];
const ACTIVITY_COLUMNS: &[Column] = &[
    col("account_id", false, Some(Category::Accounts)),
    col("action", true, None),
    col("subject", false, None),
];

/// Durable entity category
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Accounts,
    Roles,
    Requests,
    Responses,
    Activity,
}

impl Category {
    /// All durable categories in import order
    pub const ALL: [Category; 5] = [
        Category::Accounts,
        Category::Roles,
        Category::Requests,
        Category::Responses,
        Category::Activity,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Accounts => "accounts",
            Category::Roles => "roles",
            Category::Requests => "requests",
            Category::Responses => "responses",
            Category::Activity => "activity",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }

    pub fn layout(self) -> Layout {
        match self {
            Category::Activity => Layout::MonthlyBucket,
            _ => Layout::PerEntity,
        }
    }

    /// Relational table holding this category's rows
    pub fn table(self) -> &'static str {
        self.as_str()
    }

    pub fn columns(self) -> &'static [Column] {
        match self {
            Category::Accounts => ACCOUNT_COLUMNS,
            Category::Roles => ROLE_COLUMNS,
            Category::Requests => REQUEST_COLUMNS,
            Category::Responses => RESPONSE_COLUMNS,
            Category::Activity => ACTIVITY_COLUMNS,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Ephemeral entity class tracked by snapshot + event log
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EphemeralClass {
    Sessions,
    RoleGrants,
    Tokens,
    PendingApprovals,
}

impl EphemeralClass {
    pub const ALL: [EphemeralClass; 4] = [
        EphemeralClass::Sessions,
        EphemeralClass::RoleGrants,
        EphemeralClass::Tokens,
        EphemeralClass::PendingApprovals,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EphemeralClass::Sessions => "sessions",
            EphemeralClass::RoleGrants => "role_grants",
            EphemeralClass::Tokens => "tokens",
            EphemeralClass::PendingApprovals => "pending_approvals",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }

    pub fn table(self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for EphemeralClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}
