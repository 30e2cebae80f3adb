// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable entity state derived by folding archive events
//!
//! An entity is never "the last line" of its record: its final attributes are
//! the left fold of every recorded event, creation first.

use crate::event::{ArchiveEvent, EventBody, Fields};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Status every entity starts in unless its creation event names one
pub const INITIAL_STATUS: &str = "active";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FoldError {
    #[error("entity {0} has no events")]
    Empty(String),
    #[error("entity {0} does not start with a creation event")]
    MissingCreation(String),
    #[error("entity {0} is created more than once")]
    DuplicateCreation(String),
    #[error("entity {0} contains a bucket entry")]
    UnexpectedEntry(String),
}

/// Materialized attributes of one durable entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityState {
    pub id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub fields: Fields,
}

impl EntityState {
    /// State right after creation
    ///
    /// A `status` field in the creation payload becomes the initial status.
    pub fn created(id: impl Into<String>, at: DateTime<Utc>, mut fields: Fields) -> Self {
        let status = match fields.remove("status") {
            Some(Value::String(status)) => status,
            Some(other) => {
                fields.insert("status".to_string(), other);
                INITIAL_STATUS.to_string()
            }
            None => INITIAL_STATUS.to_string(),
        };
        Self {
            id: id.into(),
            status,
            created_at: at,
            updated_at: at,
            fields,
        }
    }

    /// Apply one event to the state
    pub fn apply(mut self, event: &ArchiveEvent) -> Result<Self, FoldError> {
        match &event.body {
            EventBody::Created { .. } => return Err(FoldError::DuplicateCreation(self.id)),
            EventBody::Logged { .. } => return Err(FoldError::UnexpectedEntry(self.id)),
            EventBody::Updated { fields } => {
                for (key, value) in fields {
                    if value.is_null() {
                        self.fields.remove(key);
                    } else {
                        self.fields.insert(key.clone(), value.clone());
                    }
                }
            }
            EventBody::StatusChanged { status, .. } => {
                self.status = status.clone();
            }
        }
        if event.at > self.updated_at {
            self.updated_at = event.at;
        }
        Ok(self)
    }

    /// State of a bucket entry, which is complete in a single event
    pub fn from_entry(event: &ArchiveEvent) -> Option<Self> {
        match &event.body {
            EventBody::Logged { entry_id, fields } => {
                Some(Self::created(entry_id.clone(), event.at, fields.clone()))
            }
            _ => None,
        }
    }
}

/// Order events for replay: the creation event first, then by recorded time
///
/// The sort is stable, so events sharing a timestamp keep their file order.
pub fn order_for_replay(events: &mut [ArchiveEvent]) {
    events.sort_by_key(|e| (!matches!(e.body, EventBody::Created { .. }), e.at));
}

/// Fold an entity's events into its final state
pub fn fold(id: &str, events: &[ArchiveEvent]) -> Result<EntityState, FoldError> {
    let mut ordered = events.to_vec();
    order_for_replay(&mut ordered);

    let mut iter = ordered.iter();
    let first = iter.next().ok_or_else(|| FoldError::Empty(id.to_string()))?;
    let EventBody::Created { fields } = &first.body else {
        return Err(FoldError::MissingCreation(id.to_string()));
    };

    iter.try_fold(EntityState::created(id, first.at, fields.clone()), |state, event| {
        state.apply(event)
    })
}

#[cfg(test)]
#[path = "entity_tests.rs"]
mod tests;
