// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ephemeral entities (sessions, role grants, tokens, pending approvals)
//!
//! Their live set is tracked as a current-state snapshot plus an event log.
//! Replaying the log through [`LiveSet::apply`] reproduces the snapshot.

use crate::category::EphemeralClass;
use crate::event::{parse_timestamp, Fields};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Payload key holding the owning account (or request) id
pub const OWNER_KEY: &str = "owner_id";
/// Payload key holding the RFC 3339 expiry
pub const EXPIRES_KEY: &str = "expires_at";

/// State transition of an ephemeral entity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Created,
    Updated,
    Approved,
    Rejected,
    Revoked,
    Expired,
    Deleted,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Created => "created",
            Transition::Updated => "updated",
            Transition::Approved => "approved",
            Transition::Rejected => "rejected",
            Transition::Revoked => "revoked",
            Transition::Expired => "expired",
            Transition::Deleted => "deleted",
        }
    }

    /// Whether the entity leaves the live set
    pub fn is_terminal(self) -> bool {
        !matches!(self, Transition::Created | Transition::Updated)
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live ephemeral entity, as held by snapshots and relational rows
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EphemeralRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: Fields,
}

impl EphemeralRecord {
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            owner_id: None,
            created_at,
            expires_at: None,
            attrs: Fields::new(),
        }
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }

    pub fn is_live(&self, now: &DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expires| expires > *now)
    }

    /// Merge an event payload into the record
    ///
    /// `owner_id` and `expires_at` are lifted out of the payload; a `null`
    /// value clears the corresponding field. An `expires_at` that is not an
    /// RFC 3339 timestamp is logged and the previous expiry kept.
    pub fn merge_payload(&mut self, payload: &Value) {
        let Value::Object(map) = payload else {
            return;
        };
        for (key, value) in map {
            match key.as_str() {
                OWNER_KEY => self.owner_id = value.as_str().map(str::to_string),
                EXPIRES_KEY => match value {
                    Value::Null => self.expires_at = None,
                    Value::String(text) => match parse_timestamp(text) {
                        Ok(at) => self.expires_at = Some(at),
                        Err(e) => {
                            tracing::warn!(id = %self.id, value = %text, error = %e, "ignoring malformed expiry");
                        }
                    },
                    other => {
                        tracing::warn!(id = %self.id, value = %other, "ignoring malformed expiry");
                    }
                },
                _ if value.is_null() => {
                    self.attrs.remove(key);
                }
                _ => {
                    self.attrs.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Payload that recreates this record through a `created` transition
    pub fn to_payload(&self) -> Value {
        let mut map: serde_json::Map<String, Value> = self
            .attrs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(owner) = &self.owner_id {
            map.insert(OWNER_KEY.to_string(), Value::String(owner.clone()));
        }
        if let Some(expires) = &self.expires_at {
            map.insert(
                EXPIRES_KEY.to_string(),
                Value::String(crate::event::format_timestamp(expires)),
            );
        }
        Value::Object(map)
    }
}

/// One recorded state transition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EphemeralEvent {
    pub class: EphemeralClass,
    pub entity_id: String,
    pub transition: Transition,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub payload: Value,
}

/// Live entities of one class, keyed by id
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LiveSet {
    records: BTreeMap<String, EphemeralRecord>,
}

impl LiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = EphemeralRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.id.clone(), r)).collect(),
        }
    }

    /// Apply a transition to the set
    pub fn apply(&mut self, event: &EphemeralEvent) {
        match event.transition {
            Transition::Created => {
                let mut record = EphemeralRecord::new(event.entity_id.clone(), event.at);
                record.merge_payload(&event.payload);
                self.records.insert(record.id.clone(), record);
            }
            Transition::Updated => {
                // An update for an unknown id means its creation predates the log
                let record = self
                    .records
                    .entry(event.entity_id.clone())
                    .or_insert_with(|| EphemeralRecord::new(event.entity_id.clone(), event.at));
                record.merge_payload(&event.payload);
            }
            _ => {
                self.records.remove(&event.entity_id);
            }
        }
    }

    /// Replay events in order from an empty set
    pub fn replay<'a>(events: impl IntoIterator<Item = &'a EphemeralEvent>) -> Self {
        let mut set = Self::new();
        for event in events {
            set.apply(event);
        }
        set
    }

    pub fn get(&self, id: &str) -> Option<&EphemeralRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every record, ordered by id
    pub fn into_records(self) -> Vec<EphemeralRecord> {
        self.records.into_values().collect()
    }
}

#[cfg(test)]
#[path = "ephemeral_tests.rs"]
mod tests;
