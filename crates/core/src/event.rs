// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle events recorded in durable archives

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Attribute map carried by entity events
pub type Fields = BTreeMap<String, Value>;

/// Errors decoding an event payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("unknown event kind: {0}")]
    UnknownKind(String),
    #[error("{kind} payload must be a JSON object")]
    NotAnObject { kind: EventKind },
    #[error("status_changed payload is missing a string `status`")]
    MissingStatus,
    #[error("logged event is missing its entry id")]
    MissingEntryId,
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
}

/// Render a timestamp the way every archive file stores it
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, EventError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| EventError::InvalidTimestamp(text.to_string()))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Updated,
    StatusChanged,
    Logged,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::StatusChanged => "status_changed",
            EventKind::Logged => "logged",
        }
    }

    pub fn parse(name: &str) -> Result<Self, EventError> {
        match name {
            "created" => Ok(EventKind::Created),
            "updated" => Ok(EventKind::Updated),
            "status_changed" => Ok(EventKind::StatusChanged),
            "logged" => Ok(EventKind::Logged),
            other => Err(EventError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum EventBody {
    /// First block of every per-entity record
    Created { fields: Fields },
    /// Field merge; a `null` value removes the field
    Updated { fields: Fields },
    StatusChanged { status: String, note: Option<String> },
    /// Independent entry in a bucket file
    Logged { entry_id: String, fields: Fields },
}

/// One timestamped block of an archive record
#[derive(Clone, Debug, PartialEq)]
pub struct ArchiveEvent {
    pub at: DateTime<Utc>,
    pub body: EventBody,
}

impl ArchiveEvent {
    pub fn created(at: DateTime<Utc>, fields: Fields) -> Self {
        Self {
            at,
            body: EventBody::Created { fields },
        }
    }

    pub fn updated(at: DateTime<Utc>, fields: Fields) -> Self {
        Self {
            at,
            body: EventBody::Updated { fields },
        }
    }

    pub fn status_changed(at: DateTime<Utc>, status: impl Into<String>, note: Option<String>) -> Self {
        Self {
            at,
            body: EventBody::StatusChanged {
                status: status.into(),
                note,
            },
        }
    }

    pub fn logged(at: DateTime<Utc>, entry_id: impl Into<String>, fields: Fields) -> Self {
        Self {
            at,
            body: EventBody::Logged {
                entry_id: entry_id.into(),
                fields,
            },
        }
    }

    pub fn kind(&self) -> EventKind {
        match self.body {
            EventBody::Created { .. } => EventKind::Created,
            EventBody::Updated { .. } => EventKind::Updated,
            EventBody::StatusChanged { .. } => EventKind::StatusChanged,
            EventBody::Logged { .. } => EventKind::Logged,
        }
    }

    /// Entry id for bucket entries
    pub fn entry_id(&self) -> Option<&str> {
        match &self.body {
            EventBody::Logged { entry_id, .. } => Some(entry_id),
            _ => None,
        }
    }

    /// JSON payload written under the block header
    pub fn payload(&self) -> Value {
        match &self.body {
            EventBody::Created { fields }
            | EventBody::Updated { fields }
            | EventBody::Logged { fields, .. } => Value::Object(to_map(fields)),
            EventBody::StatusChanged { status, note } => {
                let mut map = Map::new();
                map.insert("status".to_string(), Value::String(status.clone()));
                if let Some(note) = note {
                    map.insert("note".to_string(), Value::String(note.clone()));
                }
                Value::Object(map)
            }
        }
    }

    /// Rebuild an event from a block header and its payload
    pub fn from_parts(
        kind: EventKind,
        at: DateTime<Utc>,
        entry_id: Option<String>,
        payload: Value,
    ) -> Result<Self, EventError> {
        let Value::Object(map) = payload else {
            return Err(EventError::NotAnObject { kind });
        };
        let body = match kind {
            EventKind::Created => EventBody::Created {
                fields: map.into_iter().collect(),
            },
            EventKind::Updated => EventBody::Updated {
                fields: map.into_iter().collect(),
            },
            EventKind::StatusChanged => {
                let status = map
                    .get("status")
                    .and_then(Value::as_str)
                    .ok_or(EventError::MissingStatus)?
                    .to_string();
                let note = map.get("note").and_then(Value::as_str).map(str::to_string);
                EventBody::StatusChanged { status, note }
            }
            EventKind::Logged => EventBody::Logged {
                entry_id: entry_id.ok_or(EventError::MissingEntryId)?,
                fields: map.into_iter().collect(),
            },
        };
        Ok(Self { at, body })
    }
}

fn to_map(fields: &Fields) -> Map<String, Value> {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
