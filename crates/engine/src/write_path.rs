// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable write path
//!
//! Every durable mutation is archived before its relational row changes. The
//! archive append runs inside the row's transaction, so an archive failure
//! rolls the transaction back and nothing is committed.

use crate::handle::StoreHandle;
use ark_core::{ArchiveEvent, Category, EntityState, EventBody, FoldError};
use ark_storage::{check_row, ArchiveWriteError, ArchiveWriter, DurableRow, StoreError, StoreTx};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Archive(#[from] ArchiveWriteError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Fold(#[from] FoldError),
    #[error("no {category} row for {id}")]
    UnknownEntity { category: Category, id: String },
    #[error("{category} {id} already exists")]
    Duplicate { category: Category, id: String },
    #[error("{category} {id}: {column} references missing {parent} {value}")]
    MissingReference {
        category: Category,
        id: String,
        column: &'static str,
        parent: Category,
        value: String,
    },
}

/// Archives durable events and applies them to the live store
pub struct DurableWriter<'a> {
    writer: &'a ArchiveWriter,
    handle: &'a StoreHandle,
}

impl<'a> DurableWriter<'a> {
    pub fn new(writer: &'a ArchiveWriter, handle: &'a StoreHandle) -> Self {
        Self { writer, handle }
    }

    /// Archive `event` for entity `id` and commit the resulting row
    pub fn record(
        &self,
        category: Category,
        id: &str,
        event: &ArchiveEvent,
    ) -> Result<DurableRow, WriteError> {
        self.handle.with_writes(|store| {
            store.with_transaction(|tx| {
                let (state, is_new) = next_state(tx, category, id, event)?;
                check_row(category, &state)?;
                check_references(tx, category, &state)?;

                let archive_path = self.writer.append(category, id, event)?;
                if is_new {
                    tx.insert_entity(category, &state, &archive_path)?;
                } else {
                    tx.upsert_entity(category, &state, &archive_path)?;
                }
                tracing::debug!(
                    category = %category,
                    id,
                    kind = %event.kind(),
                    path = %archive_path.display(),
                    "durable write committed"
                );
                Ok(DurableRow {
                    category,
                    state,
                    archive_path,
                })
            })
        })
    }
}

/// State after `event`, and whether it introduces a new row
fn next_state(
    tx: &StoreTx<'_>,
    category: Category,
    id: &str,
    event: &ArchiveEvent,
) -> Result<(EntityState, bool), WriteError> {
    let duplicate = || WriteError::Duplicate {
        category,
        id: id.to_string(),
    };
    match &event.body {
        EventBody::Created { fields } => {
            if tx.get_entity(category, id)?.is_some() {
                return Err(duplicate());
            }
            Ok((EntityState::created(id, event.at, fields.clone()), true))
        }
        EventBody::Logged { entry_id, fields } => {
            if tx.get_entity(category, entry_id)?.is_some() {
                return Err(duplicate());
            }
            Ok((EntityState::created(entry_id.as_str(), event.at, fields.clone()), true))
        }
        EventBody::Updated { .. } | EventBody::StatusChanged { .. } => {
            let row = tx
                .get_entity(category, id)?
                .ok_or_else(|| WriteError::UnknownEntity {
                    category,
                    id: id.to_string(),
                })?;
            Ok((row.state.apply(event)?, false))
        }
    }
}

fn check_references(tx: &StoreTx<'_>, category: Category, state: &EntityState) -> Result<(), WriteError> {
    for column in category.columns() {
        let Some(parent) = column.references else {
            continue;
        };
        let Some(Value::String(value)) = state.fields.get(column.name) else {
            continue;
        };
        if tx.get_entity(parent, value)?.is_none() {
            return Err(WriteError::MissingReference {
                category,
                id: state.id.clone(),
                column: column.name,
                parent,
                value: value.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "write_path_tests.rs"]
mod tests;
