// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Relational store (SQLite)
//!
//! A derived, disposable projection of the archive. Durable categories get one
//! table each with their promoted columns; anything else an entity carries is
//! kept as a JSON `attrs` column. Every durable row remembers the archive file
//! it came from so orphans can be detected.

use ark_core::event::{format_timestamp, parse_timestamp};
use ark_core::{Category, EntityState, EphemeralClass, EphemeralRecord, Fields};
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

const SCHEMA_VERSION: i64 = 1;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const FIXED_COLUMNS: [&str; 4] = ["id", "status", "created_at", "updated_at"];
const EPHEMERAL_COLUMNS: &str = "id, owner_id, created_at, expires_at, attrs";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("failed to prepare store directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported schema version {0}")]
    VersionMismatch(i64),
    #[error("target store is not empty ({rows} rows in {table})")]
    NonEmptyTarget { table: String, rows: u64 },
    #[error("invalid {category} row {id}: {reason}")]
    InvalidRow {
        category: Category,
        id: String,
        reason: String,
    },
    #[error("corrupt value in {table}: {reason}")]
    Corrupt { table: String, reason: String },
    #[error("relational store {0} is unavailable")]
    Unavailable(PathBuf),
}

/// One durable row with its archive provenance
#[derive(Debug, Clone, PartialEq)]
pub struct DurableRow {
    pub category: Category,
    pub state: EntityState,
    /// Archive-relative path of the record the row was derived from
    pub archive_path: PathBuf,
}

/// A row whose reference column names an id its parent table lacks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DanglingReference {
    pub id: String,
    pub column: &'static str,
    pub parent: Category,
    pub value: String,
}

/// Outcome of an integrity check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Integrity {
    Healthy,
    /// No store file exists
    Missing,
    Corrupt(Vec<String>),
}

impl StoreError {
    /// Whether the store refused one row (constraint or shape) rather than failing
    pub fn is_rejection(&self) -> bool {
        match self {
            StoreError::InvalidRow { .. } => true,
            StoreError::Db(rusqlite::Error::SqliteFailure(err, _)) => {
                err.code == rusqlite::ErrorCode::ConstraintViolation
            }
            _ => false,
        }
    }
}

impl Integrity {
    pub fn needs_heal(&self) -> bool {
        !matches!(self, Integrity::Healthy)
    }
}

/// SQLite-backed relational store
pub struct RelationalStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl RelationalStore {
    /// Open (creating if needed) a store and ensure its schema
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let mut conn = Connection::open_with_flags(path, flags)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch("PRAGMA journal_mode = wal;")?;
        conn.execute_batch("PRAGMA synchronous = full;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        initialize_schema(&mut conn)?;
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    /// Open an existing store without write access or schema changes
    pub fn open_read_only(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Checkpoint the WAL and close, leaving a single self-contained file
    pub fn close(self) -> Result<(), StoreError> {
        let conn = self.conn.into_inner().unwrap_or_else(PoisonError::into_inner);
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        conn.close().map_err(|(_, e)| StoreError::Db(e))
    }

    /// Toggle foreign key enforcement; must not be called inside a transaction
    pub fn set_foreign_keys(&self, enabled: bool) -> Result<(), StoreError> {
        let value = if enabled { "ON" } else { "OFF" };
        self.conn()
            .execute_batch(&format!("PRAGMA foreign_keys = {value};"))?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` inside one transaction, committing only on success
    pub fn with_transaction<T, E>(
        &self,
        f: impl FnOnce(&StoreTx<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(StoreError::from)?;
        let wrapped = StoreTx { conn: &tx };
        let value = f(&wrapped)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }

    pub fn insert_entity(
        &self,
        category: Category,
        state: &EntityState,
        archive_path: &Path,
    ) -> Result<(), StoreError> {
        write_entity(&self.conn(), category, state, archive_path, false)
    }

    /// Insert or replace the row of an existing entity
    pub fn upsert_entity(
        &self,
        category: Category,
        state: &EntityState,
        archive_path: &Path,
    ) -> Result<(), StoreError> {
        write_entity(&self.conn(), category, state, archive_path, true)
    }

    pub fn get_entity(&self, category: Category, id: &str) -> Result<Option<DurableRow>, StoreError> {
        read_entity(&self.conn(), category, id)
    }

    /// Every row of a category, ordered by id
    pub fn list_entities(&self, category: Category) -> Result<Vec<DurableRow>, StoreError> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM {} ORDER BY id",
            durable_column_list(category),
            category.table()
        );
        let mut stmt = conn.prepare(&sql)?;
        let width = durable_width(category);
        let raw = stmt
            .query_map([], |row| read_values(row, width))?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter()
            .map(|values| decode_durable(category, values))
            .collect()
    }

    /// `(id, archive_path)` of every row of a category
    pub fn archive_refs(&self, category: Category) -> Result<Vec<(String, PathBuf)>, StoreError> {
        let conn = self.conn();
        let sql = format!("SELECT id, archive_path FROM {} ORDER BY id", category.table());
        let mut stmt = conn.prepare(&sql)?;
        let refs = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, PathBuf::from(row.get::<_, String>(1)?)))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(refs)
    }

    /// Rows of `category` referencing parent ids that have no row
    pub fn dangling_references(&self, category: Category) -> Result<Vec<DanglingReference>, StoreError> {
        let conn = self.conn();
        let mut dangling = Vec::new();
        for column in category.columns() {
            let Some(parent) = column.references else {
                continue;
            };
            let sql = format!(
                "SELECT c.id, c.{col} FROM {table} c
                 WHERE c.{col} IS NOT NULL
                   AND NOT EXISTS (SELECT 1 FROM {parent} p WHERE p.id = c.{col})
                 ORDER BY c.id",
                col = column.name,
                table = category.table(),
                parent = parent.table(),
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            dangling.extend(rows.into_iter().map(|(id, value)| DanglingReference {
                id,
                column: column.name,
                parent,
                value,
            }));
        }
        Ok(dangling)
    }

    pub fn upsert_ephemeral(&self, class: EphemeralClass, record: &EphemeralRecord) -> Result<(), StoreError> {
        write_ephemeral(&self.conn(), class, record)
    }

    /// Remove an ephemeral row; returns whether it existed
    pub fn delete_ephemeral(&self, class: EphemeralClass, id: &str) -> Result<bool, StoreError> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", class.table());
        Ok(self.conn().execute(&sql, params![id])? > 0)
    }

    pub fn get_ephemeral(&self, class: EphemeralClass, id: &str) -> Result<Option<EphemeralRecord>, StoreError> {
        let conn = self.conn();
        let sql = format!("SELECT {EPHEMERAL_COLUMNS} FROM {} WHERE id = ?1", class.table());
        let raw = conn
            .query_row(&sql, params![id], |row| read_values(row, 5))
            .optional()?;
        raw.map(|values| decode_ephemeral(class, values)).transpose()
    }

    /// Every row of an ephemeral class, ordered by id
    pub fn list_ephemeral(&self, class: EphemeralClass) -> Result<Vec<EphemeralRecord>, StoreError> {
        let conn = self.conn();
        let sql = format!("SELECT {EPHEMERAL_COLUMNS} FROM {} ORDER BY id", class.table());
        let mut stmt = conn.prepare(&sql)?;
        let raw = stmt
            .query_map([], |row| read_values(row, 5))?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter()
            .map(|values| decode_ephemeral(class, values))
            .collect()
    }

    /// Row count of one table
    pub fn count(&self, table: &str) -> Result<u64, StoreError> {
        if !table_names().any(|known| known == table) {
            return Err(StoreError::Corrupt {
                table: table.to_string(),
                reason: "unknown table".to_string(),
            });
        }
        let rows: i64 = self
            .conn()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(u64::try_from(rows).unwrap_or(0))
    }

    /// Row counts keyed by table name
    pub fn counts(&self) -> Result<BTreeMap<String, u64>, StoreError> {
        table_names()
            .map(|table| Ok((table.to_string(), self.count(table)?)))
            .collect()
    }

    /// Fail with [`StoreError::NonEmptyTarget`] if any table holds rows
    pub fn ensure_empty(&self) -> Result<(), StoreError> {
        match self.counts()?.into_iter().find(|(_, rows)| *rows > 0) {
            Some((table, rows)) => Err(StoreError::NonEmptyTarget { table, rows }),
            None => Ok(()),
        }
    }

    /// Run SQLite's quick integrity check and confirm the schema is present
    pub fn integrity(&self) -> Result<Integrity, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("PRAGMA quick_check")?;
        let problems: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|line| line != "ok")
            .collect();
        if !problems.is_empty() {
            return Ok(Integrity::Corrupt(problems));
        }

        let mut missing = Vec::new();
        for table in table_names() {
            let found: Option<String> = conn
                .query_row(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    params![table],
                    |row| row.get(0),
                )
                .optional()?;
            if found.is_none() {
                missing.push(format!("missing table {table}"));
            }
        }
        if missing.is_empty() {
            Ok(Integrity::Healthy)
        } else {
            Ok(Integrity::Corrupt(missing))
        }
    }
}

/// Inspect a store file without creating or modifying it
///
/// Any failure to open or query the file counts as corruption.
pub fn inspect(path: &Path) -> Integrity {
    if !path.exists() {
        return Integrity::Missing;
    }
    match RelationalStore::open_read_only(path).and_then(|store| store.integrity()) {
        Ok(integrity) => integrity,
        Err(e) => Integrity::Corrupt(vec![e.to_string()]),
    }
}

/// Writes scoped to one open transaction
pub struct StoreTx<'a> {
    conn: &'a Connection,
}

impl StoreTx<'_> {
    pub fn get_entity(&self, category: Category, id: &str) -> Result<Option<DurableRow>, StoreError> {
        read_entity(self.conn, category, id)
    }

    pub fn insert_entity(
        &self,
        category: Category,
        state: &EntityState,
        archive_path: &Path,
    ) -> Result<(), StoreError> {
        write_entity(self.conn, category, state, archive_path, false)
    }

    pub fn upsert_entity(
        &self,
        category: Category,
        state: &EntityState,
        archive_path: &Path,
    ) -> Result<(), StoreError> {
        write_entity(self.conn, category, state, archive_path, true)
    }

    pub fn upsert_ephemeral(&self, class: EphemeralClass, record: &EphemeralRecord) -> Result<(), StoreError> {
        write_ephemeral(self.conn, class, record)
    }
}

fn initialize_schema(conn: &mut Connection) -> Result<(), StoreError> {
    let tx = conn.transaction()?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", [], |row| row.get(0))
        .optional()?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])?;
            tx.execute_batch(&schema_sql())?;
        }
        Some(SCHEMA_VERSION) => {}
        Some(other) => return Err(StoreError::VersionMismatch(other)),
    }
    tx.commit()?;
    Ok(())
}

fn schema_sql() -> String {
    let mut sql = String::new();
    for category in Category::ALL {
        let mut defs: Vec<String> = vec![
            "id TEXT PRIMARY KEY".into(),
            "status TEXT NOT NULL".into(),
            "created_at TEXT NOT NULL".into(),
            "updated_at TEXT NOT NULL".into(),
        ];
        for column in category.columns() {
            let mut def = format!("{} TEXT", column.name);
            if column.required {
                def.push_str(" NOT NULL");
            }
            if let Some(parent) = column.references {
                def.push_str(&format!(" REFERENCES {}(id)", parent.table()));
            }
            defs.push(def);
        }
        defs.push("attrs TEXT NOT NULL".into());
        defs.push("archive_path TEXT NOT NULL".into());
        sql.push_str(&format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);\n",
            category.table(),
            defs.join(",\n    ")
        ));
    }
    for class in EphemeralClass::ALL {
        sql.push_str(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
    id TEXT PRIMARY KEY,
    owner_id TEXT,
    created_at TEXT NOT NULL,
    expires_at TEXT,
    attrs TEXT NOT NULL
);\n",
            class.table()
        ));
    }
    sql
}

/// Every table the schema defines, durable categories first
pub fn table_names() -> impl Iterator<Item = &'static str> {
    Category::ALL
        .into_iter()
        .map(Category::table)
        .chain(EphemeralClass::ALL.into_iter().map(EphemeralClass::table))
}

fn durable_names(category: Category) -> Vec<&'static str> {
    let mut names: Vec<&'static str> = FIXED_COLUMNS.to_vec();
    names.extend(category.columns().iter().map(|c| c.name));
    names.push("attrs");
    names.push("archive_path");
    names
}

fn durable_column_list(category: Category) -> String {
    durable_names(category).join(", ")
}

fn durable_width(category: Category) -> usize {
    FIXED_COLUMNS.len() + category.columns().len() + 2
}

fn read_values(row: &rusqlite::Row<'_>, width: usize) -> rusqlite::Result<Vec<Option<String>>> {
    (0..width).map(|i| row.get(i)).collect()
}

/// Check that an entity maps onto its category's columns
pub fn check_row(category: Category, state: &EntityState) -> Result<(), StoreError> {
    row_values(category, state, Path::new("")).map(|_| ())
}

fn row_values(
    category: Category,
    state: &EntityState,
    archive_path: &Path,
) -> Result<Vec<Option<String>>, StoreError> {
    let invalid = |reason: String| StoreError::InvalidRow {
        category,
        id: state.id.clone(),
        reason,
    };

    let mut attrs = state.fields.clone();
    let mut values: Vec<Option<String>> = vec![
        Some(state.id.clone()),
        Some(state.status.clone()),
        Some(format_timestamp(&state.created_at)),
        Some(format_timestamp(&state.updated_at)),
    ];
    for column in category.columns() {
        let value = match attrs.remove(column.name) {
            Some(Value::String(s)) => Some(s),
            None | Some(Value::Null) => None,
            Some(other) => return Err(invalid(format!("{} must be a string, got {other}", column.name))),
        };
        if column.required && value.is_none() {
            return Err(invalid(format!("missing required field {}", column.name)));
        }
        values.push(value);
    }
    let attrs = serde_json::to_string(&attrs).map_err(|e| invalid(e.to_string()))?;
    values.push(Some(attrs));
    values.push(Some(archive_path.to_string_lossy().into_owned()));
    Ok(values)
}

fn read_entity(conn: &Connection, category: Category, id: &str) -> Result<Option<DurableRow>, StoreError> {
    let sql = format!(
        "SELECT {} FROM {} WHERE id = ?1",
        durable_column_list(category),
        category.table()
    );
    let raw: Option<Vec<Option<String>>> = conn
        .query_row(&sql, params![id], |row| read_values(row, durable_width(category)))
        .optional()?;
    raw.map(|values| decode_durable(category, values)).transpose()
}

fn write_entity(
    conn: &Connection,
    category: Category,
    state: &EntityState,
    archive_path: &Path,
    upsert: bool,
) -> Result<(), StoreError> {
    let values = row_values(category, state, archive_path)?;
    let names = durable_names(category);
    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        category.table(),
        names.join(", "),
        placeholders.join(", ")
    );
    if upsert {
        let updates: Vec<String> = names[1..]
            .iter()
            .map(|name| format!("{name} = excluded.{name}"))
            .collect();
        sql.push_str(&format!(" ON CONFLICT(id) DO UPDATE SET {}", updates.join(", ")));
    }
    conn.execute(&sql, params_from_iter(values.iter()))?;
    Ok(())
}

fn decode_durable(category: Category, values: Vec<Option<String>>) -> Result<DurableRow, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        table: category.table().to_string(),
        reason,
    };
    let mut values = values.into_iter();
    let mut next = || values.next().flatten();

    let id = next().ok_or_else(|| corrupt("null id".into()))?;
    let status = next().ok_or_else(|| corrupt(format!("{id}: null status")))?;
    let created_at = decode_time(next(), &id).map_err(corrupt)?;
    let updated_at = decode_time(next(), &id).map_err(corrupt)?;

    let mut columns = Vec::new();
    for column in category.columns() {
        columns.push((column.name, next()));
    }
    let mut fields: Fields = match next() {
        Some(text) => serde_json::from_str(&text).map_err(|e| corrupt(format!("{id}: attrs: {e}")))?,
        None => Fields::new(),
    };
    for (name, value) in columns {
        if let Some(value) = value {
            fields.insert(name.to_string(), Value::String(value));
        }
    }
    let archive_path = PathBuf::from(next().unwrap_or_default());

    Ok(DurableRow {
        category,
        state: EntityState {
            id,
            status,
            created_at,
            updated_at,
            fields,
        },
        archive_path,
    })
}

fn decode_time(
    text: Option<String>,
    id: &str,
) -> Result<chrono::DateTime<chrono::Utc>, String> {
    let text = text.ok_or_else(|| format!("{id}: null timestamp"))?;
    parse_timestamp(&text).map_err(|e| format!("{id}: {e}"))
}

fn write_ephemeral(
    conn: &Connection,
    class: EphemeralClass,
    record: &EphemeralRecord,
) -> Result<(), StoreError> {
    let attrs = serde_json::to_string(&record.attrs).map_err(|e| StoreError::Corrupt {
        table: class.table().to_string(),
        reason: e.to_string(),
    })?;
    let sql = format!(
        "INSERT INTO {} ({EPHEMERAL_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET owner_id = excluded.owner_id,
             created_at = excluded.created_at, expires_at = excluded.expires_at,
             attrs = excluded.attrs",
        class.table()
    );
    conn.execute(
        &sql,
        params![
            record.id,
            record.owner_id,
            format_timestamp(&record.created_at),
            record.expires_at.as_ref().map(format_timestamp),
            attrs,
        ],
    )?;
    Ok(())
}

fn decode_ephemeral(class: EphemeralClass, values: Vec<Option<String>>) -> Result<EphemeralRecord, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        table: class.table().to_string(),
        reason,
    };
    let mut values = values.into_iter();
    let mut next = || values.next().flatten();

    let id = next().ok_or_else(|| corrupt("null id".into()))?;
    let owner_id = next();
    let created_at = decode_time(next(), &id).map_err(corrupt)?;
    let expires_at = match next() {
        Some(text) => Some(parse_timestamp(&text).map_err(|e| corrupt(format!("{id}: {e}")))?),
        None => None,
    };
    let attrs = match next() {
        Some(text) => serde_json::from_str(&text).map_err(|e| corrupt(format!("{id}: attrs: {e}")))?,
        None => Fields::new(),
    };
    Ok(EphemeralRecord {
        id,
        owner_id,
        created_at,
        expires_at,
        attrs,
    })
}

#[cfg(test)]
#[path = "relational_tests.rs"]
mod tests;
