#![forbid(unsafe_code)]

mod sql;

use super::super::StoreError;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::collections::BTreeSet;

const SCHEMA_VERSION: &str = "1";

const REQUIRED_TABLES: [&str; 6] = [
    "meta",
    "counters",
    "proposals",
    "jobs",
    "rollback_jobs",
    "audit_events",
];

pub(in crate::store) fn install_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(&sql::full_schema_sql())?;
    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
        params!["schema_version", SCHEMA_VERSION],
    )?;
    Ok(())
}

/// Fails closed when the database was written by an unknown schema or lost a table.
pub(in crate::store) fn preflight_gate(conn: &Connection) -> Result<(), StoreError> {
    let tables = table_names(conn)?;
    for table in REQUIRED_TABLES {
        if !tables.contains(table) {
            return Err(StoreError::SchemaMissing(table));
        }
    }

    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key='schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    if version.as_deref() != Some(SCHEMA_VERSION) {
        return Err(StoreError::SchemaMissing("meta.schema_version"));
    }
    Ok(())
}

pub(in crate::store) fn fleet_install_schema_tx(tx: &Transaction<'_>) -> Result<(), StoreError> {
    tx.execute_batch(sql::fleet_schema_sql())?;
    Ok(())
}

pub(in crate::store) fn require_fleet_table(
    conn: &Connection,
    table: &'static str,
) -> Result<(), StoreError> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1",
            params![table],
            |row| row.get(0),
        )
        .optional()?;
    match exists {
        Some(_) => Ok(()),
        None => Err(StoreError::SchemaMissing(table)),
    }
}

fn table_names(conn: &Connection) -> Result<BTreeSet<String>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
    )?;
    let mut rows = stmt.query([])?;
    let mut tables = BTreeSet::new();
    while let Some(row) = rows.next()? {
        tables.insert(row.get::<_, String>(0)?);
    }
    Ok(tables)
}
