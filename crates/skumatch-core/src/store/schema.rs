//! SQLite DDL for the catalog table used by local runs and tests.
//!
//! Production catalogs are owned by another application; this only creates
//! the configured table when it does not exist yet.

use rusqlite::Connection;

use crate::config::StoreSettings;
use crate::errors::ReconcileResult;

/// CREATE statements for the configured products table and its identifier
/// index. Safe to replay.
pub fn schema_statements(settings: &StoreSettings) -> ReconcileResult<Vec<String>> {
    settings.validate()?;
    let StoreSettings {
        table,
        id_column,
        name_column,
        identifier_column,
    } = settings;
    Ok(vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                {id_column} INTEGER PRIMARY KEY AUTOINCREMENT,
                {name_column} TEXT NOT NULL DEFAULT '',
                {identifier_column} TEXT NOT NULL DEFAULT ''
            );"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_{identifier_column} \
             ON {table}({identifier_column});"
        ),
    ])
}

pub fn init_schema(conn: &Connection, settings: &StoreSettings) -> ReconcileResult<()> {
    for stmt in schema_statements(settings)? {
        conn.execute_batch(&stmt)?;
    }
    Ok(())
}
