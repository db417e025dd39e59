//! SQLite catalog store.
//!
//! Table and column names come from [`StoreSettings`] and are validated as
//! plain identifiers before being spliced into SQL; values always travel as
//! bound parameters.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::config::StoreSettings;
use crate::errors::{ReconcileError, ReconcileResult};
use crate::models::{EntryId, StoredProduct};
use crate::store::schema;
use crate::store::{CatalogStore, IdentifierWriter};

// ---------------------------------------------------------------------------
// Helper: tilde expansion
// ---------------------------------------------------------------------------

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if text == "~" || text.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if text.len() > 2 {
                expanded.push(&text[2..]);
            }
            return expanded;
        }
    }
    path.to_path_buf()
}

// ---------------------------------------------------------------------------
// SqliteCatalogStore
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SqliteCatalogStore {
    conn: Connection,
    settings: StoreSettings,
}

impl SqliteCatalogStore {
    pub fn open(path: &Path, settings: StoreSettings) -> ReconcileResult<Self> {
        settings.validate()?;
        let resolved = expand_tilde(path);
        if !resolved.exists() {
            return Err(ReconcileError::Config(format!(
                "database not found: {}",
                resolved.display()
            )));
        }
        let conn = Connection::open(&resolved)?;
        debug!(path = %resolved.display(), table = %settings.table, "opened catalog database");
        Ok(Self { conn, settings })
    }

    /// Open (creating if needed) and make sure the products table exists.
    pub fn create(path: &Path, settings: StoreSettings) -> ReconcileResult<Self> {
        settings.validate()?;
        let resolved = expand_tilde(path);
        if let Some(parent) = resolved.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&resolved)?;
        schema::init_schema(&conn, &settings)?;
        Ok(Self { conn, settings })
    }

    pub fn open_in_memory(settings: StoreSettings) -> ReconcileResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::init_schema(&conn, &settings)?;
        Ok(Self { conn, settings })
    }

    pub fn insert_product(&self, name: &str, identifier: &str) -> ReconcileResult<EntryId> {
        let StoreSettings {
            table,
            name_column,
            identifier_column,
            ..
        } = &self.settings;
        self.conn.execute(
            &format!("INSERT INTO {table} ({name_column}, {identifier_column}) VALUES (?1, ?2);"),
            params![name, identifier],
        )?;
        Ok(EntryId(self.conn.last_insert_rowid()))
    }
}

/// Writer bound to an open rusqlite transaction.
struct SqliteWriter<'a> {
    conn: &'a Connection,
    settings: &'a StoreSettings,
}

impl IdentifierWriter for SqliteWriter<'_> {
    fn update_identifier(&mut self, id: EntryId, value: &str) -> ReconcileResult<()> {
        let StoreSettings {
            table,
            id_column,
            identifier_column,
            ..
        } = self.settings;
        let changed = self.conn.execute(
            &format!("UPDATE {table} SET {identifier_column} = ?1 WHERE {id_column} = ?2;"),
            params![value, id.0],
        )?;
        if changed == 0 {
            return Err(ReconcileError::Store(format!("entry {id} not found")));
        }
        Ok(())
    }

    fn find_owner(&mut self, identifier: &str, excluding: EntryId) -> ReconcileResult<Option<EntryId>> {
        let StoreSettings {
            table,
            id_column,
            identifier_column,
            ..
        } = self.settings;
        let owner: Option<i64> = self
            .conn
            .query_row(
                &format!(
                    "SELECT {id_column} FROM {table} \
                     WHERE TRIM({identifier_column}) = ?1 AND {id_column} != ?2 \
                     ORDER BY {id_column} LIMIT 1;"
                ),
                params![identifier, excluding.0],
                |row| row.get(0),
            )
            .optional()?;
        Ok(owner.map(EntryId))
    }
}

impl CatalogStore for SqliteCatalogStore {
    fn fetch_all(&self) -> ReconcileResult<Vec<StoredProduct>> {
        let StoreSettings {
            table,
            id_column,
            name_column,
            identifier_column,
        } = &self.settings;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {id_column}, COALESCE({name_column}, ''), \
             COALESCE(CAST({identifier_column} AS TEXT), '') \
             FROM {table} ORDER BY {id_column};"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(StoredProduct {
                id: EntryId(row.get(0)?),
                name: row.get(1)?,
                current_identifier: row.get(2)?,
            })
        })?;
        let mut products = Vec::new();
        for row in rows {
            products.push(row?);
        }
        debug!(count = products.len(), "fetched catalog snapshot");
        Ok(products)
    }

    fn with_transaction(
        &mut self,
        work: &mut dyn FnMut(&mut dyn IdentifierWriter) -> ReconcileResult<()>,
    ) -> ReconcileResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut writer = SqliteWriter {
                conn: &tx,
                settings: &self.settings,
            };
            // Dropping `tx` on error rolls back.
            work(&mut writer)?;
        }
        tx.commit()?;
        Ok(())
    }
}
