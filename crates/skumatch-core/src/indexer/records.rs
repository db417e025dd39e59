//! Turn raw tables and store rows into typed match records.

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::ColumnAliases;
use crate::errors::{ReconcileError, ReconcileResult};
use crate::models::{CatalogEntry, ExternalRecord, StoredProduct};
use crate::tabular::RowTable;

/// Header positions of the input columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedColumns {
    pub code: usize,
    pub name: usize,
    pub kind: Option<usize>,
}

pub fn resolve_columns(table: &RowTable, aliases: &ColumnAliases) -> ReconcileResult<ResolvedColumns> {
    let code = table.find_column(&aliases.code).ok_or_else(|| {
        ReconcileError::Config(format!(
            "code column not found (tried {:?}, headers {:?})",
            aliases.code, table.headers
        ))
    })?;
    let name = table.find_column(&aliases.name).ok_or_else(|| {
        ReconcileError::Config(format!(
            "name column not found (tried {:?}, headers {:?})",
            aliases.name, table.headers
        ))
    })?;
    let kind = table.find_column(&aliases.kind);
    debug!(code, name, ?kind, "resolved input columns");
    Ok(ResolvedColumns { code, name, kind })
}

/// One record per data row, blank rows included so row numbers stay aligned.
pub fn load_external_records(
    table: &RowTable,
    aliases: &ColumnAliases,
) -> ReconcileResult<Vec<ExternalRecord>> {
    if table.is_empty() {
        return Err(ReconcileError::Config("input has no data rows".to_string()));
    }
    let columns = resolve_columns(table, aliases)?;
    Ok((0..table.rows.len())
        .map(|i| {
            ExternalRecord::new(
                RowTable::line_number(i),
                table.cell(i, columns.code),
                table.cell(i, columns.name),
                columns.kind.map(|k| table.cell(i, k)).unwrap_or(""),
            )
        })
        .collect())
}

pub fn build_catalog(products: &[StoredProduct]) -> Vec<CatalogEntry> {
    products.iter().map(CatalogEntry::from_stored).collect()
}

/// SHA-256 over the header and every cell, so two runs can be tied to the
/// same input.
pub fn input_digest(table: &RowTable) -> String {
    let mut hasher = Sha256::new();
    for row in std::iter::once(&table.headers).chain(table.rows.iter()) {
        for cell in row {
            hasher.update(cell.as_bytes());
            hasher.update([0x1f]);
        }
        hasher.update([b'\n']);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HeadSource;

    fn table(headers: &[&str], rows: &[&[&str]]) -> RowTable {
        RowTable::new(
            headers.iter().map(|s| s.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
            b',',
        )
    }

    #[test]
    fn test_load_records_with_russian_headers() {
        let t = table(
            &["\u{feff}Код", "Наименование", "Тип"],
            &[&["X1", "A100 white", "shelf"], &["", "", ""], &["Z9", "", ""]],
        );
        let records = load_external_records(&t, &ColumnAliases::default()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].row, 2);
        assert_eq!(records[0].kind_raw, "shelf");
        assert!(records[1].is_blank());
        assert_eq!(records[2].row, 4);
        assert_eq!(records[2].head_source, HeadSource::Identifier);
    }

    #[test]
    fn test_user_columns_take_priority() {
        let t = table(&["code", "sku", "name"], &[&["A", "B", "n"]]);
        let mut aliases = ColumnAliases::default();
        aliases.prefer(Some("SKU"), None, None);
        let cols = resolve_columns(&t, &aliases).unwrap();
        assert_eq!(cols.code, 1);
        assert_eq!(cols.kind, None);
    }

    #[test]
    fn test_missing_columns_and_empty_input_are_config_errors() {
        let no_name = table(&["code", "price"], &[&["A", "1"]]);
        assert!(load_external_records(&no_name, &ColumnAliases::default())
            .unwrap_err()
            .is_config());

        let empty = table(&["code", "name"], &[]);
        assert!(load_external_records(&empty, &ColumnAliases::default())
            .unwrap_err()
            .is_config());
    }

    #[test]
    fn test_input_digest_tracks_content() {
        let a = table(&["code", "name"], &[&["A", "x"]]);
        let b = table(&["code", "name"], &[&["A", "y"]]);
        let c = table(&["code", "name"], &[&["Ax", ""]]);
        assert_eq!(input_digest(&a), input_digest(&a.clone()));
        assert_ne!(input_digest(&a), input_digest(&b));
        assert_ne!(input_digest(&a), input_digest(&c));
        assert_eq!(input_digest(&a).len(), 64);
    }
}
