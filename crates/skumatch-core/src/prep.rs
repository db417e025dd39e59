//! Input preparation: conflict scan, exact dedupe, name cleaning and price
//! merge. None of these touch the store.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use indexmap::{IndexMap, IndexSet};
use regex::Regex;
use serde::Serialize;
use tracing::info;

use crate::config::ColumnAliases;
use crate::errors::{ReconcileError, ReconcileResult};
use crate::indexer::normalize::strip_parentheticals;
use crate::indexer::records::resolve_columns;
use crate::query::guards::{truncate_chars, MAX_JOINED_NAMES_CHARS};
use crate::report::InputRowRef;
use crate::tabular::RowTable;

static DECIMAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$").unwrap());

// ---------------------------------------------------------------------------
// Code conflict scan
// ---------------------------------------------------------------------------

pub const CODE_CONFLICT_HEADERS: &[&str] = &["code", "count", "rows", "names_clean", "names_raw"];

/// One code used for products whose names differ once parentheticals are
/// removed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CodeConflictRow {
    pub code: String,
    pub count: usize,
    pub rows: String,
    pub names_clean: String,
    pub names_raw: String,
}

fn join_sorted(names: BTreeSet<String>) -> String {
    let joined = names.into_iter().collect::<Vec<_>>().join(" | ");
    truncate_chars(&joined, MAX_JOINED_NAMES_CHARS)
}

pub fn scan_code_conflicts(
    table: &RowTable,
    aliases: &ColumnAliases,
) -> ReconcileResult<Vec<CodeConflictRow>> {
    let columns = resolve_columns(table, aliases)?;
    let mut by_code: IndexMap<&str, Vec<(usize, &str)>> = IndexMap::new();
    for i in 0..table.rows.len() {
        let code = table.cell(i, columns.code);
        if code.is_empty() {
            continue;
        }
        by_code
            .entry(code)
            .or_default()
            .push((RowTable::line_number(i), table.cell(i, columns.name)));
    }

    let mut conflicts: Vec<CodeConflictRow> = by_code
        .into_iter()
        .filter(|(_, items)| items.len() > 1)
        .filter_map(|(code, items)| {
            let clean: BTreeSet<String> =
                items.iter().map(|(_, name)| strip_parentheticals(name)).collect();
            if clean.len() < 2 {
                return None;
            }
            let raw: BTreeSet<String> = items.iter().map(|(_, name)| name.to_string()).collect();
            Some(CodeConflictRow {
                code: code.to_string(),
                count: items.len(),
                rows: items
                    .iter()
                    .map(|(row, _)| row.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
                names_clean: join_sorted(clean),
                names_raw: join_sorted(raw),
            })
        })
        .collect();
    conflicts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.code.cmp(&b.code)));
    info!(conflicts = conflicts.len(), "code conflict scan finished");
    Ok(conflicts)
}

// ---------------------------------------------------------------------------
// Exact dedupe
// ---------------------------------------------------------------------------

/// Keep the first row per (code, name); blank rows are dropped silently.
pub fn dedupe_exact(
    table: &RowTable,
    aliases: &ColumnAliases,
) -> ReconcileResult<(RowTable, Vec<InputRowRef>)> {
    let columns = resolve_columns(table, aliases)?;
    let mut seen: IndexSet<(&str, &str)> = IndexSet::new();
    let mut kept = Vec::new();
    let mut removed = Vec::new();
    for (i, row) in table.rows.iter().enumerate() {
        let code = table.cell(i, columns.code);
        let name = table.cell(i, columns.name);
        if code.is_empty() && name.is_empty() {
            continue;
        }
        if !seen.insert((code, name)) {
            removed.push(InputRowRef {
                row: RowTable::line_number(i),
                code: code.to_string(),
                name: name.to_string(),
            });
            continue;
        }
        kept.push(row.clone());
    }
    info!(kept = kept.len(), removed = removed.len(), "exact dedupe finished");
    Ok((
        RowTable::new(table.headers.clone(), kept, table.delimiter),
        removed,
    ))
}

// ---------------------------------------------------------------------------
// Name cleaning
// ---------------------------------------------------------------------------

/// Copy of the table with parentheticals removed from the name column.
/// Returns the number of names that changed.
pub fn strip_name_column(table: &RowTable, aliases: &ColumnAliases) -> ReconcileResult<(RowTable, usize)> {
    let name_col = table.find_column(&aliases.name).ok_or_else(|| {
        ReconcileError::Config(format!("name column not found (tried {:?})", aliases.name))
    })?;
    let mut changed = 0usize;
    let rows = table
        .rows
        .iter()
        .map(|row| {
            let mut row = row.clone();
            if let Some(cell) = row.get_mut(name_col) {
                let clean = strip_parentheticals(cell);
                if clean != *cell {
                    changed += 1;
                    *cell = clean;
                }
            }
            row
        })
        .collect();
    Ok((RowTable::new(table.headers.clone(), rows, table.delimiter), changed))
}

// ---------------------------------------------------------------------------
// Price merge
// ---------------------------------------------------------------------------

/// Column names for merging a price list into a deduplicated list.
#[derive(Clone, Debug)]
pub struct PriceColumns {
    pub code: String,
    pub name: String,
    pub price: String,
    /// Price column in the merged output; appended when absent.
    pub result_price: String,
}

impl Default for PriceColumns {
    fn default() -> Self {
        Self {
            code: "Код".to_string(),
            name: "Наименование".to_string(),
            price: "Цена: РРЦ".to_string(),
            result_price: "Цена: РРЦ".to_string(),
        }
    }
}

pub const PRICE_MISS_HEADERS: &[&str] = &["row", "code", "name", "price"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PriceMissRow {
    pub row: usize,
    pub code: String,
    pub name: String,
    pub price: String,
}

/// `1 234,50` -> `1234.50`; anything that is not a number afterwards is
/// returned unchanged.
pub fn normalize_price(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    let compact: String = raw
        .chars()
        .filter(|c| *c != ' ' && *c != '\u{a0}')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    if DECIMAL_RE.is_match(&compact) {
        compact
    } else {
        raw.to_string()
    }
}

/// Fill the price column of `unique` by exact code; the last price row for
/// a code wins. Returns the merged table and the price rows whose code is
/// absent from `unique`.
pub fn merge_prices(
    unique: &RowTable,
    prices: &RowTable,
    columns: &PriceColumns,
) -> ReconcileResult<(RowTable, Vec<PriceMissRow>)> {
    let code_aliases = ["код".to_string(), "code".to_string()];
    let unique_code = unique.find_column(&code_aliases).ok_or_else(|| {
        ReconcileError::Config("unique list has no code column".to_string())
    })?;

    let mut headers = unique.headers.clone();
    let out_price = match unique.find_column(std::slice::from_ref(&columns.result_price)) {
        Some(idx) => idx,
        None => {
            headers.push(columns.result_price.clone());
            headers.len() - 1
        }
    };

    let price_code = prices
        .find_column(&[columns.code.clone(), code_aliases[0].clone(), code_aliases[1].clone()])
        .ok_or_else(|| ReconcileError::Config(format!("price list has no {:?} column", columns.code)))?;
    let price_name = prices.find_column(&[
        columns.name.clone(),
        "наименование".to_string(),
        "name".to_string(),
    ]);
    let price_col = prices
        .find_column(std::slice::from_ref(&columns.price))
        .ok_or_else(|| ReconcileError::Config(format!("price list has no {:?} column", columns.price)))?;

    let mut price_by_code: IndexMap<&str, String> = IndexMap::new();
    for i in 0..prices.rows.len() {
        let code = prices.cell(i, price_code);
        if !code.is_empty() {
            price_by_code.insert(code, normalize_price(prices.cell(i, price_col)));
        }
    }

    let mut matched: IndexSet<&str> = IndexSet::new();
    let mut rows = Vec::with_capacity(unique.rows.len());
    for (i, row) in unique.rows.iter().enumerate() {
        let mut row = row.clone();
        if row.len() < headers.len() {
            row.resize(headers.len(), String::new());
        }
        let code = unique.cell(i, unique_code);
        if let Some((key, price)) = price_by_code.get_key_value(code) {
            row[out_price] = price.clone();
            matched.insert(*key);
        }
        rows.push(row);
    }

    let mut missing = Vec::new();
    for i in 0..prices.rows.len() {
        let code = prices.cell(i, price_code);
        if code.is_empty() || matched.contains(code) {
            continue;
        }
        missing.push(PriceMissRow {
            row: RowTable::line_number(i),
            code: code.to_string(),
            name: price_name.map(|c| prices.cell(i, c)).unwrap_or("").to_string(),
            price: prices.cell(i, price_col).to_string(),
        });
    }
    info!(rows = rows.len(), missing = missing.len(), "price merge finished");
    Ok((RowTable::new(headers, rows, unique.delimiter), missing))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(headers: &[&str], rows: &[&[&str]]) -> RowTable {
        RowTable::new(
            headers.iter().map(|s| s.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
            b';',
        )
    }

    #[test]
    fn test_scan_code_conflicts() {
        let t = table(
            &["код", "название"],
            &[
                &["A1", "Shelf (oak)"],
                &["A1", "Shelf"],
                &["B2", "Desk"],
                &["B2", "Chair"],
                &["B2", "Desk (new)"],
                &["", "Orphan"],
                &["C3", "Lamp"],
            ],
        );
        let conflicts = scan_code_conflicts(&t, &ColumnAliases::default()).unwrap();
        // A1 names collapse to one clean name
        assert_eq!(conflicts.len(), 1);
        let b2 = &conflicts[0];
        assert_eq!(b2.code, "B2");
        assert_eq!(b2.count, 3);
        assert_eq!(b2.rows, "4,5,6");
        assert_eq!(b2.names_clean, "Chair | Desk");
        assert_eq!(b2.names_raw, "Chair | Desk | Desk (new)");
    }

    #[test]
    fn test_scan_sorts_by_count_then_code() {
        let t = table(
            &["code", "name"],
            &[&["Z", "a"], &["Z", "b"], &["Y", "a"], &["Y", "b"], &["X", "a"], &["X", "b"], &["X", "c"]],
        );
        let codes: Vec<String> = scan_code_conflicts(&t, &ColumnAliases::default())
            .unwrap()
            .into_iter()
            .map(|c| c.code)
            .collect();
        assert_eq!(codes, vec!["X", "Y", "Z"]);
    }

    #[test]
    fn test_dedupe_exact_keeps_first() {
        let t = table(
            &["code", "name", "price"],
            &[&["A", "x", "1"], &["A", "x", "2"], &["", "", "3"], &["A", "y", "4"]],
        );
        let (kept, removed) = dedupe_exact(&t, &ColumnAliases::default()).unwrap();
        assert_eq!(kept.rows.len(), 2);
        assert_eq!(kept.rows[0][2], "1");
        assert_eq!(kept.delimiter, b';');
        assert_eq!(removed, vec![InputRowRef { row: 3, code: "A".into(), name: "x".into() }]);
    }

    #[test]
    fn test_strip_name_column() {
        let t = table(&["code", "name"], &[&["A", "Shelf (oak) 120"], &["B", "Desk"]]);
        let (clean, changed) = strip_name_column(&t, &ColumnAliases::default()).unwrap();
        assert_eq!(changed, 1);
        assert_eq!(clean.rows[0][1], "Shelf 120");
        assert_eq!(clean.rows[1][1], "Desk");
    }

    #[test]
    fn test_normalize_price() {
        assert_eq!(normalize_price("1 234,50"), "1234.50");
        assert_eq!(normalize_price("1\u{a0}000"), "1000");
        assert_eq!(normalize_price(" on request "), "on request");
        assert_eq!(normalize_price(""), "");
    }

    #[test]
    fn test_merge_prices_last_wins_and_reports_missing() {
        let unique = table(&["Код", "Наименование"], &[&["A1", "Shelf"], &["B2", "Desk"]]);
        let prices = table(
            &["Код", "Наименование", "Цена: РРЦ"],
            &[&["A1", "Shelf", "10"], &["A1", "Shelf", "12,5"], &["Z9", "Lamp", "7"]],
        );
        let (merged, missing) = merge_prices(&unique, &prices, &PriceColumns::default()).unwrap();
        assert_eq!(merged.headers.len(), 3);
        assert_eq!(merged.rows[0][2], "12.5");
        assert_eq!(merged.rows[1][2], "");
        assert_eq!(
            missing,
            vec![PriceMissRow {
                row: 4,
                code: "Z9".into(),
                name: "Lamp".into(),
                price: "7".into()
            }]
        );
    }

    #[test]
    fn test_merge_prices_requires_price_column() {
        let unique = table(&["code"], &[&["A1"]]);
        let prices = table(&["code", "cost"], &[&["A1", "1"]]);
        assert!(merge_prices(&unique, &prices, &PriceColumns::default())
            .unwrap_err()
            .is_config());
    }
}
