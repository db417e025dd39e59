//! Delimited-text input and report output.
//!
//! Input is read into a [`RowTable`] of trimmed strings; header labels stay
//! as strings here and are resolved to typed records elsewhere. Reports are
//! written from flat `Serialize` rows so the column order is the field order.

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::Serialize;

use crate::errors::{ReconcileError, ReconcileResult};
use crate::query::guards::SNIFF_SAMPLE_BYTES;

const SNIFF_CANDIDATES: &[u8] = b",;\t|";
const SNIFF_MAX_LINES: usize = 20;

/// Canonical header label: BOM and surrounding whitespace removed, lower-cased.
pub fn normalize_label(label: &str) -> String {
    label.trim_start_matches('\u{feff}').trim().to_lowercase()
}

/// A parsed delimited file: one header row plus data rows.
#[derive(Clone, Debug, Default)]
pub struct RowTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub delimiter: u8,
}

impl RowTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>, delimiter: u8) -> Self {
        Self {
            headers,
            rows,
            delimiter,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of the first alias present among the headers.
    pub fn find_column(&self, aliases: &[String]) -> Option<usize> {
        let labels: Vec<String> = self.headers.iter().map(|h| normalize_label(h)).collect();
        aliases.iter().find_map(|alias| {
            let wanted = normalize_label(alias);
            labels.iter().position(|label| *label == wanted)
        })
    }

    /// Cell text, empty when the row is short.
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Spreadsheet line number of a data row (header is line 1).
    pub fn line_number(row: usize) -> usize {
        row + 2
    }

    /// Parse from a reader with a known delimiter.
    pub fn from_reader<R: Read>(reader: R, delimiter: u8) -> ReconcileResult<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut records = csv_reader.records();
        let headers: Vec<String> = match records.next() {
            Some(first) => first?.iter().map(|c| c.trim().to_string()).collect(),
            None => Vec::new(),
        };
        let mut rows = Vec::new();
        for record in records {
            let record = record?;
            rows.push(record.iter().map(|c| c.trim().to_string()).collect());
        }
        Ok(RowTable::new(headers, rows, delimiter))
    }

    /// Parse text, sniffing the delimiter and falling back to `fallback`.
    pub fn parse_str(text: &str, fallback: u8) -> ReconcileResult<Self> {
        let delimiter = sniff_delimiter(text).unwrap_or(fallback);
        RowTable::from_reader(text.as_bytes(), delimiter)
    }
}

/// Pick the delimiter that appears the same non-zero number of times on
/// every sampled line, preferring the most frequent one.
pub fn sniff_delimiter(text: &str) -> Option<u8> {
    let mut end = text.len().min(SNIFF_SAMPLE_BYTES);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let sample = &text[..end];
    let mut lines: Vec<&str> = sample.lines().filter(|l| !l.trim().is_empty()).collect();
    // a truncated sample ends mid-line
    if end < text.len() && lines.len() > 1 {
        lines.pop();
    }
    lines.truncate(SNIFF_MAX_LINES);
    if lines.is_empty() {
        return None;
    }

    let mut best: Option<(u8, usize)> = None;
    for &delim in SNIFF_CANDIDATES {
        let counts: Vec<usize> = lines
            .iter()
            .map(|line| count_unquoted(line, delim))
            .collect();
        let first = counts[0];
        if first == 0 || counts.iter().any(|c| *c != first) {
            continue;
        }
        if best.map_or(true, |(_, n)| first > n) {
            best = Some((delim, first));
        }
    }
    best.map(|(delim, _)| delim)
}

fn count_unquoted(line: &str, delim: u8) -> usize {
    let mut quoted = false;
    let mut count = 0;
    for b in line.bytes() {
        if b == b'"' {
            quoted = !quoted;
        } else if b == delim && !quoted {
            count += 1;
        }
    }
    count
}

/// Read a delimited file; a missing header row or zero data rows is a
/// configuration error.
pub fn read_table(path: &Path, fallback: u8) -> ReconcileResult<RowTable> {
    let bytes = fs::read(path)?;
    let text = String::from_utf8(bytes).map_err(|_| {
        ReconcileError::Input(format!("{}: not valid UTF-8", path.display()))
    })?;
    let table = RowTable::parse_str(&text, fallback)?;
    if table.headers.iter().all(|h| h.is_empty()) {
        return Err(ReconcileError::Config(format!(
            "{}: no header row",
            path.display()
        )));
    }
    if table.is_empty() {
        return Err(ReconcileError::Config(format!(
            "{}: no data rows",
            path.display()
        )));
    }
    Ok(table)
}

/// Write serialisable rows under an explicit header so empty reports still
/// carry their columns.
pub fn write_report<S: Serialize>(
    path: &Path,
    headers: &[&str],
    rows: &[S],
    delimiter: u8,
) -> ReconcileResult<()> {
    ensure_parent(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .delimiter(delimiter)
        .quote_style(csv::QuoteStyle::Necessary)
        .from_path(path)?;
    writer.write_record(headers)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write a plain string table (used when a command rewrites its input).
pub fn write_table(path: &Path, table: &RowTable) -> ReconcileResult<()> {
    ensure_parent(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(table.delimiter)
        .quote_style(csv::QuoteStyle::Necessary)
        .from_path(path)?;
    writer.write_record(&table.headers)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn ensure_parent(path: &Path) -> ReconcileResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("\u{feff} Код "), "код");
        assert_eq!(normalize_label("NAME"), "name");
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter("code;name\nA1;Shelf\nB2;Desk\n"), Some(b';'));
        assert_eq!(sniff_delimiter("a\tb\tc\n1\t2\t3\n"), Some(b'\t'));
        // commas inside names are inconsistent, semicolons are not
        assert_eq!(
            sniff_delimiter("code;name\nA1;Shelf, oak\nB2;Desk\n"),
            Some(b';')
        );
        assert_eq!(sniff_delimiter("a,b\n\"x;y\",z\n"), Some(b','));
        assert_eq!(sniff_delimiter("single\ncolumn\n"), None);
        assert_eq!(sniff_delimiter(""), None);
    }

    #[test]
    fn test_parse_str_trims_and_pads() {
        let table =
            RowTable::parse_str("\u{feff}Code; Name ;Type\n A1 ; Shelf ;\nB2;;\n", b',').unwrap();
        assert_eq!(table.delimiter, b';');
        assert_eq!(table.find_column(&["code".to_string()]), Some(0));
        assert_eq!(table.find_column(&["missing".to_string(), "name".to_string()]), Some(1));
        assert_eq!(table.cell(0, 0), "A1");
        assert_eq!(table.cell(0, 1), "Shelf");
        assert_eq!(table.cell(1, 1), "");
        assert_eq!(RowTable::line_number(1), 3);
    }

    #[test]
    fn test_short_rows_read_as_empty_cells() {
        let table = RowTable::from_reader("code,name
B2
".as_bytes(), b',').unwrap();
        assert_eq!(table.cell(0, 0), "B2");
        assert_eq!(table.cell(0, 1), "");
        assert_eq!(table.cell(5, 0), "");
    }

    #[test]
    fn test_read_table_rejects_empty_input() {
        let dir = tempfile::tempdir().unwrap();
        let header_only = dir.path().join("header.csv");
        fs::write(&header_only, "code,name\n").unwrap();
        assert!(read_table(&header_only, b',').unwrap_err().is_config());

        let empty = dir.path().join("empty.csv");
        fs::write(&empty, "").unwrap();
        assert!(read_table(&empty, b',').unwrap_err().is_config());
    }

    #[test]
    fn test_write_report_keeps_header_for_empty_rows() {
        #[derive(Serialize)]
        struct Row {
            row: usize,
            code: String,
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/report.csv");
        write_report::<Row>(&path, &["row", "code"], &[], b',').unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "row,code\n");

        let rows = vec![Row {
            row: 2,
            code: "A, 1".to_string(),
        }];
        write_report(&path, &["row", "code"], &rows, b',').unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "row,code\n2,\"A, 1\"\n");
    }

    #[test]
    fn test_write_table_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        let table = RowTable::new(
            vec!["code".into(), "name".into()],
            vec![vec!["A1".into(), "Shelf; oak".into()]],
            b';',
        );
        write_table(&path, &table).unwrap();
        let back = read_table(&path, b',').unwrap();
        assert_eq!(back.rows, table.rows);
    }

    #[test]
    fn test_read_table_rejects_non_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latin1.csv");
        std::fs::write(&path, b"code;name\nA1;caf\xe9\n").unwrap();
        assert!(matches!(
            read_table(&path, b';'),
            Err(ReconcileError::Input(_))
        ));
    }
}
