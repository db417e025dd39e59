//! Flat report rows and the run summary.
//!
//! Every row struct serialises to one CSV line; the `*_HEADERS` constants
//! list the same columns in field order.

use std::path::Path;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::info;

use crate::errors::ReconcileResult;
use crate::models::{MatchDirection, MatchStatus, RunMode, UpdateOutcome};

pub const MATCH_HEADERS: &[&str] = &[
    "row",
    "match_status",
    "reason",
    "entry_id",
    "entry_name",
    "old_identifier",
    "new_identifier",
    "external_row",
    "external_code",
    "external_name",
    "external_type",
    "head",
    "result",
    "candidates",
];

/// One line per query, whichever corpus played the query role.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MatchReportRow {
    pub row: String,
    pub match_status: String,
    pub reason: String,
    pub entry_id: String,
    pub entry_name: String,
    pub old_identifier: String,
    pub new_identifier: String,
    pub external_row: String,
    pub external_code: String,
    pub external_name: String,
    pub external_type: String,
    pub head: String,
    pub result: String,
    pub candidates: String,
}

pub const PROBLEM_HEADERS: &[&str] = &[
    "problem_type",
    "row",
    "entry_id",
    "entry_name",
    "new_identifier",
    "reason",
    "conflict_ids",
    "conflict_names",
];

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProblemRow {
    pub problem_type: String,
    pub row: String,
    pub entry_id: String,
    pub entry_name: String,
    pub new_identifier: String,
    pub reason: String,
    pub conflict_ids: String,
    pub conflict_names: String,
}

pub const ROW_REF_HEADERS: &[&str] = &["row", "code", "name"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InputRowRef {
    pub row: usize,
    pub code: String,
    pub name: String,
}

pub const PLAN_HEADERS: &[&str] = &[
    "row",
    "entry_id",
    "old_identifier",
    "new_identifier",
    "match_status",
    "result",
    "reason",
];

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PlanReportRow {
    pub row: usize,
    pub entry_id: String,
    pub old_identifier: String,
    pub new_identifier: String,
    pub match_status: String,
    pub result: String,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// RunSummary
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub direction: Option<MatchDirection>,
    pub mode: RunMode,
    pub input_digest: String,
    pub rows: usize,
    pub statuses: IndexMap<String, usize>,
    pub results: IndexMap<String, usize>,
    /// Queries with an auto-applicable status.
    pub covered: usize,
    pub updated: usize,
}

impl RunSummary {
    pub fn new(direction: Option<MatchDirection>, mode: RunMode, input_digest: String) -> Self {
        Self {
            direction,
            mode,
            input_digest,
            rows: 0,
            statuses: IndexMap::new(),
            results: IndexMap::new(),
            covered: 0,
            updated: 0,
        }
    }

    pub fn count_status(&mut self, status: MatchStatus) {
        *self.statuses.entry(status.as_str().to_string()).or_default() += 1;
        if status.is_auto_applicable() {
            self.covered += 1;
        }
    }

    pub fn count_result(&mut self, outcome: UpdateOutcome) {
        *self.results.entry(outcome.as_str().to_string()).or_default() += 1;
    }

    /// Whole-number percentage of rows with an auto-applicable status.
    pub fn coverage_percent(&self) -> usize {
        self.covered * 100 / self.rows.max(1)
    }

    pub fn log(&self) {
        let statuses = render_counts(&self.statuses);
        let results = render_counts(&self.results);
        info!(
            mode = ?self.mode,
            direction = self.direction.map(|d| d.as_str()).unwrap_or("plan"),
            rows = self.rows,
            covered = self.covered,
            coverage = self.coverage_percent(),
            updated = self.updated,
            digest = %self.input_digest,
            %statuses,
            %results,
            "run finished"
        );
    }

    pub fn write_json(&self, path: &Path) -> ReconcileResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

fn render_counts(counts: &IndexMap<String, usize>) -> String {
    counts
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_match_field_counts() {
        let mut writer = csv::WriterBuilder::new().has_headers(true).from_writer(vec![]);
        writer.serialize(MatchReportRow::default()).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(text.lines().next().unwrap(), MATCH_HEADERS.join(","));

        let mut writer = csv::WriterBuilder::new().has_headers(true).from_writer(vec![]);
        writer.serialize(ProblemRow::default()).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(text.lines().next().unwrap(), PROBLEM_HEADERS.join(","));

        let mut writer = csv::WriterBuilder::new().has_headers(true).from_writer(vec![]);
        writer.serialize(PlanReportRow::default()).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(text.lines().next().unwrap(), PLAN_HEADERS.join(","));
    }

    #[test]
    fn test_summary_counts_and_coverage() {
        let mut summary = RunSummary::new(
            Some(MatchDirection::CatalogToExternal),
            RunMode::DryRun,
            "abc".to_string(),
        );
        summary.rows = 3;
        summary.count_status(MatchStatus::Exact);
        summary.count_status(MatchStatus::PlainBest);
        summary.count_status(MatchStatus::Ambiguous);
        summary.count_result(UpdateOutcome::WouldUpdate);
        assert_eq!(summary.covered, 2);
        assert_eq!(summary.coverage_percent(), 66);
        assert_eq!(summary.statuses["exact"], 1);
        assert_eq!(render_counts(&summary.statuses), "exact=1, plain_best=1, ambiguous=1");
    }

    #[test]
    fn test_summary_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        let summary = RunSummary::new(None, RunMode::Apply, "d".to_string());
        summary.write_json(&path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["mode"], "apply");
        assert_eq!(value["direction"], serde_json::Value::Null);
    }
}
