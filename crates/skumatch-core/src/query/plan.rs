//! Apply a reviewed matches report.
//!
//! Each plan row names an entry, the identifier to give it and the status
//! the matcher assigned. Rows go through the same claim table and the same
//! single-transaction apply as a reconciliation run.

use tracing::info;

use crate::config::PlanSettings;
use crate::errors::{ReconcileError, ReconcileResult};
use crate::indexer::records::{build_catalog, input_digest};
use crate::models::{format_ids, EntryId, MatchStatus, RunMode, UpdateOutcome};
use crate::query::resolver::{ClaimTable, Resolution};
use crate::report::{PlanReportRow, ProblemRow, RunSummary};
use crate::store::{apply_updates, CatalogStore, PendingUpdate};
use crate::tabular::RowTable;

#[derive(Clone, Debug)]
pub struct PlanOutput {
    pub rows: Vec<PlanReportRow>,
    pub problems: Vec<ProblemRow>,
    pub summary: RunSummary,
}

struct PlanColumns {
    id: usize,
    identifier: usize,
    status: usize,
}

fn plan_columns(table: &RowTable, settings: &PlanSettings) -> ReconcileResult<PlanColumns> {
    let find = |aliases: &[String], what: &str| {
        table.find_column(aliases).ok_or_else(|| {
            ReconcileError::Config(format!(
                "plan {what} column not found (tried {aliases:?}, headers {:?})",
                table.headers
            ))
        })
    };
    Ok(PlanColumns {
        id: find(&settings.id_columns, "entry id")?,
        identifier: find(&settings.identifier_columns, "identifier")?,
        status: find(&settings.status_columns, "status")?,
    })
}

pub fn apply_plan(
    store: &mut dyn CatalogStore,
    table: &RowTable,
    mode: RunMode,
    settings: &PlanSettings,
) -> ReconcileResult<PlanOutput> {
    let allowed = settings.allowed()?;
    if table.is_empty() {
        return Err(ReconcileError::Config("plan has no data rows".to_string()));
    }
    let columns = plan_columns(table, settings)?;
    let catalog = build_catalog(&store.fetch_all()?);
    let mut claims = ClaimTable::seed(&catalog);
    info!(rows = table.rows.len(), catalog = catalog.len(), mode = ?mode, "applying plan");

    let mut summary = RunSummary::new(None, mode, input_digest(table));
    let mut pending = Vec::new();
    let mut rows = Vec::with_capacity(table.rows.len());
    let mut problems = Vec::new();

    for i in 0..table.rows.len() {
        let line = RowTable::line_number(i);
        let id_raw = table.cell(i, columns.id);
        let new_identifier = table.cell(i, columns.identifier);
        let status_raw = table.cell(i, columns.status);
        let status = MatchStatus::parse(status_raw);
        if let Some(status) = status {
            summary.count_status(status);
        }

        let mut report = PlanReportRow {
            row: line,
            entry_id: id_raw.to_string(),
            new_identifier: new_identifier.to_string(),
            match_status: status_raw.to_string(),
            ..PlanReportRow::default()
        };
        let mut conflict_ids = Vec::new();
        let mut conflict_names = Vec::new();

        let (outcome, reason) = if id_raw.is_empty() || new_identifier.is_empty() {
            (UpdateOutcome::Skip, "missing entry id or identifier".to_string())
        } else if !status.is_some_and(|s| allowed.contains(&s)) {
            (UpdateOutcome::Skip, format!("status {status_raw:?} not allowed"))
        } else {
            match id_raw.parse::<EntryId>() {
                Err(_) => (UpdateOutcome::Error, format!("invalid entry id {id_raw:?}")),
                Ok(entry) => {
                    report.old_identifier = claims
                        .current_identifier(entry)
                        .unwrap_or_default()
                        .to_string();
                    match claims.resolve(entry, new_identifier) {
                        Resolution::Accepted { old_identifier } => {
                            pending.push(PendingUpdate {
                                entry,
                                old_identifier,
                                new_identifier: new_identifier.to_string(),
                            });
                            (mode.accepted_outcome(), String::new())
                        }
                        Resolution::Noop => (UpdateOutcome::Noop, "identifier unchanged".to_string()),
                        Resolution::Conflict {
                            owners,
                            owner_names,
                            reason,
                        } => {
                            conflict_ids = owners;
                            conflict_names = owner_names;
                            (UpdateOutcome::Conflict, reason)
                        }
                        Resolution::Error { reason } => (UpdateOutcome::Error, reason),
                    }
                }
            }
        };

        summary.rows += 1;
        summary.count_result(outcome);
        report.result = outcome.as_str().to_string();
        report.reason = reason;

        if outcome.is_problem() {
            let entry_name = id_raw
                .parse::<EntryId>()
                .map(|id| claims.name_of(id).to_string())
                .unwrap_or_default();
            problems.push(ProblemRow {
                problem_type: outcome.as_str().to_string(),
                row: line.to_string(),
                entry_id: id_raw.to_string(),
                entry_name,
                new_identifier: new_identifier.to_string(),
                reason: report.reason.clone(),
                conflict_ids: if conflict_ids.is_empty() {
                    String::new()
                } else {
                    format_ids(&conflict_ids)
                },
                conflict_names: conflict_names.join(" | "),
            });
        }
        rows.push(report);
    }

    if mode == RunMode::Apply {
        summary.updated = apply_updates(store, &pending)?;
    }
    summary.log();
    Ok(PlanOutput {
        rows,
        problems,
        summary,
    })
}
