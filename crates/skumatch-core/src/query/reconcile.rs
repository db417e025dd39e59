//! Batch reconciliation: one input table against one catalog snapshot.
//!
//! Load records, snapshot the catalog, match every query, apply the batch
//! overlays, run accepted proposals through the claim table in input order,
//! and (in apply mode) write the accepted set in a single transaction.

use tracing::{info, warn};

use crate::config::ReconcileConfig;
use crate::errors::ReconcileResult;
use crate::indexer::records::{build_catalog, input_digest, load_external_records};
use crate::models::{
    format_ids, CatalogEntry, EntryId, ExternalRecord, MatchDirection, RunMode, UpdateOutcome,
};
use crate::query::matcher::{apply_overlays, match_batch, MatchOptions, MatchResult};
use crate::query::resolver::{snapshot_owners, ClaimTable, Resolution};
use crate::report::{InputRowRef, MatchReportRow, ProblemRow, RunSummary};
use crate::store::{apply_updates, CatalogStore, PendingUpdate};
use crate::tabular::RowTable;

/// Everything a run produces.
#[derive(Clone, Debug)]
pub struct ReconcileOutput {
    pub matches: Vec<MatchReportRow>,
    pub problems: Vec<ProblemRow>,
    /// Non-blank input rows left unconsumed: not settled on by any catalog
    /// entry, or whose own proposal was not accepted.
    pub unused: Vec<InputRowRef>,
    pub summary: RunSummary,
}

/// Who a result pairs up, independent of which side was the query.
struct Pairing<'a> {
    entry: Option<&'a CatalogEntry>,
    external: Option<&'a ExternalRecord>,
    head: &'a str,
}

fn pairing<'a>(
    direction: MatchDirection,
    result: &MatchResult,
    records: &'a [ExternalRecord],
    catalog: &'a [CatalogEntry],
) -> Pairing<'a> {
    match direction {
        MatchDirection::ExternalToCatalog => {
            let record = &records[result.query];
            Pairing {
                entry: result.chosen.map(|i| &catalog[i]),
                external: Some(record),
                head: &record.head_code,
            }
        }
        MatchDirection::CatalogToExternal => {
            let entry = &catalog[result.query];
            Pairing {
                entry: Some(entry),
                external: result.chosen.map(|i| &records[i]),
                head: &entry.head_code,
            }
        }
    }
}

/// Resolver verdict for one result, plus what the problem report needs.
struct RowOutcome {
    result: UpdateOutcome,
    note: Option<String>,
    conflict_ids: Vec<EntryId>,
    conflict_names: Vec<String>,
}

impl RowOutcome {
    fn plain(result: UpdateOutcome, note: Option<String>) -> Self {
        Self {
            result,
            note,
            conflict_ids: Vec::new(),
            conflict_names: Vec::new(),
        }
    }
}

fn decide(
    result: &MatchResult,
    pair: &Pairing<'_>,
    claims: &mut ClaimTable,
    mode: RunMode,
    pending: &mut Vec<PendingUpdate>,
) -> RowOutcome {
    if !result.is_auto_applicable() {
        let (conflict_ids, conflict_names) = if result.competing_owners.is_empty() {
            (Vec::new(), Vec::new())
        } else {
            let names = result
                .competing_owners
                .iter()
                .map(|id| claims.name_of(*id).to_string())
                .collect();
            (result.competing_owners.clone(), names)
        };
        return RowOutcome {
            result: UpdateOutcome::Skip,
            note: None,
            conflict_ids,
            conflict_names,
        };
    }
    let Some(entry) = pair.entry else {
        return RowOutcome::plain(UpdateOutcome::Skip, Some("no matched entry".to_string()));
    };
    if result.proposed_identifier.is_empty() {
        return RowOutcome::plain(UpdateOutcome::Skip, Some("no identifier to assign".to_string()));
    }

    match claims.resolve(entry.id, &result.proposed_identifier) {
        Resolution::Accepted { old_identifier } => {
            pending.push(PendingUpdate {
                entry: entry.id,
                old_identifier,
                new_identifier: result.proposed_identifier.clone(),
            });
            RowOutcome::plain(mode.accepted_outcome(), None)
        }
        Resolution::Noop => RowOutcome::plain(UpdateOutcome::Noop, None),
        Resolution::Conflict {
            owners,
            owner_names,
            reason,
        } => RowOutcome {
            result: UpdateOutcome::Conflict,
            note: Some(reason),
            conflict_ids: owners,
            conflict_names: owner_names,
        },
        Resolution::Error { reason } => RowOutcome::plain(UpdateOutcome::Error, Some(reason)),
    }
}

/// Run one reconciliation. Configuration problems fail before the store is
/// read; per-row problems end up in the reports.
pub fn reconcile(
    store: &mut dyn CatalogStore,
    table: &RowTable,
    direction: MatchDirection,
    mode: RunMode,
    config: &ReconcileConfig,
) -> ReconcileResult<ReconcileOutput> {
    let options = MatchOptions::from_settings(&config.match_settings, direction)?;
    let records = load_external_records(table, &config.columns)?;
    let catalog = build_catalog(&store.fetch_all()?);
    let owners = snapshot_owners(&catalog);
    info!(
        direction = direction.as_str(),
        mode = ?mode,
        input_rows = records.len(),
        catalog = catalog.len(),
        fallback = options.fallback,
        "reconciliation started"
    );

    let mut results = match direction {
        MatchDirection::ExternalToCatalog => {
            let mut results = match_batch(&records, &catalog, &options);
            for result in &mut results {
                result.proposed_identifier = records[result.query].identifier_raw.clone();
            }
            results
        }
        MatchDirection::CatalogToExternal => {
            let mut results = match_batch(&catalog, &records, &options);
            for result in &mut results {
                result.proposed_identifier = result
                    .chosen
                    .map(|i| records[i].identifier_raw.clone())
                    .unwrap_or_default();
            }
            results
        }
    };

    let corpus_ids: Vec<&str> = records.iter().map(|r| r.identifier_raw.as_str()).collect();
    apply_overlays(&mut results, &corpus_ids, &owners, |r| {
        pairing(direction, r, &records, &catalog).entry.map(|e| e.id)
    });

    let mut claims = ClaimTable::seed(&catalog);
    for (identifier, entries) in claims.contested() {
        warn!(identifier, entries = %format_ids(&entries), "identifier already shared in catalog");
    }
    let mut pending = Vec::new();
    let mut summary = RunSummary::new(Some(direction), mode, input_digest(table));
    let mut matches = Vec::with_capacity(results.len());
    let mut problems = Vec::new();
    let mut used_rows = vec![false; records.len()];

    for result in &results {
        let pair = pairing(direction, result, &records, &catalog);
        let outcome = decide(result, &pair, &mut claims, mode, &mut pending);
        summary.rows += 1;
        summary.count_status(result.status);
        summary.count_result(outcome.result);

        match direction {
            MatchDirection::ExternalToCatalog => {
                if !outcome.result.is_problem() {
                    used_rows[result.query] = true;
                }
            }
            MatchDirection::CatalogToExternal => {
                if result.is_auto_applicable() {
                    if let Some(chosen) = result.chosen {
                        used_rows[chosen] = true;
                    }
                }
            }
        }

        let reason = match &outcome.note {
            Some(note) => format!("{}; {note}", result.reason),
            None => result.reason.clone(),
        };
        let row = match direction {
            MatchDirection::ExternalToCatalog => records[result.query].row.to_string(),
            MatchDirection::CatalogToExternal => String::new(),
        };
        let candidates = if config.match_settings.debug_candidates {
            match direction {
                MatchDirection::ExternalToCatalog => result.debug_candidates(&catalog),
                MatchDirection::CatalogToExternal => result.debug_candidates(&records),
            }
        } else {
            String::new()
        };
        let entry_id = pair.entry.map(|e| e.id.to_string()).unwrap_or_default();
        let entry_name = pair
            .entry
            .map(|e| e.display_name.clone())
            .unwrap_or_default();

        if outcome.result.is_problem() {
            let problem_type = match outcome.result {
                UpdateOutcome::Skip if outcome.note.is_none() => result.status.as_str(),
                other => other.as_str(),
            };
            problems.push(ProblemRow {
                problem_type: problem_type.to_string(),
                row: row.clone(),
                entry_id: entry_id.clone(),
                entry_name: entry_name.clone(),
                new_identifier: result.proposed_identifier.clone(),
                reason: reason.clone(),
                conflict_ids: if outcome.conflict_ids.is_empty() {
                    String::new()
                } else {
                    format_ids(&outcome.conflict_ids)
                },
                conflict_names: outcome.conflict_names.join(" | "),
            });
        }

        matches.push(MatchReportRow {
            row,
            match_status: result.status.as_str().to_string(),
            reason,
            entry_id,
            entry_name,
            old_identifier: pair
                .entry
                .map(|e| e.current_identifier.clone())
                .unwrap_or_default(),
            new_identifier: result.proposed_identifier.clone(),
            external_row: pair.external.map(|r| r.row.to_string()).unwrap_or_default(),
            external_code: pair
                .external
                .map(|r| r.identifier_raw.clone())
                .unwrap_or_default(),
            external_name: pair
                .external
                .map(|r| r.display_name_raw.clone())
                .unwrap_or_default(),
            external_type: pair.external.map(|r| r.kind_raw.clone()).unwrap_or_default(),
            head: pair.head.to_string(),
            result: outcome.result.as_str().to_string(),
            candidates,
        });
    }

    let unused: Vec<InputRowRef> = records
        .iter()
        .zip(&used_rows)
        .filter(|(record, used)| !**used && !record.is_blank())
        .map(|(record, _)| InputRowRef {
            row: record.row,
            code: record.identifier_raw.clone(),
            name: record.display_name_raw.clone(),
        })
        .collect();

    if !problems.is_empty() {
        warn!(problems = problems.len(), "rows need review");
    }
    if mode == RunMode::Apply {
        summary.updated = apply_updates(store, &pending)?;
    }
    summary.log();

    Ok(ReconcileOutput {
        matches,
        problems,
        unused,
        summary,
    })
}
