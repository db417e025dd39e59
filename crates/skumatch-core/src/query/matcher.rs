//! Per-query candidate selection and batch-level status overlays.
//!
//! A query is matched in five steps: retrieve candidates by head code
//! (optionally relaxed), drop denied names unless that empties the list,
//! score, rank, and classify. After every query has been matched the batch
//! overlays mark identifiers that are duplicated in the batch or already held
//! in the store.

use indexmap::IndexMap;
use regex::Regex;
use tracing::debug;

use crate::config::MatchSettings;
use crate::errors::ReconcileResult;
use crate::indexer::candidates::{CandidateIndex, RetrievalPath};
use crate::models::{format_ids, EntryId, MatchDirection, MatchStatus, Matchable};
use crate::query::guards::{DEBUG_CANDIDATE_LIMIT, EXACT_SCORE, MIN_ACCEPT_SCORE};
use crate::query::scorer::score;

/// Knobs resolved for one direction.
#[derive(Clone, Debug)]
pub struct MatchOptions {
    pub direction: MatchDirection,
    pub deny: Regex,
    pub fallback: bool,
}

impl MatchOptions {
    pub fn from_settings(settings: &MatchSettings, direction: MatchDirection) -> ReconcileResult<Self> {
        Ok(Self {
            direction,
            deny: settings.deny_regex(direction)?,
            fallback: settings.fallback_for(direction),
        })
    }
}

/// Outcome of matching one query. Indices point into the query corpus
/// (`query`) and the searched corpus (`chosen`, `candidates`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchResult {
    pub query: usize,
    pub status: MatchStatus,
    pub reason: String,
    pub chosen: Option<usize>,
    pub best_score: u8,
    /// Ranked: score descending, then longer clean name first.
    pub candidates: Vec<usize>,
    pub path: RetrievalPath,
    pub proposed_identifier: String,
    pub competing_owners: Vec<EntryId>,
}

impl MatchResult {
    fn unmatched(query: usize, status: MatchStatus, reason: &str, path: RetrievalPath) -> Self {
        Self {
            query,
            status,
            reason: reason.to_string(),
            chosen: None,
            best_score: 0,
            candidates: Vec::new(),
            path,
            proposed_identifier: String::new(),
            competing_owners: Vec::new(),
        }
    }

    pub fn is_auto_applicable(&self) -> bool {
        self.status.is_auto_applicable()
    }

    /// `label; label; ...` for the first ranked candidates.
    pub fn debug_candidates<C: Matchable>(&self, corpus: &[C]) -> String {
        self.candidates
            .iter()
            .take(DEBUG_CANDIDATE_LIMIT)
            .filter_map(|&i| corpus.get(i))
            .map(Matchable::label)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

fn name_len<C: Matchable>(item: &C) -> usize {
    item.clean_name().chars().count()
}

/// Match one query against an indexed corpus.
pub fn match_query<Q: Matchable, C: Matchable>(
    query_pos: usize,
    query: &Q,
    corpus: &[C],
    index: &CandidateIndex,
    options: &MatchOptions,
) -> MatchResult {
    let head = query.head_code();
    if head.is_empty() {
        return MatchResult::unmatched(
            query_pos,
            MatchStatus::NotFound,
            "no head code",
            RetrievalPath::Nothing,
        );
    }

    let (retrieved, path) = index.retrieve(head, options.fallback);
    if path != RetrievalPath::Direct {
        debug!(head, %path, found = retrieved.len(), "relaxed retrieval");
    }
    if retrieved.is_empty() {
        return MatchResult::unmatched(query_pos, MatchStatus::NotFound, "no candidates", path);
    }

    let allowed: Vec<usize> = retrieved
        .iter()
        .copied()
        .filter(|&i| !options.deny.is_match(corpus[i].raw_name()))
        .collect();
    let pool = if allowed.is_empty() { retrieved } else { allowed };

    let mut scored: Vec<(usize, u8)> = pool
        .iter()
        .map(|&i| (i, score(query, &corpus[i], options.direction, &options.deny)))
        .collect();
    scored.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| name_len(&corpus[b.0]).cmp(&name_len(&corpus[a.0])))
    });
    let best_score = scored[0].1;

    // Among the top score the shortest clean name wins; ties keep bucket order.
    let mut top: Vec<usize> = scored
        .iter()
        .filter(|(_, s)| *s == best_score)
        .map(|(i, _)| *i)
        .collect();
    top.sort_by_key(|&i| name_len(&corpus[i]));
    let pick = top.first().copied();

    let count = scored.len();
    let via = match path {
        RetrievalPath::Direct => String::new(),
        other => format!(" via {other}"),
    };
    let (status, reason, chosen) = if best_score >= EXACT_SCORE {
        (MatchStatus::Exact, format!("{count} candidates, score={best_score}{via}"), pick)
    } else if best_score >= MIN_ACCEPT_SCORE {
        (MatchStatus::PlainBest, format!("{count} candidates, score={best_score}{via}"), pick)
    } else {
        (
            MatchStatus::Ambiguous,
            format!("{count} candidates, best_score={best_score}{via}"),
            None,
        )
    };

    MatchResult {
        query: query_pos,
        status,
        reason,
        chosen,
        best_score,
        candidates: scored.into_iter().map(|(i, _)| i).collect(),
        path,
        proposed_identifier: String::new(),
        competing_owners: Vec::new(),
    }
}

/// Match every query in order against a freshly built index of `corpus`.
pub fn match_batch<Q: Matchable, C: Matchable>(
    queries: &[Q],
    corpus: &[C],
    options: &MatchOptions,
) -> Vec<MatchResult> {
    let index = CandidateIndex::build(corpus);
    debug!(
        keys = index.key_count(),
        corpus = corpus.len(),
        direction = options.direction.as_str(),
        "candidate index built"
    );
    queries
        .iter()
        .enumerate()
        .map(|(pos, query)| match_query(pos, query, corpus, &index, options))
        .collect()
}

/// Mark duplicated and already-held identifiers.
///
/// `target` names the entry a result's identifier would be written to;
/// owners equal to the target do not count as competition.
pub fn apply_overlays(
    results: &mut [MatchResult],
    corpus_identifiers: &[&str],
    owners: &IndexMap<String, Vec<EntryId>>,
    target: impl Fn(&MatchResult) -> Option<EntryId>,
) {
    let mut proposal_counts: IndexMap<String, usize> = IndexMap::new();
    for result in results.iter() {
        if !result.proposed_identifier.is_empty() {
            *proposal_counts.entry(result.proposed_identifier.clone()).or_default() += 1;
        }
    }
    let mut corpus_counts: IndexMap<&str, usize> = IndexMap::new();
    for id in corpus_identifiers.iter().filter(|id| !id.is_empty()) {
        *corpus_counts.entry(*id).or_default() += 1;
    }

    for result in results.iter_mut() {
        let proposal = result.proposed_identifier.as_str();
        if proposal.is_empty() {
            continue;
        }
        let in_batch = proposal_counts.get(proposal).copied().unwrap_or(0);
        let in_corpus = corpus_counts.get(proposal).copied().unwrap_or(0);
        if in_batch > 1 || in_corpus > 1 {
            result.status = MatchStatus::DuplicateInBatch;
            result.reason = format!(
                "identifier appears {} times in batch",
                in_batch.max(in_corpus)
            );
        }

        let target_entry = target(result);
        let competing: Vec<EntryId> = owners
            .get(proposal)
            .map(|ids| {
                ids.iter()
                    .copied()
                    .filter(|id| Some(*id) != target_entry)
                    .collect()
            })
            .unwrap_or_default();
        if !competing.is_empty() {
            result.status = MatchStatus::IdentifierTaken;
            result.reason = format!("identifier already held by entries {}", format_ids(&competing));
            result.competing_owners = competing;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CatalogEntry, ExternalRecord, StoredProduct};

    fn catalog(rows: &[(i64, &str, &str)]) -> Vec<CatalogEntry> {
        rows.iter()
            .map(|(id, name, sku)| CatalogEntry::from_stored(&StoredProduct::new(*id, name, sku)))
            .collect()
    }

    fn options(direction: MatchDirection) -> MatchOptions {
        MatchOptions::from_settings(&MatchSettings::default(), direction).unwrap()
    }

    #[test]
    fn test_exact_prefers_plain_code_over_variants() {
        let entries = catalog(&[(1, "A100 white", ""), (2, "A100 flex", ""), (3, "A100", "")]);
        let queries = vec![ExternalRecord::new(2, "X1", "A100", "")];
        let results = match_batch(&queries, &entries, &options(MatchDirection::ExternalToCatalog));
        let r = &results[0];
        assert_eq!(r.status, MatchStatus::Exact);
        assert_eq!(r.chosen, Some(2));
        assert_eq!(r.best_score, 3);
        // the flex variant is denied
        assert_eq!(r.candidates.len(), 2);
        assert_eq!(r.reason, "2 candidates, score=3");
    }

    #[test]
    fn test_shortest_name_wins_top_score_tie() {
        let entries = catalog(&[(1, "B5 long oak shelf", ""), (2, "B5 oak", ""), (3, "B5 ash", "")]);
        let queries = vec![ExternalRecord::new(2, "Q", "B5 something", "")];
        let r = &match_batch(&queries, &entries, &options(MatchDirection::ExternalToCatalog))[0];
        assert_eq!(r.status, MatchStatus::PlainBest);
        // equal lengths fall back to bucket order
        assert_eq!(r.chosen, Some(1));
        // display order puts the longest name first
        assert_eq!(r.candidates[0], 0);
    }

    #[test]
    fn test_all_denied_candidates_are_kept() {
        let entries = catalog(&[(1, "C7 flex", "")]);
        let queries = vec![ExternalRecord::new(2, "Q", "C7 shelf", "")];
        let r = &match_batch(&queries, &entries, &options(MatchDirection::ExternalToCatalog))[0];
        assert_eq!(r.candidates, vec![0]);
        assert_eq!(r.status, MatchStatus::Ambiguous);
        assert_eq!(r.chosen, None);
        assert_eq!(r.reason, "1 candidates, best_score=0");
    }

    #[test]
    fn test_not_found_reasons() {
        let entries = catalog(&[(1, "A100", "")]);
        let queries = vec![
            ExternalRecord::new(2, "", "(promo)", ""),
            ExternalRecord::new(3, "Q", "Z999 desk", ""),
        ];
        let results = match_batch(&queries, &entries, &options(MatchDirection::ExternalToCatalog));
        assert_eq!(results[0].status, MatchStatus::NotFound);
        assert_eq!(results[0].reason, "no head code");
        assert_eq!(results[1].status, MatchStatus::NotFound);
        assert_eq!(results[1].reason, "no candidates");
    }

    #[test]
    fn test_digit_fallback_yields_plain_best() {
        let entries = catalog(&[(1, "00460 cabinet", "")]);
        let records = vec![ExternalRecord::new(2, "K-460", "004G60 cabinet", "")];
        let r = &match_batch(&entries, &records, &options(MatchDirection::CatalogToExternal))[0];
        assert_eq!(r.path, RetrievalPath::Digits);
        assert_eq!(r.best_score, 2);
        assert_eq!(r.status, MatchStatus::PlainBest);
        assert_eq!(r.chosen, Some(0));
        assert!(r.reason.ends_with("via fallback:digits"));
    }

    #[test]
    fn test_matching_is_idempotent() {
        let entries = catalog(&[(1, "A100 white", ""), (2, "A100", ""), (3, "B5", "")]);
        let queries = vec![
            ExternalRecord::new(2, "X1", "A100 white 120x60", ""),
            ExternalRecord::new(3, "X2", "B5", ""),
        ];
        let opts = options(MatchDirection::ExternalToCatalog);
        assert_eq!(
            match_batch(&queries, &entries, &opts),
            match_batch(&queries, &entries, &opts)
        );
    }

    #[test]
    fn test_overlays_duplicate_then_taken() {
        let entries = catalog(&[(1, "A1", ""), (2, "B2", ""), (3, "C3", "Z9")]);
        let queries = vec![
            ExternalRecord::new(2, "X1", "A1", ""),
            ExternalRecord::new(3, "X1", "B2", ""),
            ExternalRecord::new(4, "Z9", "A1", ""),
            ExternalRecord::new(5, "Z9b", "C3", ""),
        ];
        let mut results =
            match_batch(&queries, &entries, &options(MatchDirection::ExternalToCatalog));
        for (r, q) in results.iter_mut().zip(&queries) {
            r.proposed_identifier = q.identifier_raw.clone();
        }
        let mut owners: IndexMap<String, Vec<EntryId>> = IndexMap::new();
        owners.insert("Z9".to_string(), vec![EntryId(3)]);
        let ids: Vec<&str> = queries.iter().map(|q| q.identifier_raw.as_str()).collect();
        apply_overlays(&mut results, &ids, &owners, |r| r.chosen.map(|i| entries[i].id));

        assert_eq!(results[0].status, MatchStatus::DuplicateInBatch);
        assert_eq!(results[1].status, MatchStatus::DuplicateInBatch);
        assert_eq!(results[2].status, MatchStatus::IdentifierTaken);
        assert_eq!(results[2].competing_owners, vec![EntryId(3)]);
        assert_eq!(results[2].reason, "identifier already held by entries [3]");
        assert_eq!(results[3].status, MatchStatus::Exact);
    }

    #[test]
    fn test_overlay_ignores_owner_that_is_the_target() {
        let entries = catalog(&[(3, "C3", "Z9")]);
        let queries = vec![ExternalRecord::new(2, "Z9", "C3", "")];
        let mut results =
            match_batch(&queries, &entries, &options(MatchDirection::ExternalToCatalog));
        results[0].proposed_identifier = "Z9".to_string();
        let mut owners: IndexMap<String, Vec<EntryId>> = IndexMap::new();
        owners.insert("Z9".to_string(), vec![EntryId(3)]);
        apply_overlays(&mut results, &["Z9"], &owners, |r| r.chosen.map(|i| entries[i].id));
        assert_eq!(results[0].status, MatchStatus::Exact);
    }

    #[test]
    fn test_debug_candidates_column() {
        let entries = catalog(&[(1, "A100 white", ""), (2, "A100", "")]);
        let queries = vec![ExternalRecord::new(2, "X1", "A100", "")];
        let r = &match_batch(&queries, &entries, &options(MatchDirection::ExternalToCatalog))[0];
        assert_eq!(r.debug_candidates(&entries), "2|A100; 1|A100 white");
    }
}
