//! Match-quality score between one query and one candidate.
//!
//! Scores are small integers: 3 for a name that is exactly the head code,
//! 2 for a name that starts with it (or, matching catalog entries against the
//! price list, for related head codes), plus a one-point bonus when the two
//! sides share a dimension value.

use regex::{Regex, RegexBuilder};

use crate::errors::ReconcileResult;
use crate::indexer::normalize::digits_only;
use crate::models::{MatchDirection, Matchable};
use crate::query::guards::{extends_by_letters, DIMENSION_BONUS, EXACT_SCORE, MIN_ACCEPT_SCORE};

pub const DENY_EXTERNAL_TO_CATALOG: &str = r"\bFLEX\b|^\s*[УU]\d+-";
pub const DENY_CATALOG_TO_EXTERNAL: &str = r"\bFLEX\b|^\s*[УU]\d+-|\bРАСПРОДАЖА\b|\bSALE\b";

/// Characters that may trail the head code in an exact-name match.
const TRAILING_PUNCTUATION: &[char] = &['.', ',', '/', '–', '-'];

pub fn default_deny_pattern(direction: MatchDirection) -> &'static str {
    match direction {
        MatchDirection::ExternalToCatalog => DENY_EXTERNAL_TO_CATALOG,
        MatchDirection::CatalogToExternal => DENY_CATALOG_TO_EXTERNAL,
    }
}

/// Deny patterns are always case-insensitive.
pub fn compile_deny_pattern(pattern: &str) -> ReconcileResult<Regex> {
    Ok(RegexBuilder::new(pattern).case_insensitive(true).build()?)
}

/// `name` is the head, optionally followed by a run of trailing punctuation.
fn is_exact_name(name_upper: &str, head: &str) -> bool {
    match name_upper.trim().strip_prefix(head) {
        Some(rest) => rest.trim().chars().all(|c| TRAILING_PUNCTUATION.contains(&c)),
        None => false,
    }
}

/// Head codes from the two corpora name the same product family.
fn heads_related(query_head: &str, candidate_head: &str) -> bool {
    if candidate_head.is_empty() {
        return false;
    }
    if query_head == candidate_head
        || extends_by_letters(query_head, candidate_head)
        || extends_by_letters(candidate_head, query_head)
    {
        return true;
    }
    let query_digits = digits_only(query_head);
    !query_digits.is_empty() && query_digits == digits_only(candidate_head)
}

fn base_score<Q, C>(query: &Q, candidate: &C, direction: MatchDirection, deny: &Regex) -> u8
where
    Q: Matchable + ?Sized,
    C: Matchable + ?Sized,
{
    let head = query.head_code();
    if head.is_empty() {
        return 0;
    }
    let name_upper = candidate.clean_name().to_uppercase();
    if is_exact_name(&name_upper, head) {
        return EXACT_SCORE;
    }
    if name_upper.starts_with(head) && !deny.is_match(candidate.raw_name()) {
        return MIN_ACCEPT_SCORE;
    }
    if direction == MatchDirection::CatalogToExternal
        && heads_related(head, candidate.head_code())
    {
        return MIN_ACCEPT_SCORE;
    }
    0
}

/// Score in `0..=4`.
pub fn score<Q, C>(query: &Q, candidate: &C, direction: MatchDirection, deny: &Regex) -> u8
where
    Q: Matchable + ?Sized,
    C: Matchable + ?Sized,
{
    let base = base_score(query, candidate, direction, deny);
    if base >= MIN_ACCEPT_SCORE && query.dimensions().shares_any(candidate.dimensions()) {
        base + DIMENSION_BONUS
    } else {
        base
    }
}
