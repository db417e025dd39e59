//! Shared scoring thresholds and retrieval bounds.

use std::ops::RangeInclusive;

// Score levels
pub const EXACT_SCORE: u8 = 3;
pub const MIN_ACCEPT_SCORE: u8 = 2;
pub const DIMENSION_BONUS: u8 = 1;

/// How many trailing ASCII letters one head code may add to another and still
/// be treated as the same product family (`ABC` vs `ABCD`, `00460` vs `00460G`).
pub const SUFFIX_TOLERANCE: RangeInclusive<usize> = 1..=3;

// Reports
pub const DEBUG_CANDIDATE_LIMIT: usize = 10;
pub const MAX_JOINED_NAMES_CHARS: usize = 1000;

// Tabular input
pub const SNIFF_SAMPLE_BYTES: usize = 4096;

/// True when `longer` is `shorter` followed by 1..=3 ASCII letters.
pub fn extends_by_letters(longer: &str, shorter: &str) -> bool {
    if shorter.is_empty() {
        return false;
    }
    let Some(tail) = longer.strip_prefix(shorter) else {
        return false;
    };
    SUFFIX_TOLERANCE.contains(&tail.len()) && tail.bytes().all(|b| b.is_ascii_alphabetic())
}

/// Cut `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
