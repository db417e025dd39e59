//! Shared typed models used across indexing, matching, storage, and reports.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::indexer::normalize::{
    extract_dimensions, extract_head_code, normalize_code, strip_parentheticals, Dimensions,
};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Primary key of a catalog entry, owned by the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub i64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EntryId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(EntryId)
    }
}

/// Render ids the way the reports list them: `[3, 17]`.
pub fn format_ids(ids: &[EntryId]) -> String {
    let inner: Vec<String> = ids.iter().map(ToString::to_string).collect();
    format!("[{}]", inner.join(", "))
}

// ---------------------------------------------------------------------------
// Matchable
// ---------------------------------------------------------------------------

/// The fields the indexer and scorer need from either side of a match.
pub trait Matchable {
    /// Head used when this record is the query.
    fn head_code(&self) -> &str;

    /// Head used to place this record in a candidate index, if any.
    fn index_key(&self) -> Option<&str>;

    fn raw_name(&self) -> &str;

    fn clean_name(&self) -> &str;

    fn dimensions(&self) -> &Dimensions;

    /// Short label for debug candidate listings.
    fn label(&self) -> String;
}

// ---------------------------------------------------------------------------
// ExternalRecord
// ---------------------------------------------------------------------------

/// Where an external record's head code came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeadSource {
    Name,
    Identifier,
    Missing,
}

/// One row of a supplied price list.
#[derive(Clone, Debug)]
pub struct ExternalRecord {
    /// Spreadsheet line number; the header is line 1.
    pub row: usize,
    pub identifier_raw: String,
    pub display_name_raw: String,
    pub display_name_clean: String,
    pub kind_raw: String,
    pub head_code: String,
    pub head_source: HeadSource,
    pub dimensions: Dimensions,
}

impl ExternalRecord {
    pub fn new(row: usize, code: &str, name: &str, kind: &str) -> Self {
        let identifier_raw = code.trim().to_string();
        let display_name_raw = name.trim().to_string();
        let display_name_clean = strip_parentheticals(&display_name_raw);
        let name_head = extract_head_code(&display_name_clean);
        let (head_code, head_source) = if !name_head.is_empty() {
            (name_head, HeadSource::Name)
        } else {
            let code_head = normalize_code(&identifier_raw);
            if code_head.is_empty() {
                (String::new(), HeadSource::Missing)
            } else {
                (code_head, HeadSource::Identifier)
            }
        };
        let dimensions = extract_dimensions(&display_name_clean);
        Self {
            row,
            identifier_raw,
            display_name_raw,
            display_name_clean,
            kind_raw: kind.trim().to_string(),
            head_code,
            head_source,
            dimensions,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.identifier_raw.is_empty() && self.display_name_raw.is_empty()
    }
}

impl Matchable for ExternalRecord {
    fn head_code(&self) -> &str {
        &self.head_code
    }

    // Only heads read from the name join; a code-derived head would let the
    // identifier itself drive the match.
    fn index_key(&self) -> Option<&str> {
        match self.head_source {
            HeadSource::Name => Some(&self.head_code),
            HeadSource::Identifier | HeadSource::Missing => None,
        }
    }

    fn raw_name(&self) -> &str {
        &self.display_name_raw
    }

    fn clean_name(&self) -> &str {
        &self.display_name_clean
    }

    fn dimensions(&self) -> &Dimensions {
        &self.dimensions
    }

    fn label(&self) -> String {
        format!("{}|{}", self.row, self.display_name_raw)
    }
}

// ---------------------------------------------------------------------------
// CatalogEntry
// ---------------------------------------------------------------------------

/// Raw product row as the store returns it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredProduct {
    pub id: EntryId,
    pub name: String,
    pub current_identifier: String,
}

impl StoredProduct {
    pub fn new(id: i64, name: &str, current_identifier: &str) -> Self {
        Self {
            id: EntryId(id),
            name: name.to_string(),
            current_identifier: current_identifier.to_string(),
        }
    }
}

/// A product from the catalog snapshot with its derived match keys.
#[derive(Clone, Debug)]
pub struct CatalogEntry {
    pub id: EntryId,
    pub display_name: String,
    pub display_name_clean: String,
    pub head_code: String,
    pub dimensions: Dimensions,
    pub current_identifier: String,
}

impl CatalogEntry {
    pub fn from_stored(product: &StoredProduct) -> Self {
        let display_name_clean = strip_parentheticals(&product.name);
        Self {
            id: product.id,
            display_name: product.name.clone(),
            head_code: extract_head_code(&display_name_clean),
            dimensions: extract_dimensions(&display_name_clean),
            display_name_clean,
            current_identifier: product.current_identifier.trim().to_string(),
        }
    }
}

impl Matchable for CatalogEntry {
    fn head_code(&self) -> &str {
        &self.head_code
    }

    fn index_key(&self) -> Option<&str> {
        if self.head_code.is_empty() {
            None
        } else {
            Some(&self.head_code)
        }
    }

    fn raw_name(&self) -> &str {
        &self.display_name
    }

    fn clean_name(&self) -> &str {
        &self.display_name_clean
    }

    fn dimensions(&self) -> &Dimensions {
        &self.dimensions
    }

    fn label(&self) -> String {
        format!("{}|{}", self.id, self.display_name)
    }
}

// ---------------------------------------------------------------------------
// Statuses and outcomes
// ---------------------------------------------------------------------------

/// Which corpus plays the query role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchDirection {
    /// Each price-list row looks for its catalog product.
    ExternalToCatalog,
    /// Each catalog product looks for its price-list row.
    CatalogToExternal,
}

impl MatchDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchDirection::ExternalToCatalog => "external_to_catalog",
            MatchDirection::CatalogToExternal => "catalog_to_external",
        }
    }
}

/// Terminal classification of one query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Exact,
    PlainBest,
    Ambiguous,
    NotFound,
    DuplicateInBatch,
    IdentifierTaken,
}

impl MatchStatus {
    pub const ALL: [MatchStatus; 6] = [
        MatchStatus::Exact,
        MatchStatus::PlainBest,
        MatchStatus::Ambiguous,
        MatchStatus::NotFound,
        MatchStatus::DuplicateInBatch,
        MatchStatus::IdentifierTaken,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Exact => "exact",
            MatchStatus::PlainBest => "plain_best",
            MatchStatus::Ambiguous => "ambiguous",
            MatchStatus::NotFound => "not_found",
            MatchStatus::DuplicateInBatch => "duplicate_in_batch",
            MatchStatus::IdentifierTaken => "identifier_taken",
        }
    }

    pub fn parse(value: &str) -> Option<MatchStatus> {
        let value = value.trim();
        MatchStatus::ALL.into_iter().find(|s| s.as_str() == value)
    }

    /// Only these statuses may lead to a write without review.
    pub fn is_auto_applicable(&self) -> bool {
        matches!(self, MatchStatus::Exact | MatchStatus::PlainBest)
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened (or would happen) to one proposed update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOutcome {
    Ok,
    WouldUpdate,
    Noop,
    Conflict,
    Skip,
    Error,
}

impl UpdateOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateOutcome::Ok => "ok",
            UpdateOutcome::WouldUpdate => "would_update",
            UpdateOutcome::Noop => "noop",
            UpdateOutcome::Conflict => "conflict",
            UpdateOutcome::Skip => "skip",
            UpdateOutcome::Error => "error",
        }
    }

    pub fn is_problem(&self) -> bool {
        matches!(
            self,
            UpdateOutcome::Conflict | UpdateOutcome::Skip | UpdateOutcome::Error
        )
    }
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dry run or apply; a run is always exactly one of the two.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    DryRun,
    Apply,
}

impl RunMode {
    /// Build the mode from the two command-line switches.
    pub fn from_flags(dry_run: bool, apply: bool) -> crate::errors::ReconcileResult<RunMode> {
        match (dry_run, apply) {
            (true, false) => Ok(RunMode::DryRun),
            (false, true) => Ok(RunMode::Apply),
            _ => Err(crate::errors::ReconcileError::Config(
                "choose exactly one mode: --dry-run or --apply".to_string(),
            )),
        }
    }

    /// Outcome recorded for an accepted update in this mode.
    pub fn accepted_outcome(&self) -> UpdateOutcome {
        match self {
            RunMode::DryRun => UpdateOutcome::WouldUpdate,
            RunMode::Apply => UpdateOutcome::Ok,
        }
    }
}
