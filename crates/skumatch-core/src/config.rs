//! Run configuration: defaults, optional TOML file, environment overrides.
//!
//! Command-line flags are applied last by the binary on top of whatever this
//! module produces.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::errors::{ReconcileError, ReconcileResult};
use crate::models::{MatchDirection, MatchStatus};
use crate::query::scorer::{compile_deny_pattern, default_deny_pattern};

pub const ENV_DENY_PATTERN: &str = "SKUMATCH_DENY_PATTERN";
pub const ENV_FALLBACK: &str = "SKUMATCH_FALLBACK";

static SQL_IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Parse an on/off toggle; `None` for anything unrecognised.
pub fn parse_toggle(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct MatchSettings {
    /// Replaces the direction's built-in deny pattern when set.
    pub deny_pattern: Option<String>,
    /// Forces relaxed retrieval on or off; unset means the direction default.
    pub fallback: Option<bool>,
    pub debug_candidates: bool,
}

impl MatchSettings {
    pub fn deny_regex(&self, direction: MatchDirection) -> ReconcileResult<Regex> {
        let pattern = self
            .deny_pattern
            .as_deref()
            .unwrap_or_else(|| default_deny_pattern(direction));
        compile_deny_pattern(pattern)
    }

    pub fn fallback_for(&self, direction: MatchDirection) -> bool {
        self.fallback.unwrap_or(match direction {
            MatchDirection::ExternalToCatalog => false,
            MatchDirection::CatalogToExternal => true,
        })
    }
}

/// Header labels accepted for each input column, tried in order.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ColumnAliases {
    pub code: Vec<String>,
    pub name: Vec<String>,
    pub kind: Vec<String>,
}

impl Default for ColumnAliases {
    fn default() -> Self {
        Self {
            code: strings(&["код", "code"]),
            name: strings(&["наименование", "название", "name"]),
            kind: strings(&["тип", "type"]),
        }
    }
}

impl ColumnAliases {
    /// Put user-chosen labels in front of the defaults.
    pub fn prefer(&mut self, code: Option<&str>, name: Option<&str>, kind: Option<&str>) {
        for (list, preferred) in [
            (&mut self.code, code),
            (&mut self.name, name),
            (&mut self.kind, kind),
        ] {
            if let Some(label) = preferred.filter(|l| !l.trim().is_empty()) {
                list.insert(0, label.to_string());
            }
        }
    }
}

/// Where the catalog lives in the SQLite database.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub table: String,
    pub id_column: String,
    pub name_column: String,
    pub identifier_column: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            table: "products_product".to_string(),
            id_column: "id".to_string(),
            name_column: "title".to_string(),
            identifier_column: "sku".to_string(),
        }
    }
}

impl StoreSettings {
    /// Table and column names are spliced into SQL, so only plain
    /// identifiers are accepted.
    pub fn validate(&self) -> ReconcileResult<()> {
        for (what, value) in [
            ("table", &self.table),
            ("id column", &self.id_column),
            ("name column", &self.name_column),
            ("identifier column", &self.identifier_column),
        ] {
            if !SQL_IDENT_RE.is_match(value) {
                return Err(ReconcileError::Config(format!(
                    "invalid store {what} name: {value:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Columns and status filter for applying a reviewed matches report.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PlanSettings {
    pub id_columns: Vec<String>,
    pub identifier_columns: Vec<String>,
    pub status_columns: Vec<String>,
    pub allowed_statuses: Vec<String>,
}

impl Default for PlanSettings {
    fn default() -> Self {
        Self {
            id_columns: strings(&["entry_id", "product_id"]),
            identifier_columns: strings(&["new_identifier", "new_sku"]),
            status_columns: strings(&["match_status"]),
            allowed_statuses: strings(&["exact", "plain_best"]),
        }
    }
}

impl PlanSettings {
    /// Parse a comma-separated status list such as `exact,plain_best`; an
    /// empty list restores the defaults.
    pub fn set_allowed_statuses(&mut self, list: &str) {
        let statuses: Vec<String> = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        self.allowed_statuses = if statuses.is_empty() {
            PlanSettings::default().allowed_statuses
        } else {
            statuses
        };
    }

    pub fn allowed(&self) -> ReconcileResult<Vec<MatchStatus>> {
        self.allowed_statuses
            .iter()
            .map(|s| {
                MatchStatus::parse(s)
                    .ok_or_else(|| ReconcileError::Config(format!("unknown match status: {s:?}")))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// ReconcileConfig
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    #[serde(rename = "match")]
    pub match_settings: MatchSettings,
    pub columns: ColumnAliases,
    pub store: StoreSettings,
    pub plan: PlanSettings,
}

impl ReconcileConfig {
    pub fn from_toml_str(text: &str) -> ReconcileResult<Self> {
        let config: ReconcileConfig = toml::from_str(text)?;
        config.store.validate()?;
        Ok(config)
    }

    /// Defaults, then the file if given, then the process environment.
    pub fn load(path: Option<&Path>) -> ReconcileResult<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    ReconcileError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                ReconcileConfig::from_toml_str(&text)?
            }
            None => ReconcileConfig::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> ReconcileResult<()> {
        if let Some(pattern) = lookup(ENV_DENY_PATTERN).filter(|p| !p.trim().is_empty()) {
            self.match_settings.deny_pattern = Some(pattern);
        }
        if let Some(raw) = lookup(ENV_FALLBACK) {
            let toggle = parse_toggle(&raw).ok_or_else(|| {
                ReconcileError::Config(format!("{ENV_FALLBACK} must be on or off, got {raw:?}"))
            })?;
            self.match_settings.fallback = Some(toggle);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReconcileConfig::default();
        assert_eq!(config.store.table, "products_product");
        assert_eq!(config.columns.code, vec!["код", "code"]);
        assert!(!config.match_settings.fallback_for(MatchDirection::ExternalToCatalog));
        assert!(config.match_settings.fallback_for(MatchDirection::CatalogToExternal));
        assert_eq!(
            config.plan.allowed().unwrap(),
            vec![MatchStatus::Exact, MatchStatus::PlainBest]
        );
    }

    #[test]
    fn test_from_toml_partial_sections() {
        let config = ReconcileConfig::from_toml_str(
            r#"
            [match]
            fallback = true
            debug_candidates = true

            [store]
            table = "catalog_item"
            "#,
        )
        .unwrap();
        assert!(config.match_settings.fallback_for(MatchDirection::ExternalToCatalog));
        assert!(config.match_settings.debug_candidates);
        assert_eq!(config.store.table, "catalog_item");
        assert_eq!(config.store.identifier_column, "sku");
    }

    #[test]
    fn test_invalid_store_identifier_is_config_error() {
        let err = ReconcileConfig::from_toml_str("[store]\ntable = \"x; drop table y\"\n")
            .unwrap_err();
        assert!(err.is_config());
        let err = ReconcileConfig::from_toml_str("[store\n").unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ReconcileConfig::default();
        config
            .apply_env(|key| match key {
                ENV_DENY_PATTERN => Some(r"\bOLD\b".to_string()),
                ENV_FALLBACK => Some("Off".to_string()),
                _ => None,
            })
            .unwrap();
        assert!(!config.match_settings.fallback_for(MatchDirection::CatalogToExternal));
        let deny = config
            .match_settings
            .deny_regex(MatchDirection::ExternalToCatalog)
            .unwrap();
        assert!(deny.is_match("shelf old"));

        let err = config
            .apply_env(|key| (key == ENV_FALLBACK).then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_bad_deny_pattern_is_config_error() {
        let settings = MatchSettings {
            deny_pattern: Some("(".to_string()),
            ..MatchSettings::default()
        };
        assert!(settings
            .deny_regex(MatchDirection::ExternalToCatalog)
            .unwrap_err()
            .is_config());
    }

    #[test]
    fn test_prefer_and_allowed_statuses() {
        let mut columns = ColumnAliases::default();
        columns.prefer(Some("Артикул"), None, Some(" "));
        assert_eq!(columns.code[0], "Артикул");
        assert_eq!(columns.kind, vec!["тип", "type"]);

        let mut plan = PlanSettings::default();
        plan.set_allowed_statuses("exact, ,bogus");
        assert!(plan.allowed().unwrap_err().is_config());
        plan.set_allowed_statuses("exact");
        assert_eq!(plan.allowed().unwrap(), vec![MatchStatus::Exact]);
    }

    #[test]
    fn test_parse_toggle() {
        assert_eq!(parse_toggle(" YES "), Some(true));
        assert_eq!(parse_toggle("0"), Some(false));
        assert_eq!(parse_toggle(""), None);
    }

    #[test]
    fn test_empty_allowed_statuses_restore_defaults() {
        let mut plan = PlanSettings::default();
        plan.set_allowed_statuses("ambiguous");
        assert_eq!(plan.allowed().unwrap(), vec![MatchStatus::Ambiguous]);
        plan.set_allowed_statuses(" , ");
        assert_eq!(
            plan.allowed().unwrap(),
            vec![MatchStatus::Exact, MatchStatus::PlainBest]
        );
    }
}
