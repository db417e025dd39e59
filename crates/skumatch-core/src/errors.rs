//! Error types for the skumatch core library.

/// Top-level error enum for the skumatch core library.
///
/// Only run-level failures travel through this type. Per-row problems
/// (ambiguous matches, conflicts, unknown entries) are outcomes recorded in
/// the reports, never errors.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Input error: {0}")]
    Input(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Transaction rolled back: {0}")]
    Transaction(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ReconcileError {
    /// True for failures that abort a run before any row is processed.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            ReconcileError::Config(_) | ReconcileError::Regex(_) | ReconcileError::Toml(_)
        )
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
