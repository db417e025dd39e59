use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use skumatch_core::config::ReconcileConfig;
use skumatch_core::models::{MatchDirection, RunMode};
use skumatch_core::prep::{
    dedupe_exact, merge_prices, scan_code_conflicts, strip_name_column, PriceColumns,
    CODE_CONFLICT_HEADERS, PRICE_MISS_HEADERS,
};
use skumatch_core::query::plan::apply_plan;
use skumatch_core::query::reconcile::reconcile;
use skumatch_core::report::{
    RunSummary, MATCH_HEADERS, PLAN_HEADERS, PROBLEM_HEADERS, ROW_REF_HEADERS,
};
use skumatch_core::store::database::SqliteCatalogStore;
use skumatch_core::tabular::{read_table, write_report, write_table};

#[derive(Parser)]
#[command(name = "skumatch")]
#[command(about = "Reconcile catalog product identifiers against a supplier price list")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StoreArgs {
    /// SQLite catalog database
    #[arg(long)]
    db: PathBuf,
    /// Products table, overrides the configured one
    #[arg(long)]
    table: Option<String>,
}

#[derive(Args)]
struct ModeArgs {
    /// Report what would change without writing
    #[arg(long)]
    dry_run: bool,
    /// Write accepted updates in one transaction
    #[arg(long)]
    apply: bool,
}

#[derive(Args)]
struct MatchArgs {
    /// Regex of name variants to leave out of candidate lists
    #[arg(long)]
    deny_pattern: Option<String>,
    /// Enable relaxed retrieval (prefix, suffix and digit-only keys)
    #[arg(long, conflicts_with = "no_fallback")]
    fallback: bool,
    #[arg(long)]
    no_fallback: bool,
    /// Add the top ranked candidates to the matches report
    #[arg(long)]
    debug_candidates: bool,
}

#[derive(Args)]
struct ColumnArgs {
    #[arg(long)]
    code_col: Option<String>,
    #[arg(long)]
    name_col: Option<String>,
    #[arg(long)]
    type_col: Option<String>,
}

#[derive(Args)]
struct ReportArgs {
    #[arg(long, default_value = "reports/matches.csv")]
    report: PathBuf,
    #[arg(long, default_value = "reports/problems.csv")]
    problems: PathBuf,
    /// Also write the run summary as JSON
    #[arg(long)]
    summary_json: Option<PathBuf>,
}

#[derive(Args)]
struct ReconcileArgs {
    input: PathBuf,
    #[command(flatten)]
    store: StoreArgs,
    #[command(flatten)]
    mode: ModeArgs,
    #[command(flatten)]
    matching: MatchArgs,
    #[command(flatten)]
    columns: ColumnArgs,
    #[command(flatten)]
    reports: ReportArgs,
    /// Non-blank input rows no accepted match consumed
    #[arg(long, default_value = "reports/unused.csv")]
    unused_report: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Match price list rows to catalog entries and assign their codes
    Assign(ReconcileArgs),
    /// Match catalog entries to price list rows and assign their codes
    AssignByDb(ReconcileArgs),
    /// Apply a reviewed matches report
    ApplyPlan {
        plan: PathBuf,
        #[command(flatten)]
        store: StoreArgs,
        #[command(flatten)]
        mode: ModeArgs,
        /// Comma-separated statuses eligible for update
        #[arg(long)]
        allowed_statuses: Option<String>,
        #[command(flatten)]
        reports: ReportArgs,
    },
    /// Report codes shared by products with different names
    ScanDupes {
        input: PathBuf,
        #[command(flatten)]
        columns: ColumnArgs,
        #[arg(long, default_value = "reports/code_conflicts.csv")]
        out: PathBuf,
    },
    /// Drop rows repeating an earlier (code, name) pair
    Dedupe {
        input: PathBuf,
        #[command(flatten)]
        columns: ColumnArgs,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value = "reports/removed_duplicates.csv")]
        removed_report: PathBuf,
    },
    /// Remove parenthesised fragments from the name column
    StripNames {
        input: PathBuf,
        #[command(flatten)]
        columns: ColumnArgs,
        #[arg(long)]
        out: PathBuf,
    },
    /// Copy prices into a deduplicated list by code
    MergePrices {
        unique: PathBuf,
        prices: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value = "reports/price_missing.csv")]
        missing_report: PathBuf,
        #[arg(long)]
        code_col: Option<String>,
        #[arg(long)]
        name_col: Option<String>,
        #[arg(long)]
        price_col: Option<String>,
        #[arg(long)]
        result_price_col: Option<String>,
    },
    /// Create the products table in a local database
    InitDb {
        #[command(flatten)]
        store: StoreArgs,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("skumatch=info,skumatch_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ---------------------------------------------------------------------------
// Flag handling
// ---------------------------------------------------------------------------

impl StoreArgs {
    fn apply_to(&self, config: &mut ReconcileConfig) {
        if let Some(table) = &self.table {
            config.store.table = table.clone();
        }
    }

    fn open(&self, config: &ReconcileConfig) -> Result<SqliteCatalogStore> {
        SqliteCatalogStore::open(&self.db, config.store.clone())
            .with_context(|| format!("opening catalog {}", self.db.display()))
    }
}

impl ModeArgs {
    fn mode(&self) -> Result<RunMode> {
        Ok(RunMode::from_flags(self.dry_run, self.apply)?)
    }
}

impl MatchArgs {
    fn apply_to(&self, config: &mut ReconcileConfig) {
        if let Some(pattern) = &self.deny_pattern {
            config.match_settings.deny_pattern = Some(pattern.clone());
        }
        if self.fallback {
            config.match_settings.fallback = Some(true);
        }
        if self.no_fallback {
            config.match_settings.fallback = Some(false);
        }
        if self.debug_candidates {
            config.match_settings.debug_candidates = true;
        }
    }
}

impl ColumnArgs {
    fn apply_to(&self, config: &mut ReconcileConfig) {
        config.columns.prefer(
            self.code_col.as_deref(),
            self.name_col.as_deref(),
            self.type_col.as_deref(),
        );
    }
}

fn finish_summary(summary: &RunSummary, path: Option<&Path>) -> Result<()> {
    if let Some(path) = path {
        summary.write_json(path)?;
        info!(path = %path.display(), "summary written");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Delimiter assumed when sniffing the input fails.
fn fallback_delimiter(direction: MatchDirection) -> u8 {
    match direction {
        MatchDirection::ExternalToCatalog => b',',
        MatchDirection::CatalogToExternal => b';',
    }
}

fn run_reconcile(
    mut config: ReconcileConfig,
    direction: MatchDirection,
    args: &ReconcileArgs,
) -> Result<()> {
    let mode = args.mode.mode()?;
    args.store.apply_to(&mut config);
    args.matching.apply_to(&mut config);
    args.columns.apply_to(&mut config);

    let table = read_table(&args.input, fallback_delimiter(direction))
        .with_context(|| format!("reading {}", args.input.display()))?;
    let mut catalog = args.store.open(&config)?;
    let output = reconcile(&mut catalog, &table, direction, mode, &config)?;

    let reports = &args.reports;
    write_report(&reports.report, MATCH_HEADERS, &output.matches, table.delimiter)?;
    write_report(&reports.problems, PROBLEM_HEADERS, &output.problems, table.delimiter)?;
    write_report(&args.unused_report, ROW_REF_HEADERS, &output.unused, table.delimiter)?;
    info!(
        unused = output.unused.len(),
        path = %args.unused_report.display(),
        "unused rows written"
    );
    if direction == MatchDirection::CatalogToExternal {
        println!(
            "coverage: {}/{} entries ({}%)",
            output.summary.covered,
            output.summary.rows,
            output.summary.coverage_percent()
        );
    }
    finish_summary(&output.summary, reports.summary_json.as_deref())
}

fn run_apply_plan(
    mut config: ReconcileConfig,
    plan: &Path,
    store: &StoreArgs,
    mode: &ModeArgs,
    allowed_statuses: Option<&str>,
    reports: &ReportArgs,
) -> Result<()> {
    let mode = mode.mode()?;
    store.apply_to(&mut config);
    if let Some(list) = allowed_statuses {
        config.plan.set_allowed_statuses(list);
    }
    let table = read_table(plan, b',').with_context(|| format!("reading {}", plan.display()))?;
    let mut catalog = store.open(&config)?;
    let output = apply_plan(&mut catalog, &table, mode, &config.plan)?;

    write_report(&reports.report, PLAN_HEADERS, &output.rows, table.delimiter)?;
    write_report(&reports.problems, PROBLEM_HEADERS, &output.problems, table.delimiter)?;
    finish_summary(&output.summary, reports.summary_json.as_deref())
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let mut config = ReconcileConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Assign(args) => {
            run_reconcile(config, MatchDirection::ExternalToCatalog, &args)?
        }
        Commands::AssignByDb(args) => {
            run_reconcile(config, MatchDirection::CatalogToExternal, &args)?
        }
        Commands::ApplyPlan {
            plan,
            store,
            mode,
            allowed_statuses,
            reports,
        } => run_apply_plan(
            config,
            &plan,
            &store,
            &mode,
            allowed_statuses.as_deref(),
            &reports,
        )?,
        Commands::ScanDupes {
            input,
            columns,
            out,
        } => {
            columns.apply_to(&mut config);
            let table = read_table(&input, b';')?;
            let conflicts = scan_code_conflicts(&table, &config.columns)?;
            write_report(&out, CODE_CONFLICT_HEADERS, &conflicts, table.delimiter)?;
            if !conflicts.is_empty() {
                warn!(codes = conflicts.len(), path = %out.display(), "codes with differing names");
            }
        }
        Commands::Dedupe {
            input,
            columns,
            out,
            removed_report,
        } => {
            columns.apply_to(&mut config);
            let table = read_table(&input, b';')?;
            let (unique, removed) = dedupe_exact(&table, &config.columns)?;
            write_table(&out, &unique)?;
            write_report(&removed_report, ROW_REF_HEADERS, &removed, table.delimiter)?;
        }
        Commands::StripNames {
            input,
            columns,
            out,
        } => {
            columns.apply_to(&mut config);
            let table = read_table(&input, b';')?;
            let (clean, changed) = strip_name_column(&table, &config.columns)?;
            write_table(&out, &clean)?;
            info!(changed, path = %out.display(), "names cleaned");
        }
        Commands::MergePrices {
            unique,
            prices,
            out,
            missing_report,
            code_col,
            name_col,
            price_col,
            result_price_col,
        } => {
            let mut price_columns = PriceColumns::default();
            if let Some(code) = code_col {
                price_columns.code = code;
            }
            if let Some(name) = name_col {
                price_columns.name = name;
            }
            if let Some(price) = price_col {
                price_columns.result_price = result_price_col.unwrap_or_else(|| price.clone());
                price_columns.price = price;
            } else if let Some(result) = result_price_col {
                price_columns.result_price = result;
            }
            let unique_table = read_table(&unique, b';')?;
            let price_table = read_table(&prices, b';')?;
            let (merged, missing) = merge_prices(&unique_table, &price_table, &price_columns)?;
            write_table(&out, &merged)?;
            write_report(&missing_report, PRICE_MISS_HEADERS, &missing, b';')?;
        }
        Commands::InitDb { store } => {
            store.apply_to(&mut config);
            SqliteCatalogStore::create(&store.db, config.store.clone())
                .with_context(|| format!("creating {}", store.db.display()))?;
            info!(path = %store.db.display(), table = %config.store.table, "database ready");
        }
    }
    Ok(())
}
