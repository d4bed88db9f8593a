use anyhow::{Context, Result};
use rusqlite::Connection;
use std::env;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use provider_validation::{
    describe_schema, load_flags, run_pipeline, PipelineConfig, QualityReport, QualitySummary,
    RosterColumns,
};

const DEFAULT_CONFIG: &str = "provider-validation.toml";

fn main() -> Result<()> {
    init_tracing();

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        None | Some("validate") => run_validate(args.get(2).map(|s| s.as_str()))?,
        Some("summary") => {
            let db = args.get(2).context("usage: provider-validation summary <db> [table]")?;
            run_summary(Path::new(db), args.get(3).map(|s| s.as_str()))?;
        }
        Some("schema") => {
            let db = args.get(2).context("usage: provider-validation schema <db>")?;
            run_schema(Path::new(db))?;
        }
        Some(other) => {
            eprintln!("❌ Unknown command: {}", other);
            print_usage();
            std::process::exit(2);
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("provider_validation=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  provider-validation validate [config.toml]   run the pipeline");
    eprintln!("  provider-validation summary <db> [table]     data quality of a stored run");
    eprintln!("  provider-validation schema <db>              list tables and columns");
}

fn load_config(path: Option<&str>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_path(Path::new(path))
            .with_context(|| format!("Failed to load config {}", path)),
        None if Path::new(DEFAULT_CONFIG).exists() => PipelineConfig::from_path(Path::new(DEFAULT_CONFIG))
            .with_context(|| format!("Failed to load config {}", DEFAULT_CONFIG)),
        None => Ok(PipelineConfig::default()),
    }
}

fn run_validate(config_path: Option<&str>) -> Result<()> {
    println!("🩺 Provider Validation - roster vs licenses + NPI registry");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = load_config(config_path)?.with_progress_default(100);

    let output = match run_pipeline(&config) {
        Ok(output) => output,
        Err(e) if e.is_input_error() => {
            eprintln!("❌ {}", e);
            eprintln!("   Check the [inputs] paths and [columns] contracts in the config.");
            eprintln!("   Nothing was written.");
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("Validation pipeline failed"),
    };
    let report = &output.report;

    println!("\n📚 Reference indexes:");
    for stats in report.license_indexes.iter().chain(std::iter::once(&report.identifier_index)) {
        println!(
            "  {:<24} {:>6} names ({} duplicates dropped)",
            stats.label, stats.entries, stats.duplicates_dropped
        );
    }

    print_quality(&report.quality);

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ Run {} stored in table '{}'", report.run.run_id, report.run.table_name);
    println!("   Database: {}", config.output.database.display());
    if let Some(csv) = &config.output.csv {
        println!("   CSV:      {}", csv.display());
    }

    Ok(())
}

fn run_summary(db_path: &Path, table: Option<&str>) -> Result<()> {
    let conn = open_existing(db_path)?;
    let table = table.unwrap_or(provider_validation::db::DEFAULT_TABLE);
    let state_column = RosterColumns::default().license_state;

    let rows = load_flags(&conn, table, &state_column)
        .with_context(|| format!("Failed to read flags from table '{}'", table))?;

    print_quality(&QualityReport::from_flags(&rows));
    Ok(())
}

fn run_schema(db_path: &Path) -> Result<()> {
    let conn = open_existing(db_path)?;
    print!("{}", describe_schema(&conn)?);
    Ok(())
}

fn open_existing(db_path: &Path) -> Result<Connection> {
    if !db_path.exists() {
        anyhow::bail!("Database not found: {}", db_path.display());
    }
    Connection::open(db_path).with_context(|| format!("Failed to open {}", db_path.display()))
}

fn print_quality(report: &QualityReport) {
    println!("\n📊 Data quality:");
    print_summary_line("ALL", &report.overall);

    if !report.by_state.is_empty() {
        println!("\n   By claimed state:");
        for (state, summary) in &report.by_state {
            let state = if state.is_empty() { "(none)" } else { state.as_str() };
            print_summary_line(state, summary);
        }
    }
}

fn print_summary_line(label: &str, summary: &QualitySummary) {
    println!(
        "  {:<8} {:>6} providers | license found {:>5.1}% | active {:>5.1}% | NPI {:>5.1}% | score {:>5.1}%",
        label,
        summary.total_providers,
        summary.license_found_rate() * 100.0,
        summary.license_active_rate() * 100.0,
        summary.identifier_found_rate() * 100.0,
        summary.data_quality_score * 100.0,
    );
}
