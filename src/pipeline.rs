// 🚀 Validation Pipeline - load → normalize → index → validate → store
//
// Every input is loaded and checked before anything is written, so a
// missing file or column never leaves partial output behind.

use crate::config::PipelineConfig;
use crate::db::{RunRecord, SqliteStore};
use crate::engine::{validate_roster, LogProgress, ProgressObserver, ValidationContext};
use crate::error::PipelineResult;
use crate::index::{build_identifier_index, build_license_index, NameIndex};
use crate::materialize::{materialize, CsvSink, EnrichedRoster, RosterSink};
use crate::normalize::{derive_clean_phone, normalize_table};
use crate::quality::QualityReport;
use crate::roster::Roster;
use crate::table::Table;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Normalized input tables, keyed by role
#[derive(Debug, Clone)]
pub struct InputTables {
    pub roster: Table,
    /// (state, table) in configuration order
    pub licenses: Vec<(String, Table)>,
    pub identifier_registry: Table,
}

/// What a run produced, for printing or serving
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run: RunRecord,
    pub quality: QualityReport,
    pub license_indexes: Vec<IndexStats>,
    pub identifier_index: IndexStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub label: String,
    pub entries: usize,
    pub duplicates_dropped: usize,
}

impl IndexStats {
    fn of(index: &NameIndex) -> Self {
        IndexStats {
            label: index.label().to_string(),
            entries: index.len(),
            duplicates_dropped: index.duplicates_dropped(),
        }
    }
}

/// Result of `run_pipeline`: the report plus the store holding the enriched table
#[derive(Debug)]
pub struct PipelineOutput {
    pub report: RunReport,
    pub enriched: EnrichedRoster,
    pub store: SqliteStore,
}

// ============================================================================
// STAGES
// ============================================================================

fn load_table(path: &Path) -> PipelineResult<Table> {
    let table = Table::from_path(path)?;
    let table = normalize_table(&table)?;
    info!(path = %path.display(), rows = table.len(), columns = table.columns.len(), "table loaded");
    Ok(table)
}

/// Load and normalize every configured input
pub fn load_inputs(config: &PipelineConfig) -> PipelineResult<InputTables> {
    let mut roster = load_table(&config.inputs.roster)?;
    if let Some(phone) = &config.columns.normalized().phone {
        roster = derive_clean_phone(&roster, phone);
    }

    let licenses = config
        .inputs
        .licenses
        .iter()
        .map(|source| Ok((source.state.trim().to_uppercase(), load_table(&source.path)?)))
        .collect::<PipelineResult<Vec<_>>>()?;

    let identifier_registry = load_table(&config.inputs.identifier_registry)?;

    Ok(InputTables {
        roster,
        licenses,
        identifier_registry,
    })
}

/// Build the frozen validation context from loaded inputs
pub fn build_context(
    config: &PipelineConfig,
    inputs: &InputTables,
    as_of: DateTime<Utc>,
) -> PipelineResult<ValidationContext> {
    let columns = config.columns.normalized();
    let identifier_index = build_identifier_index(
        "identifier registry",
        &inputs.identifier_registry,
        &columns.identifier,
    )?;

    let mut ctx = ValidationContext::new(identifier_index, config.match_settings(), as_of);
    for (state, table) in &inputs.licenses {
        let index = build_license_index(&format!("{state} licenses"), table, &columns.license)?;
        ctx = ctx.with_license_index(state, index);
    }

    Ok(ctx)
}

/// Run the whole pipeline once
pub fn run_pipeline(config: &PipelineConfig) -> PipelineResult<PipelineOutput> {
    config.validate()?;

    let started_at = Utc::now();
    let as_of = config.run.as_of.unwrap_or(started_at);
    info!(as_of = %as_of, cutoff = config.matching.cutoff, "pipeline started");

    let columns = config.columns.normalized();
    let inputs = load_inputs(config)?;
    let roster = Roster::from_table(&inputs.roster, &columns.roster)?;
    let ctx = build_context(config, &inputs, as_of)?;

    let license_indexes: Vec<IndexStats> = ctx
        .states()
        .filter_map(|state| ctx.license_index(state))
        .map(IndexStats::of)
        .collect();
    let identifier_index = IndexStats::of(ctx.identifier_index());

    let every = config.run.progress_every.unwrap_or(0);
    let progress = LogProgress::new(roster.len(), every);
    let observer: Option<&dyn ProgressObserver> = if every > 0 {
        Some(&progress)
    } else {
        None
    };
    let results = validate_roster(&ctx, &roster.records, config.worker_count(), observer);

    let enriched = materialize(roster, results)?;

    let mut store = SqliteStore::open(&config.output.database, &config.output.table)?;
    store.store(&enriched)?;
    if let Some(csv) = &config.output.csv {
        CsvSink::new(csv).store(&enriched)?;
    }

    let run = RunRecord::new(
        started_at,
        as_of,
        config.matching.cutoff,
        &config.output.table,
        &enriched,
    );
    store.record_run(&run)?;

    let quality = QualityReport::from_roster(&enriched, &columns.roster.license_state);
    info!(
        run_id = %run.run_id,
        rows = run.rows,
        score = quality.overall.data_quality_score,
        "pipeline finished"
    );

    Ok(PipelineOutput {
        report: RunReport {
            run,
            quality,
            license_indexes,
            identifier_index,
        },
        enriched,
        store,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LicenseSource;
    use crate::db::{execute_query, get_runs};
    use crate::error::PipelineError;
    use chrono::TimeZone;
    use std::fs;
    use std::path::PathBuf;

    const ROSTER: &str = "\
Full Name,License State,License Number,NPI,Practice Phone
Jane Smith,NY,NY123,1111111111,(212) 555-0147
John Doe,CA,CA999,2222222222,555.123.4567
Ana Ruiz,TX,TX1,3333333333,
";

    const NY: &str = "\
Provider Name,License Number,Expiration Date
Jane Smith,NY123,2030-01-01
Jane Smith,NY000,2019-01-01
";

    const CA: &str = "\
provider_name,license_number,expiration_date
John Doe,CA999,2020-01-01
";

    const NPI: &str = "\
provider_first_name,provider_last_name,npi
Jane,Smith,1111111111
Ana,Ruiz,3333333333
";

    fn fixture(dir: &Path) -> PipelineConfig {
        let write = |name: &str, data: &str| {
            let path = dir.join(name);
            fs::write(&path, data).unwrap();
            path
        };

        let mut config = PipelineConfig::default();
        config.inputs.roster = write("roster.csv", ROSTER);
        config.inputs.identifier_registry = write("npi.csv", NPI);
        config.inputs.licenses = vec![
            LicenseSource::new("NY", write("ny.csv", NY)),
            LicenseSource::new("CA", write("ca.csv", CA)),
        ];
        config.run.as_of = Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        config.run.workers = Some(2);
        config.output.database = dir.join("out").join("roster.db");
        config.output.csv = Some(dir.join("out").join("enriched.csv"));
        config.columns.phone = Some("Practice Phone".to_string());
        config
    }

    #[test]
    fn test_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path());

        let output = run_pipeline(&config).unwrap();
        let flags: Vec<_> = output
            .enriched
            .results()
            .map(|r| (r.license_found, r.license_active, r.identifier_found))
            .collect();

        assert_eq!(
            flags,
            vec![(true, true, true), (true, false, false), (false, false, true)]
        );
        assert_eq!(output.enriched.attribute(0, "phone_number_clean"), Some("2125550147"));

        let report = &output.report;
        assert_eq!(report.run.rows, 3);
        assert_eq!(report.run.license_found, 2);
        assert_eq!(report.quality.overall.license_active, 1);
        assert_eq!(report.quality.by_state["TX"].license_found, 0);
        assert_eq!(report.license_indexes.len(), 2);
        assert_eq!(report.identifier_index.entries, 2);
        assert!(report
            .license_indexes
            .iter()
            .any(|s| s.label == "NY licenses" && s.duplicates_dropped == 1));

        let rows = execute_query(
            output.store.connection(),
            "SELECT full_name, is_license_found, is_license_active, is_npi_found FROM provider_roster ORDER BY rowid",
        )
        .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1]["full_name"], "John Doe");
        assert_eq!(rows[1]["is_license_found"], 1);
        assert_eq!(rows[1]["is_license_active"], 0);

        let runs = get_runs(output.store.connection()).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, report.run.run_id);

        let csv = Table::from_path(config.output.csv.as_ref().unwrap()).unwrap();
        assert_eq!(csv.len(), 3);
        assert_eq!(csv.columns.last().map(|c| c.as_str()), Some("is_npi_found"));
    }

    #[test]
    fn test_worker_count_does_not_change_results() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = fixture(dir.path());
        config.output.database = PathBuf::from(":memory:");
        config.output.csv = None;

        config.run.workers = Some(1);
        let single = run_pipeline(&config).unwrap().enriched;
        config.run.workers = Some(8);
        let many = run_pipeline(&config).unwrap().enriched;

        assert_eq!(single, many);
    }

    #[test]
    fn test_missing_input_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = fixture(dir.path());
        config.inputs.licenses[1].path = dir.path().join("missing.csv");

        let err = run_pipeline(&config).unwrap_err();

        assert!(matches!(err, PipelineError::DataLoad { ref path, .. } if path.ends_with("missing.csv")));
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_missing_roster_column_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path());
        fs::write(&config.inputs.roster, "full_name,license_state,npi\nJane Smith,NY,1\n").unwrap();

        let err = run_pipeline(&config).unwrap_err();

        assert!(matches!(err, PipelineError::Schema { ref column, .. } if column == "license_number"));
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_missing_reference_column() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path());
        fs::write(&config.inputs.identifier_registry, "provider_first_name,npi\nJane,1\n").unwrap();

        let err = run_pipeline(&config).unwrap_err();

        assert!(matches!(err, PipelineError::Schema { ref column, .. } if column == "provider_last_name"));
    }

    #[test]
    fn test_empty_roster() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = fixture(dir.path());
        fs::write(&config.inputs.roster, "full_name,license_state,license_number,npi\n").unwrap();
        config.output.csv = None;

        let output = run_pipeline(&config).unwrap();

        assert!(output.enriched.is_empty());
        assert_eq!(output.report.quality.overall.data_quality_score, 0.0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = fixture(dir.path());
        config.matching.cutoff = 150.0;

        assert!(matches!(run_pipeline(&config), Err(PipelineError::Config(_))));
    }
}
