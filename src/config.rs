// ⚙️ Pipeline Configuration - TOML file, every field defaulted
//
// [inputs]   roster, identifier registry, one license table per state
// [matching] cutoff + identifier comparison
// [run]      worker count, as-of timestamp
// [output]   SQLite database/table, optional CSV
// [columns]  column contracts for each input role

use crate::db::is_reserved_table;
use crate::engine::{IdentifierComparison, MatchSettings};
use crate::error::{PipelineError, PipelineResult};
use crate::index::{IdentifierColumns, LicenseColumns};
use crate::matcher::DEFAULT_CUTOFF;
use crate::normalize::normalize_column_name;
use crate::roster::RosterColumns;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub inputs: InputsConfig,
    pub matching: MatchingConfig,
    pub run: RunConfig,
    pub output: OutputConfig,
    pub columns: ColumnsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputsConfig {
    pub roster: PathBuf,
    pub identifier_registry: PathBuf,
    pub licenses: Vec<LicenseSource>,
}

impl Default for InputsConfig {
    fn default() -> Self {
        InputsConfig {
            roster: PathBuf::from("data/provider_roster_with_errors.csv"),
            identifier_registry: PathBuf::from("data/mock_npi_registry.csv"),
            licenses: vec![
                LicenseSource::new("NY", "data/ny_medical_license_database.csv"),
                LicenseSource::new("CA", "data/ca_medical_license_database.csv"),
            ],
        }
    }
}

/// One jurisdiction's license table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseSource {
    pub state: String,
    pub path: PathBuf,
}

impl LicenseSource {
    pub fn new(state: &str, path: impl Into<PathBuf>) -> Self {
        LicenseSource {
            state: state.to_string(),
            path: path.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub cutoff: f64,
    pub identifier_comparison: IdentifierComparison,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        MatchingConfig {
            cutoff: DEFAULT_CUTOFF,
            identifier_comparison: IdentifierComparison::Exact,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// None = available parallelism
    pub workers: Option<usize>,
    /// None = wall clock at pipeline start
    pub as_of: Option<DateTime<Utc>>,
    /// Progress line every N records; 0 = quiet, None = caller's default
    pub progress_every: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// SQLite path, ":memory:" for an in-memory store
    pub database: PathBuf,
    pub table: String,
    pub csv: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            database: PathBuf::from(":memory:"),
            table: crate::db::DEFAULT_TABLE.to_string(),
            csv: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnsConfig {
    pub roster: RosterColumns,
    pub license: LicenseColumns,
    pub identifier: IdentifierColumns,
    /// Roster phone column to clean into `phone_number_clean`
    pub phone: Option<String>,
}

impl ColumnsConfig {
    /// Same contracts with every label in normalized form ("Full Name" → "full_name")
    pub fn normalized(&self) -> ColumnsConfig {
        let n = |label: &String| normalize_column_name(label);
        ColumnsConfig {
            roster: RosterColumns {
                full_name: n(&self.roster.full_name),
                license_state: n(&self.roster.license_state),
                license_number: n(&self.roster.license_number),
                identifier: n(&self.roster.identifier),
            },
            license: LicenseColumns {
                name: n(&self.license.name),
                number: n(&self.license.number),
                expiration: n(&self.license.expiration),
            },
            identifier: IdentifierColumns {
                first_name: n(&self.identifier.first_name),
                last_name: n(&self.identifier.last_name),
                identifier: n(&self.identifier.identifier),
            },
            phone: self.phone.as_ref().map(n),
        }
    }
}

// ============================================================================
// PARSE + VALIDATE
// ============================================================================

impl PipelineConfig {
    pub fn from_toml(input: &str) -> PipelineResult<Self> {
        let config: PipelineConfig =
            toml::from_str(input).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> PipelineResult<Self> {
        let input = std::fs::read_to_string(path).map_err(|e| PipelineError::data_load(path, e))?;
        Self::from_toml(&input)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        let cutoff = self.matching.cutoff;
        if !(0.0..=100.0).contains(&cutoff) {
            return Err(PipelineError::Config(format!(
                "matching.cutoff must be within 0..=100, got {cutoff}"
            )));
        }

        if self.run.workers == Some(0) {
            return Err(PipelineError::Config("run.workers must be at least 1".into()));
        }

        let mut seen = HashSet::new();
        for source in &self.inputs.licenses {
            let state = source.state.trim().to_uppercase();
            if state.is_empty() {
                return Err(PipelineError::Config(format!(
                    "license source '{}' has an empty state",
                    source.path.display()
                )));
            }
            if !seen.insert(state.clone()) {
                return Err(PipelineError::Config(format!(
                    "license state '{state}' is configured more than once"
                )));
            }
        }

        if self.output.table.trim().is_empty() {
            return Err(PipelineError::Config("output.table must not be empty".into()));
        }
        if is_reserved_table(&self.output.table) {
            return Err(PipelineError::Config(format!(
                "output.table '{}' is reserved",
                self.output.table
            )));
        }

        Ok(())
    }

    pub fn worker_count(&self) -> NonZeroUsize {
        self.run
            .workers
            .and_then(NonZeroUsize::new)
            .or_else(|| std::thread::available_parallelism().ok())
            .unwrap_or(NonZeroUsize::MIN)
    }

    /// Fill in the progress interval only when the file left it out
    pub fn with_progress_default(mut self, every: usize) -> Self {
        self.run.progress_every.get_or_insert(every);
        self
    }

    pub fn match_settings(&self) -> MatchSettings {
        MatchSettings {
            cutoff: self.matching.cutoff,
            identifier_comparison: self.matching.identifier_comparison,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = PipelineConfig::from_toml("").unwrap();

        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.inputs.licenses.len(), 2);
        assert_eq!(config.inputs.licenses[0].state, "NY");
        assert_eq!(config.matching.cutoff, 85.0);
        assert_eq!(config.output.database, PathBuf::from(":memory:"));
        assert_eq!(config.output.table, "provider_roster");
        assert_eq!(config.columns.roster.identifier, "npi");
    }

    #[test]
    fn test_full_config() {
        let input = r#"
[inputs]
roster = "in/roster.csv"
identifier_registry = "in/npi.csv"

[[inputs.licenses]]
state = "tx"
path = "in/tx.csv"

[matching]
cutoff = 90.0
identifier_comparison = "normalized"

[run]
workers = 3
as_of = "2025-01-01T00:00:00Z"

[output]
database = "out/roster.db"
table = "roster"
csv = "out/enriched.csv"

[columns]
phone = "practice_phone"

[columns.roster]
full_name = "provider"

[columns.license]
expiration = "expires"
"#;
        let config = PipelineConfig::from_toml(input).unwrap();

        assert_eq!(config.inputs.roster, PathBuf::from("in/roster.csv"));
        assert_eq!(config.inputs.licenses, vec![LicenseSource::new("tx", "in/tx.csv")]);
        assert_eq!(config.worker_count().get(), 3);
        assert_eq!(
            config.run.as_of,
            Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(config.match_settings().cutoff, 90.0);
        assert_eq!(
            config.match_settings().identifier_comparison,
            IdentifierComparison::Normalized
        );
        assert_eq!(config.output.csv, Some(PathBuf::from("out/enriched.csv")));
        assert_eq!(config.columns.roster.full_name, "provider");
        assert_eq!(config.columns.roster.license_state, "license_state");
        assert_eq!(config.columns.license.expiration, "expires");
        assert_eq!(config.columns.license.name, "provider_name");
        assert_eq!(config.columns.phone.as_deref(), Some("practice_phone"));
    }

    #[test]
    fn test_rejects_cutoff_out_of_range() {
        for cutoff in ["100.5", "-1.0", "nan"] {
            let err = PipelineConfig::from_toml(&format!("[matching]\ncutoff = {cutoff}")).unwrap_err();
            assert!(matches!(err, PipelineError::Config(_)), "cutoff {cutoff}");
        }
    }

    #[test]
    fn test_cutoff_bounds_are_inclusive() {
        assert!(PipelineConfig::from_toml("[matching]\ncutoff = 0.0").is_ok());
        assert!(PipelineConfig::from_toml("[matching]\ncutoff = 100.0").is_ok());
    }

    #[test]
    fn test_rejects_zero_workers() {
        let err = PipelineConfig::from_toml("[run]\nworkers = 0").unwrap_err();
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn test_rejects_duplicate_state() {
        let input = r#"
[[inputs.licenses]]
state = "NY"
path = "a.csv"

[[inputs.licenses]]
state = " ny "
path = "b.csv"
"#;
        let err = PipelineConfig::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("NY"));
    }

    #[test]
    fn test_rejects_reserved_output_table() {
        for table in ["validation_runs", "sqlite_sequence"] {
            let err = PipelineConfig::from_toml(&format!("[output]\ntable = \"{table}\"")).unwrap_err();
            assert!(err.to_string().contains("reserved"), "table {table}");
        }
    }

    #[test]
    fn test_rejects_unknown_comparison() {
        let err = PipelineConfig::from_toml("[matching]\nidentifier_comparison = \"fuzzy\"").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_normalized_columns() {
        let input = r#"
[columns]
phone = "Practice Phone"

[columns.roster]
full_name = " Full Name "

[columns.identifier]
first_name = "Provider-First-Name"
"#;
        let columns = PipelineConfig::from_toml(input).unwrap().columns.normalized();

        assert_eq!(columns.roster.full_name, "full_name");
        assert_eq!(columns.identifier.first_name, "provider_first_name");
        assert_eq!(columns.phone.as_deref(), Some("practice_phone"));
        assert_eq!(columns.license, LicenseColumns::default());
    }

    #[test]
    fn test_explicit_quiet_progress_is_kept() {
        let quiet = PipelineConfig::from_toml("[run]\nprogress_every = 0").unwrap();
        assert_eq!(quiet.with_progress_default(100).run.progress_every, Some(0));

        let unset = PipelineConfig::from_toml("").unwrap();
        assert_eq!(unset.run.progress_every, None);
        assert_eq!(unset.with_progress_default(100).run.progress_every, Some(100));
    }

    #[test]
    fn test_worker_count_defaults_to_parallelism() {
        assert!(PipelineConfig::default().worker_count().get() >= 1);
    }

    #[test]
    fn test_from_path_missing_file() {
        let err = PipelineConfig::from_path(Path::new("does/not/exist.toml")).unwrap_err();
        assert!(matches!(err, PipelineError::DataLoad { .. }));
    }
}
