// Provider Validation - Core Library
// Roster entity resolution against license and NPI reference data.
// Exposes all modules for use in the CLI, the query API server, and tests.

pub mod error;
pub mod table;
pub mod normalize;
pub mod roster;
pub mod index;
pub mod matcher;     // Fuzzy name matching over a NameIndex
pub mod engine;      // Per-record validation + worker pool
pub mod materialize;
pub mod db;          // SQLite store + query boundary
pub mod quality;
pub mod config;
pub mod pipeline;

// Re-export commonly used types
pub use error::{PipelineError, PipelineResult};
pub use table::Table;
pub use normalize::{normalize_column_name, normalize_name, normalize_table};
pub use roster::{Roster, RosterColumns, RosterRecord};
pub use index::{
    build_identifier_index, build_license_index,
    IdentifierColumns, LicenseColumns, NameIndex, ReferenceKind, ReferenceRecord,
};
pub use matcher::{best_match, score, Match, DEFAULT_CUTOFF};
pub use engine::{
    validate, validate_roster,
    IdentifierComparison, LogProgress, MatchSettings, ProgressObserver,
    ValidationContext, ValidationResult,
};
pub use materialize::{materialize, CsvSink, EnrichedRoster, RosterSink};
pub use db::{describe_schema, execute_query, get_runs, load_flags, RunRecord, SqliteStore};
pub use quality::{QualityReport, QualitySummary};
pub use config::PipelineConfig;
pub use pipeline::{run_pipeline, PipelineOutput, RunReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
