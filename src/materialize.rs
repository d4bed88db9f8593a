// 📦 Result Materializer - append the flags, hand the table to a sink
// Pure append: passthrough cells and row order are untouched.

use crate::engine::ValidationResult;
use crate::error::{PipelineError, PipelineResult};
use crate::roster::Roster;
use std::path::{Path, PathBuf};
use tracing::info;

pub const LICENSE_FOUND_COLUMN: &str = "is_license_found";
pub const LICENSE_ACTIVE_COLUMN: &str = "is_license_active";
pub const IDENTIFIER_FOUND_COLUMN: &str = "is_npi_found";

/// Flag columns in the order they are appended
pub const FLAG_COLUMNS: [&str; 3] = [
    LICENSE_FOUND_COLUMN,
    LICENSE_ACTIVE_COLUMN,
    IDENTIFIER_FOUND_COLUMN,
];

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRow {
    /// Original cells, aligned with `EnrichedRoster::columns`
    pub attributes: Vec<String>,
    pub result: ValidationResult,
}

impl EnrichedRow {
    /// Flags as stored: 1 / 0
    pub fn flag_values(&self) -> [i64; 3] {
        [
            self.result.license_found as i64,
            self.result.license_active as i64,
            self.result.identifier_found as i64,
        ]
    }
}

/// Roster plus three flag columns, in input row order
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRoster {
    /// Passthrough columns (flag columns not included)
    pub columns: Vec<String>,
    pub rows: Vec<EnrichedRow>,
}

impl EnrichedRoster {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Passthrough columns followed by the flag columns
    pub fn all_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .cloned()
            .chain(FLAG_COLUMNS.iter().map(|c| c.to_string()))
            .collect()
    }

    pub fn results(&self) -> impl Iterator<Item = &ValidationResult> {
        self.rows.iter().map(|r| &r.result)
    }

    /// Passthrough value of `column` in `row`
    pub fn attribute(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows
            .get(row)
            .and_then(|r| r.attributes.get(idx))
            .map(|s| s.as_str())
    }
}

/// Zip roster rows with their results. Counts must agree; no row is dropped.
pub fn materialize(roster: Roster, results: Vec<ValidationResult>) -> PipelineResult<EnrichedRoster> {
    if roster.len() != results.len() {
        return Err(PipelineError::ResultCount {
            expected: roster.len(),
            actual: results.len(),
        });
    }

    let rows = roster
        .records
        .into_iter()
        .zip(results)
        .map(|(record, result)| EnrichedRow {
            attributes: record.attributes,
            result,
        })
        .collect();

    Ok(EnrichedRoster {
        columns: roster.columns,
        rows,
    })
}

// ============================================================================
// SINKS
// ============================================================================

/// Storage boundary: accepts a table of named columns
pub trait RosterSink {
    /// Persist the enriched roster, returning the number of rows written
    fn store(&mut self, roster: &EnrichedRoster) -> PipelineResult<usize>;
}

/// Writes the enriched roster as CSV with 0/1 flags
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: &Path) -> Self {
        CsvSink {
            path: path.to_path_buf(),
        }
    }
}

impl RosterSink for CsvSink {
    fn store(&mut self, roster: &EnrichedRoster) -> PipelineResult<usize> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut wtr = csv::Writer::from_path(&self.path)?;
        wtr.write_record(roster.all_columns())?;

        for row in &roster.rows {
            let flags = row.flag_values().map(|f| f.to_string());
            wtr.write_record(row.attributes.iter().map(|s| s.as_str()).chain(flags.iter().map(|s| s.as_str())))?;
        }
        wtr.flush()?;

        info!(path = %self.path.display(), rows = roster.len(), "enriched roster written");
        Ok(roster.len())
    }
}
