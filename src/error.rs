// ⚠️ Pipeline Errors
// Load and schema failures are fatal for a run. A missing match is never an error.

use std::path::PathBuf;
use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required input table is missing, unreadable or empty
    #[error("cannot load '{}': {reason}", path.display())]
    DataLoad { path: PathBuf, reason: String },

    /// A required column is absent after normalization
    #[error("table '{table}': missing required column '{column}'")]
    Schema { table: String, column: String },

    /// Invalid configuration (bad cutoff, zero workers, duplicate state, parse failure)
    #[error("configuration error: {0}")]
    Config(String),

    /// Materializer received a different number of results than roster rows
    #[error("expected {expected} validation results, got {actual}")]
    ResultCount { expected: usize, actual: usize },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn data_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PipelineError::DataLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn schema(table: &str, column: &str) -> Self {
        PipelineError::Schema {
            table: table.to_string(),
            column: column.to_string(),
        }
    }

    /// True for errors that abort a run before validation starts
    pub fn is_input_error(&self) -> bool {
        matches!(self, PipelineError::DataLoad { .. } | PipelineError::Schema { .. })
    }
}
