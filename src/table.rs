// 📄 Tabular Inputs - CSV → labelled rows of string cells
// Every input role (roster, license sets, identifier registry) loads through here.

use crate::error::{PipelineError, PipelineResult};
use std::io::Read;
use std::path::Path;

/// A loaded table: column labels plus rows of string cells.
///
/// Rows are padded to the header width so every cell lookup is in bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Logical name used in error messages (file path or role)
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(name: &str, columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();

        Table {
            name: name.to_string(),
            columns,
            rows,
        }
    }

    /// Load a CSV file. Missing, unreadable or header-less files are a DataLoad error.
    pub fn from_path(path: &Path) -> PipelineResult<Self> {
        let file = std::fs::File::open(path).map_err(|e| PipelineError::data_load(path, e))?;
        Self::read(&path.display().to_string(), file)
            .map_err(|e| PipelineError::data_load(path, e))
    }

    /// Parse CSV text held in memory (fixtures, API uploads)
    pub fn from_csv_str(name: &str, data: &str) -> PipelineResult<Self> {
        Self::read(name, data.as_bytes()).map_err(|e| PipelineError::data_load(name, e))
    }

    fn read<R: Read>(name: &str, source: R) -> Result<Self, String> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(source);

        let columns: Vec<String> = rdr
            .headers()
            .map_err(|e| e.to_string())?
            .iter()
            .map(|h| h.to_string())
            .collect();

        if columns.iter().all(|c| c.trim().is_empty()) {
            return Err("table has no header row".to_string());
        }

        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record.map_err(|e| e.to_string())?;
            rows.push(record.iter().map(|cell| cell.to_string()).collect());
        }

        Ok(Table::new(name, columns, rows))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Position of a required column, or a Schema error naming this table
    pub fn require_column(&self, column: &str) -> PipelineResult<usize> {
        self.column_index(column)
            .ok_or_else(|| PipelineError::schema(&self.name, column))
    }

    /// Cell text at (row, column); empty when the row is short
    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(|s| s.as_str())
            .unwrap_or("")
    }
}
