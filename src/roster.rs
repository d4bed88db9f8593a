// 👩‍⚕️ Provider Roster - the records under validation
// Claimed fields are extracted once under a strict column contract;
// every original cell is kept as a passthrough attribute.

use crate::error::PipelineResult;
use crate::table::Table;
use serde::{Deserialize, Serialize};

/// Roster column contract (labels after normalization)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RosterColumns {
    pub full_name: String,
    pub license_state: String,
    pub license_number: String,
    pub identifier: String,
}

impl Default for RosterColumns {
    fn default() -> Self {
        RosterColumns {
            full_name: "full_name".to_string(),
            license_state: "license_state".to_string(),
            license_number: "license_number".to_string(),
            identifier: "npi".to_string(),
        }
    }
}

/// One provider as claimed by the roster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterRecord {
    pub full_name: String,
    pub license_state: String,
    pub license_number: String,
    /// Claimed national identifier (NPI)
    pub identifier: String,
    /// Every cell of the source row, aligned with `Roster::columns`
    pub attributes: Vec<String>,
}

impl RosterRecord {
    /// Record with only the claimed fields set (no passthrough attributes)
    pub fn new(full_name: &str, license_state: &str, license_number: &str, identifier: &str) -> Self {
        RosterRecord {
            full_name: full_name.to_string(),
            license_state: license_state.to_string(),
            license_number: license_number.to_string(),
            identifier: identifier.to_string(),
            attributes: Vec::new(),
        }
    }
}

/// The full roster: passthrough column labels plus records in input order
#[derive(Debug, Clone, PartialEq)]
pub struct Roster {
    pub columns: Vec<String>,
    pub records: Vec<RosterRecord>,
}

impl Roster {
    /// Build from a normalized table. Any missing contract column is a Schema error.
    pub fn from_table(table: &Table, contract: &RosterColumns) -> PipelineResult<Self> {
        let name_idx = table.require_column(&contract.full_name)?;
        let state_idx = table.require_column(&contract.license_state)?;
        let number_idx = table.require_column(&contract.license_number)?;
        let id_idx = table.require_column(&contract.identifier)?;

        let records = (0..table.len())
            .map(|row| RosterRecord {
                full_name: table.cell(row, name_idx).to_string(),
                license_state: table.cell(row, state_idx).to_string(),
                license_number: table.cell(row, number_idx).to_string(),
                identifier: table.cell(row, id_idx).to_string(),
                attributes: table.rows[row].clone(),
            })
            .collect();

        Ok(Roster {
            columns: table.columns.clone(),
            records,
        })
    }

    /// Roster built directly from records, with the contract columns as passthrough
    #[cfg(test)]
    pub(crate) fn from_records(records: Vec<RosterRecord>) -> Self {
        let contract = RosterColumns::default();
        let records = records
            .into_iter()
            .map(|mut r| {
                if r.attributes.is_empty() {
                    r.attributes = vec![
                        r.full_name.clone(),
                        r.license_state.clone(),
                        r.license_number.clone(),
                        r.identifier.clone(),
                    ];
                }
                r
            })
            .collect();

        Roster {
            columns: vec![
                contract.full_name,
                contract.license_state,
                contract.license_number,
                contract.identifier,
            ],
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Passthrough value of `column` for record `row`
    pub fn attribute(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.records
            .get(row)
            .and_then(|r| r.attributes.get(idx))
            .map(|s| s.as_str())
    }
}
