// 📊 Data Quality Score - roster-wide aggregate of the three flags
//
// data_quality_score = mean over providers of (found + active + npi) / 3
// Also broken down per claimed license state.

use crate::engine::ValidationResult;
use crate::materialize::EnrichedRoster;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualitySummary {
    pub total_providers: usize,
    pub license_found: usize,
    pub license_active: usize,
    pub identifier_found: usize,
    pub data_quality_score: f64,
}

impl QualitySummary {
    pub fn from_results<'a, I>(results: I) -> Self
    where
        I: IntoIterator<Item = &'a ValidationResult>,
    {
        let mut summary = QualitySummary::default();
        let mut quality_sum = 0.0;

        for r in results {
            summary.total_providers += 1;
            summary.license_found += r.license_found as usize;
            summary.license_active += r.license_active as usize;
            summary.identifier_found += r.identifier_found as usize;
            quality_sum += r.quality();
        }

        if summary.total_providers > 0 {
            summary.data_quality_score = quality_sum / summary.total_providers as f64;
        }

        summary
    }

    pub fn unverified_licenses(&self) -> usize {
        self.total_providers - self.license_found
    }

    pub fn inactive_licenses(&self) -> usize {
        self.total_providers - self.license_active
    }

    pub fn unverified_identifiers(&self) -> usize {
        self.total_providers - self.identifier_found
    }

    fn rate(&self, count: usize) -> f64 {
        if self.total_providers == 0 {
            0.0
        } else {
            count as f64 / self.total_providers as f64
        }
    }

    pub fn license_found_rate(&self) -> f64 {
        self.rate(self.license_found)
    }

    pub fn license_active_rate(&self) -> f64 {
        self.rate(self.license_active)
    }

    pub fn identifier_found_rate(&self) -> f64 {
        self.rate(self.identifier_found)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} providers: {:.1}% quality | {} unverified licenses, {} inactive licenses, {} unverified NPIs",
            self.total_providers,
            self.data_quality_score * 100.0,
            self.unverified_licenses(),
            self.inactive_licenses(),
            self.unverified_identifiers()
        )
    }
}

/// Overall summary plus one summary per claimed state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub overall: QualitySummary,
    pub by_state: BTreeMap<String, QualitySummary>,
}

impl QualityReport {
    /// Rows as (claimed state, flags); blank states are grouped under ""
    pub fn from_flags(rows: &[(String, ValidationResult)]) -> Self {
        let mut grouped: BTreeMap<String, Vec<ValidationResult>> = BTreeMap::new();
        for (state, result) in rows {
            grouped
                .entry(state.trim().to_uppercase())
                .or_default()
                .push(*result);
        }

        QualityReport {
            overall: QualitySummary::from_results(rows.iter().map(|(_, r)| r)),
            by_state: grouped
                .into_iter()
                .map(|(state, results)| (state, QualitySummary::from_results(&results)))
                .collect(),
        }
    }

    /// Report for an enriched roster, grouped by `state_column`
    pub fn from_roster(roster: &EnrichedRoster, state_column: &str) -> Self {
        let rows: Vec<(String, ValidationResult)> = (0..roster.len())
            .map(|i| {
                (
                    roster.attribute(i, state_column).unwrap_or("").to_string(),
                    roster.rows[i].result,
                )
            })
            .collect();

        Self::from_flags(&rows)
    }
}
