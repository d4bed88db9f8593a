// 🗂️ Reference Index Builder - authoritative tables → name-keyed lookups
//
// One NameIndex per license jurisdiction and one for the identifier registry.
// Keys are normalized authoritative names; duplicate names collapse with
// the FIRST row winning. Indexes are immutable once built.

use crate::error::PipelineResult;
use crate::normalize::normalize_name;
use crate::table::Table;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

// ============================================================================
// REFERENCE RECORDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceKind {
    /// State medical license registry
    License,

    /// National provider identifier registry
    Identifier,
}

/// One authoritative row: name, the identifier to confirm, optional expiration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub kind: ReferenceKind,
    pub name: String,
    /// License number or national identifier
    pub identifier: String,
    /// Parsed license expiration; None when missing or unparsable
    pub expiration: Option<DateTime<Utc>>,
}

impl ReferenceRecord {
    pub fn license(name: &str, number: &str, expiration: Option<DateTime<Utc>>) -> Self {
        ReferenceRecord {
            kind: ReferenceKind::License,
            name: name.to_string(),
            identifier: number.to_string(),
            expiration,
        }
    }

    pub fn identifier(name: &str, identifier: &str) -> Self {
        ReferenceRecord {
            kind: ReferenceKind::Identifier,
            name: name.to_string(),
            identifier: identifier.to_string(),
            expiration: None,
        }
    }

    /// Active only with a known expiration strictly after `as_of`
    pub fn is_active_at(&self, as_of: DateTime<Utc>) -> bool {
        matches!(self.expiration, Some(expiration) if expiration > as_of)
    }
}

// ============================================================================
// NAME INDEX
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// Normalized authoritative name
    pub key: String,
    /// Alphanumeric character mask of `key`, used for candidate pruning
    pub mask: u64,
    /// Character count of `key`
    pub length: usize,
    /// Separators in `key` (tokens - 1)
    pub spaces: usize,
    /// Length and separators of `key` with repeated tokens removed
    pub set_length: usize,
    pub set_spaces: usize,
    pub record: ReferenceRecord,
}

/// Name-keyed lookup over one reference set.
///
/// Entries keep construction order, which is the tie-break order of the matcher.
#[derive(Debug, Clone, Default)]
pub struct NameIndex {
    label: String,
    entries: Vec<IndexEntry>,
    positions: HashMap<String, usize>,
    duplicates_dropped: usize,
}

impl NameIndex {
    /// Build from records in input order. Records whose normalized name is
    /// empty are skipped; later duplicates of a name are dropped.
    pub fn from_records<I>(label: &str, records: I) -> Self
    where
        I: IntoIterator<Item = ReferenceRecord>,
    {
        let mut index = NameIndex {
            label: label.to_string(),
            ..Default::default()
        };

        for record in records {
            let key = normalize_name(&record.name);
            if key.is_empty() {
                continue;
            }
            if index.positions.contains_key(&key) {
                debug!(index = label, name = %record.name, "duplicate reference name dropped");
                index.duplicates_dropped += 1;
                continue;
            }

            index.positions.insert(key.clone(), index.entries.len());
            let (set_length, set_spaces) = token_set_shape(&key);
            index.entries.push(IndexEntry {
                mask: char_mask(&key),
                length: key.chars().count(),
                spaces: key.matches(' ').count(),
                set_length,
                set_spaces,
                key,
                record,
            });
        }

        debug!(
            index = label,
            entries = index.entries.len(),
            duplicates = index.duplicates_dropped,
            "name index built"
        );

        index
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn duplicates_dropped(&self) -> usize {
        self.duplicates_dropped
    }

    /// Construction position of an already-normalized key
    pub fn position(&self, key: &str) -> Option<usize> {
        self.positions.get(key).copied()
    }

    /// Exact lookup by (un-normalized) name
    #[cfg(test)]
    pub(crate) fn get(&self, name: &str) -> Option<&ReferenceRecord> {
        self.position(&normalize_name(name))
            .map(|pos| &self.entries[pos].record)
    }
}

/// Bit per ASCII letter/digit; any other alphanumeric shares bit 63.
///
/// Two strings with disjoint masks have no character in common.
pub fn char_mask(text: &str) -> u64 {
    text.chars().fold(0u64, |mask, c| {
        let bit = match c {
            'a'..='z' => c as u32 - 'a' as u32,
            'A'..='Z' => c as u32 - 'A' as u32,
            '0'..='9' => 26 + (c as u32 - '0' as u32),
            c if c.is_alphanumeric() => 63,
            _ => return mask,
        };
        mask | (1u64 << bit)
    })
}

/// (length, separators) of the distinct tokens joined by single spaces
pub fn token_set_shape(key: &str) -> (usize, usize) {
    let tokens: HashSet<&str> = key.split_whitespace().collect();
    let spaces = tokens.len().saturating_sub(1);
    let length = tokens.iter().map(|t| t.chars().count()).sum::<usize>() + spaces;
    (length, spaces)
}

// ============================================================================
// COLUMN CONTRACTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LicenseColumns {
    pub name: String,
    pub number: String,
    pub expiration: String,
}

impl Default for LicenseColumns {
    fn default() -> Self {
        LicenseColumns {
            name: "provider_name".to_string(),
            number: "license_number".to_string(),
            expiration: "expiration_date".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifierColumns {
    pub first_name: String,
    pub last_name: String,
    pub identifier: String,
}

impl Default for IdentifierColumns {
    fn default() -> Self {
        IdentifierColumns {
            first_name: "provider_first_name".to_string(),
            last_name: "provider_last_name".to_string(),
            identifier: "npi".to_string(),
        }
    }
}

// ============================================================================
// BUILDERS
// ============================================================================

/// License table → NameIndex. Columns are checked once, before any row is read.
pub fn build_license_index(
    label: &str,
    table: &Table,
    columns: &LicenseColumns,
) -> PipelineResult<NameIndex> {
    let name_idx = table.require_column(&columns.name)?;
    let number_idx = table.require_column(&columns.number)?;
    let expiration_idx = table.require_column(&columns.expiration)?;

    let mut unparsable = 0usize;
    let records: Vec<ReferenceRecord> = (0..table.len())
        .map(|row| {
            let raw_expiration = table.cell(row, expiration_idx);
            let expiration = parse_expiration(raw_expiration);
            if expiration.is_none() && !raw_expiration.trim().is_empty() {
                unparsable += 1;
            }
            ReferenceRecord::license(
                table.cell(row, name_idx).trim(),
                table.cell(row, number_idx).trim(),
                expiration,
            )
        })
        .collect();

    if unparsable > 0 {
        warn!(index = label, count = unparsable, "unparsable expiration dates treated as inactive");
    }

    Ok(NameIndex::from_records(label, records))
}

/// Identifier registry → NameIndex keyed by "first last"
pub fn build_identifier_index(
    label: &str,
    table: &Table,
    columns: &IdentifierColumns,
) -> PipelineResult<NameIndex> {
    let first_idx = table.require_column(&columns.first_name)?;
    let last_idx = table.require_column(&columns.last_name)?;
    let id_idx = table.require_column(&columns.identifier)?;

    let records = (0..table.len()).map(|row| {
        let full_name = format!(
            "{} {}",
            table.cell(row, first_idx).trim(),
            table.cell(row, last_idx).trim()
        );
        ReferenceRecord::identifier(full_name.trim(), table.cell(row, id_idx).trim())
    });

    Ok(NameIndex::from_records(label, records))
}

/// Tolerant expiration parse. Anything unrecognized is None, never an error.
pub fn parse_expiration(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.and_utc());
        }
    }

    for format in ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }

    None
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn license_table(csv: &str) -> Table {
        Table::from_csv_str("ny_licenses", csv).unwrap()
    }

    #[test]
    fn test_dedup_keeps_first() {
        let table = license_table(
            "provider_name,license_number,expiration_date\n\
             Jane Smith,NY111,2030-01-01\n\
             Jane Smith,NY222,2031-01-01\n\
             John Doe,NY333,2030-01-01\n",
        );

        let index = build_license_index("NY", &table, &LicenseColumns::default()).unwrap();

        assert_eq!(index.len(), 2);
        assert_eq!(index.duplicates_dropped(), 1);
        assert_eq!(index.get("Jane Smith").unwrap().identifier, "NY111");
    }

    #[test]
    fn test_dedup_on_normalized_name() {
        let index = NameIndex::from_records(
            "NY",
            vec![
                ReferenceRecord::license("Jane A. Smith", "NY1", None),
                ReferenceRecord::license("JANE A SMITH", "NY2", None),
            ],
        );

        assert_eq!(index.len(), 1);
        assert_eq!(index.entries()[0].key, "jane a smith");
        assert_eq!(index.entries()[0].record.identifier, "NY1");
    }

    #[test]
    fn test_construction_order_is_preserved() {
        let index = NameIndex::from_records(
            "NY",
            vec![
                ReferenceRecord::license("Zed Adams", "1", None),
                ReferenceRecord::license("Amy Baker", "2", None),
                ReferenceRecord::license("", "3", None),
                ReferenceRecord::license("Carl Diaz", "4", None),
            ],
        );

        let keys: Vec<&str> = index.entries().iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["zed adams", "amy baker", "carl diaz"]);
    }

    #[test]
    fn test_missing_column_is_schema_error() {
        let table = license_table("provider_name,license_number\nJane Smith,NY1\n");
        let err = build_license_index("NY", &table, &LicenseColumns::default()).unwrap_err();

        assert_eq!(
            err.to_string(),
            "table 'ny_licenses': missing required column 'expiration_date'"
        );
    }

    #[test]
    fn test_unparsable_dates_become_none() {
        let table = license_table(
            "provider_name,license_number,expiration_date\n\
             Jane Smith,NY1,not-a-date\n\
             John Doe,NY2,\n",
        );

        let index = build_license_index("NY", &table, &LicenseColumns::default()).unwrap();

        assert!(index.entries().iter().all(|e| e.record.expiration.is_none()));
        assert!(!index.get("Jane Smith").unwrap().is_active_at(Utc::now()));
    }

    #[test]
    fn test_build_does_not_mutate_table() {
        let table = license_table(
            "provider_name,license_number,expiration_date\nJane Smith,NY1,2030-01-01\nJane Smith,NY2,2030-01-01\n",
        );
        let before = table.clone();

        let first = build_license_index("NY", &table, &LicenseColumns::default()).unwrap();
        let second = build_license_index("NY", &table, &LicenseColumns::default()).unwrap();

        assert_eq!(table, before);
        assert_eq!(first.entries(), second.entries());
    }

    #[test]
    fn test_identifier_index_combines_names() {
        let table = Table::from_csv_str(
            "npi_registry",
            "provider_first_name,provider_last_name,npi\nJane,Smith,1234567890\nJane,Smith,999\n",
        )
        .unwrap();

        let index = build_identifier_index("NPI", &table, &IdentifierColumns::default()).unwrap();

        assert_eq!(index.len(), 1);
        let record = index.get("jane smith").unwrap();
        assert_eq!(record.name, "Jane Smith");
        assert_eq!(record.identifier, "1234567890");
        assert_eq!(record.kind, ReferenceKind::Identifier);
    }

    #[test]
    fn test_parse_expiration_formats() {
        let midnight = Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap();

        assert_eq!(parse_expiration("2026-03-15"), Some(midnight));
        assert_eq!(parse_expiration("03/15/2026"), Some(midnight));
        assert_eq!(parse_expiration("2026/03/15"), Some(midnight));
        assert_eq!(parse_expiration("2026-03-15 00:00:00"), Some(midnight));
        assert_eq!(parse_expiration("2026-03-15T00:00:00Z"), Some(midnight));
        assert_eq!(parse_expiration("  "), None);
        assert_eq!(parse_expiration("15th of March"), None);
    }

    #[test]
    fn test_expiration_boundary() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();

        let expires_now = ReferenceRecord::license("A", "1", Some(now));
        let expires_later = ReferenceRecord::license("A", "1", Some(now + Duration::microseconds(1)));
        let no_expiration = ReferenceRecord::license("A", "1", None);

        assert!(!expires_now.is_active_at(now));
        assert!(expires_later.is_active_at(now));
        assert!(!no_expiration.is_active_at(now));
    }

    #[test]
    fn test_char_mask() {
        assert_eq!(char_mask("ab"), 0b11);
        assert_eq!(char_mask("a b"), char_mask("ba"));
        assert_eq!(char_mask("0"), 1 << 26);
        assert_eq!(char_mask("é"), 1 << 63);
        assert_eq!(char_mask(" .-"), 0);
        assert_eq!(char_mask("abc") & char_mask("xyz"), 0);
    }

    #[test]
    fn test_token_set_shape() {
        assert_eq!(token_set_shape("jane smith"), (10, 1));
        assert_eq!(token_set_shape("p q p q p q p q"), (3, 1));
        assert_eq!(token_set_shape("cher"), (4, 0));
        assert_eq!(token_set_shape(""), (0, 0));

        let index = NameIndex::from_records("test", vec![ReferenceRecord::identifier("Lee Lee", "1")]);
        let entry = &index.entries()[0];
        assert_eq!((entry.length, entry.spaces), (7, 1));
        assert_eq!((entry.set_length, entry.set_spaces), (3, 0));
    }
}
