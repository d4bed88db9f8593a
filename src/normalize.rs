// 🧹 Normalizer - Column labels, person names and phone cleanup
// All functions return new values; inputs are never modified.

use crate::error::{PipelineError, PipelineResult};
use crate::table::Table;

/// Column derived by `derive_clean_phone`
pub const CLEAN_PHONE_COLUMN: &str = "phone_number_clean";

/// "  License - Number " → "license_number"
///
/// Trims, lower-cases and collapses every run of whitespace and hyphens
/// into a single underscore.
pub fn normalize_column_name(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut pending_separator = false;

    for c in label.trim().chars() {
        if c.is_whitespace() || c == '-' {
            pending_separator = true;
            continue;
        }
        if pending_separator && !out.is_empty() {
            out.push('_');
        }
        pending_separator = false;
        out.extend(c.to_lowercase());
    }

    out
}

/// Copy of `table` with normalized column labels.
pub fn normalize_table(table: &Table) -> PipelineResult<Table> {
    if table.columns.is_empty() {
        return Err(PipelineError::data_load(&table.name, "table has no columns"));
    }

    Ok(Table {
        name: table.name.clone(),
        columns: table.columns.iter().map(|c| normalize_column_name(c)).collect(),
        rows: table.rows.clone(),
    })
}

/// Canonical form of a person name, used as index key and matcher input.
///
/// "Jane A. Smith" → "jane a smith"
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Removes all non-digit characters: "(212) 555-0147" → "2125550147"
pub fn clean_phone_number(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Appends a `phone_number_clean` column computed from `phone_column`.
///
/// Tables without that column are returned unchanged.
pub fn derive_clean_phone(table: &Table, phone_column: &str) -> Table {
    let Some(idx) = table.column_index(phone_column) else {
        return table.clone();
    };
    if table.column_index(CLEAN_PHONE_COLUMN).is_some() {
        return table.clone();
    }

    let mut columns = table.columns.clone();
    columns.push(CLEAN_PHONE_COLUMN.to_string());

    let rows = table
        .rows
        .iter()
        .map(|row| {
            let mut row = row.clone();
            let cleaned = clean_phone_number(row.get(idx).map(|s| s.as_str()).unwrap_or(""));
            row.push(cleaned);
            row
        })
        .collect();

    Table::new(&table.name, columns, rows)
}
