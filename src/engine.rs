// ✅ Validation Engine - three flags per roster record
//
// For each provider:
//   1. license index chosen by claimed state (unknown state → no license flags)
//   2. fuzzy name match + exact license number → license_found
//      ... and expiration strictly after as_of → license_active
//   3. fuzzy name match + exact identifier in the registry → identifier_found
//
// `validate` is a pure function of (record, context). The roster fans out
// over a bounded set of scoped worker threads writing into index-aligned slots.

use crate::index::NameIndex;
use crate::matcher::{best_match, DEFAULT_CUTOFF};
use crate::roster::RosterRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use tracing::{info, warn};

// ============================================================================
// VALIDATION RESULT
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub license_found: bool,
    /// Only ever true together with `license_found`
    pub license_active: bool,
    pub identifier_found: bool,
}

impl ValidationResult {
    /// Number of flags set (0-3)
    pub fn passed_count(&self) -> usize {
        [self.license_found, self.license_active, self.identifier_found]
            .iter()
            .filter(|f| **f)
            .count()
    }

    /// Per-record quality: mean of the three flags
    pub fn quality(&self) -> f64 {
        self.passed_count() as f64 / 3.0
    }
}

// ============================================================================
// SETTINGS
// ============================================================================

/// How claimed identifiers are compared with reference identifiers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierComparison {
    /// Equal after trimming surrounding whitespace (case-sensitive)
    #[default]
    Exact,

    /// Case-insensitive, internal whitespace removed, leading zeros of digit runs dropped
    Normalized,
}

impl IdentifierComparison {
    /// An empty claim never confirms anything
    pub fn equals(&self, claimed: &str, reference: &str) -> bool {
        let claimed = claimed.trim();
        let reference = reference.trim();
        if claimed.is_empty() || reference.is_empty() {
            return false;
        }

        match self {
            IdentifierComparison::Exact => claimed == reference,
            IdentifierComparison::Normalized => {
                canonical_identifier(claimed) == canonical_identifier(reference)
            }
        }
    }
}

/// "ny 0012345" → "NY12345", "000" → "0"
fn canonical_identifier(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut run = String::new();

    let flush = |run: &mut String, out: &mut String| {
        if !run.is_empty() {
            let trimmed = run.trim_start_matches('0');
            out.push_str(if trimmed.is_empty() { "0" } else { trimmed });
            run.clear();
        }
    };

    for c in value.chars().filter(|c| !c.is_whitespace()) {
        if c.is_ascii_digit() {
            run.push(c);
        } else {
            flush(&mut run, &mut out);
            out.extend(c.to_uppercase());
        }
    }
    flush(&mut run, &mut out);

    out
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchSettings {
    /// Acceptance cutoff on the 0-100 similarity scale
    pub cutoff: f64,
    pub identifier_comparison: IdentifierComparison,
}

impl Default for MatchSettings {
    fn default() -> Self {
        MatchSettings {
            cutoff: DEFAULT_CUTOFF,
            identifier_comparison: IdentifierComparison::Exact,
        }
    }
}

// ============================================================================
// VALIDATION CONTEXT
// ============================================================================

/// Everything validation reads: built once, then shared read-only by all workers.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    license_indexes: BTreeMap<String, NameIndex>,
    identifier_index: NameIndex,
    settings: MatchSettings,
    as_of: DateTime<Utc>,
}

impl ValidationContext {
    pub fn new(identifier_index: NameIndex, settings: MatchSettings, as_of: DateTime<Utc>) -> Self {
        ValidationContext {
            license_indexes: BTreeMap::new(),
            identifier_index,
            settings,
            as_of,
        }
    }

    /// Register the license index for a jurisdiction (replaces any previous one)
    pub fn with_license_index(mut self, state: &str, index: NameIndex) -> Self {
        self.license_indexes.insert(state_key(state), index);
        self
    }

    pub fn license_index(&self, state: &str) -> Option<&NameIndex> {
        self.license_indexes.get(&state_key(state))
    }

    pub fn states(&self) -> impl Iterator<Item = &str> {
        self.license_indexes.keys().map(|s| s.as_str())
    }

    pub fn identifier_index(&self) -> &NameIndex {
        &self.identifier_index
    }

    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    /// Timestamp used for every expiration comparison in this run
    pub fn as_of(&self) -> DateTime<Utc> {
        self.as_of
    }
}

fn state_key(state: &str) -> String {
    state.trim().to_uppercase()
}

// ============================================================================
// VALIDATION
// ============================================================================

/// Validate one record. Absence of a match yields false flags, never an error.
pub fn validate(ctx: &ValidationContext, record: &RosterRecord) -> ValidationResult {
    let mut result = ValidationResult::default();
    let cutoff = ctx.settings.cutoff;
    let compare = ctx.settings.identifier_comparison;

    if let Some(index) = ctx.license_index(&record.license_state) {
        if let Some(m) = best_match(&record.full_name, index, cutoff) {
            let license = &m.entry.record;
            if compare.equals(&record.license_number, &license.identifier) {
                result.license_found = true;
                result.license_active = license.is_active_at(ctx.as_of);
            }
        }
    }

    if let Some(m) = best_match(&record.full_name, &ctx.identifier_index, cutoff) {
        if compare.equals(&record.identifier, &m.entry.record.identifier) {
            result.identifier_found = true;
        }
    }

    result
}

/// Receives one callback per validated record, from worker threads.
pub trait ProgressObserver: Sync {
    fn record_validated(&self, position: usize, result: &ValidationResult);
}

impl<F> ProgressObserver for F
where
    F: Fn(usize, &ValidationResult) + Sync,
{
    fn record_validated(&self, position: usize, result: &ValidationResult) {
        self(position, result)
    }
}

/// Logs a progress line every `every` completed records
pub struct LogProgress {
    total: usize,
    every: usize,
    done: AtomicUsize,
}

impl LogProgress {
    pub fn new(total: usize, every: usize) -> Self {
        LogProgress {
            total,
            every: every.max(1),
            done: AtomicUsize::new(0),
        }
    }

    pub fn completed(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }
}

impl ProgressObserver for LogProgress {
    fn record_validated(&self, _position: usize, _result: &ValidationResult) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if done % self.every == 0 || done == self.total {
            info!(done, total = self.total, "validating roster");
        }
    }
}

/// Validate every record with at most `workers` threads.
///
/// Output position i always holds the result for input position i.
pub fn validate_roster(
    ctx: &ValidationContext,
    records: &[RosterRecord],
    workers: NonZeroUsize,
    observer: Option<&dyn ProgressObserver>,
) -> Vec<ValidationResult> {
    let mut results = vec![ValidationResult::default(); records.len()];
    if records.is_empty() {
        return results;
    }

    let unknown_states = records
        .iter()
        .filter(|r| ctx.license_index(&r.license_state).is_none())
        .count();
    if unknown_states > 0 {
        warn!(count = unknown_states, "records claim a state with no license index");
    }

    let workers = workers.get().min(records.len());
    let chunk_size = records.len().div_ceil(workers);
    info!(records = records.len(), workers, "validation started");

    thread::scope(|scope| {
        for (chunk, (inputs, slots)) in records
            .chunks(chunk_size)
            .zip(results.chunks_mut(chunk_size))
            .enumerate()
        {
            let offset = chunk * chunk_size;
            scope.spawn(move || {
                for (i, (record, slot)) in inputs.iter().zip(slots.iter_mut()).enumerate() {
                    *slot = validate(ctx, record);
                    if let Some(observer) = observer {
                        observer.record_validated(offset + i, slot);
                    }
                }
            });
        }
    });

    info!(
        license_found = results.iter().filter(|r| r.license_found).count(),
        license_active = results.iter().filter(|r| r.license_active).count(),
        identifier_found = results.iter().filter(|r| r.identifier_found).count(),
        "validation complete"
    );

    results
}

// ============================================================================
// TESTS
// ============================================================================
