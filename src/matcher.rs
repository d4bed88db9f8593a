// 🔎 Similarity Matcher - best fuzzy name match above a cutoff
//
// Score (0-100) = max of:
//   ratio            normalized Levenshtein similarity
//   token_sort × .95 same, after sorting tokens (word order tolerant)
//   token_set  × .95 shared tokens vs. leftovers (subset tolerant)
//
// Tie-break: the earliest entry in index construction order wins.
// Candidates are pruned only when their score provably falls below the cutoff.

use crate::index::{char_mask, token_set_shape, IndexEntry, NameIndex};
use crate::normalize::normalize_name;
use std::collections::BTreeSet;
use strsim::normalized_levenshtein;

/// Default acceptance cutoff
pub const DEFAULT_CUTOFF: f64 = 85.0;

/// Weight applied to the token-based scores
const TOKEN_SCALE: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match<'a> {
    pub entry: &'a IndexEntry,
    pub score: f64,
    /// Position of the entry in construction order
    pub position: usize,
}

impl<'a> Match<'a> {
    /// Normalized name of the matched candidate
    pub fn name(&self) -> &'a str {
        &self.entry.key
    }
}

/// Best candidate for `query` scoring at least `cutoff`, or None.
pub fn best_match<'a>(query: &str, index: &'a NameIndex, cutoff: f64) -> Option<Match<'a>> {
    scan(query, index, cutoff, true)
}

fn scan<'a>(query: &str, index: &'a NameIndex, cutoff: f64, prune: bool) -> Option<Match<'a>> {
    let query = normalize_name(query);

    // Only an identical key scores 100 and keys are unique, so a hit is the answer
    if prune {
        if let Some(position) = index.position(&query) {
            let entry = &index.entries()[position];
            return Some(Match { entry, score: 100.0, position }).filter(|m| m.score >= cutoff);
        }
    }

    let (set_length, set_spaces) = token_set_shape(&query);
    let probe = Probe {
        mask: char_mask(&query),
        length: query.chars().count(),
        spaces: query.matches(' ').count(),
        set_length,
        set_spaces,
    };

    let mut best: Option<Match<'a>> = None;

    for (position, entry) in index.entries().iter().enumerate() {
        if prune && probe.cannot_reach(entry, cutoff) {
            continue;
        }

        let score = normalized_score(&query, &entry.key);
        if best.map_or(true, |b| score > b.score) {
            best = Some(Match { entry, score, position });
            if score >= 100.0 {
                break;
            }
        }
    }

    best.filter(|m| m.score >= cutoff)
}

/// Blocking data for one query
struct Probe {
    mask: u64,
    length: usize,
    spaces: usize,
    set_length: usize,
    set_spaces: usize,
}

impl Probe {
    /// True when `entry` provably scores below `cutoff`.
    ///
    /// Without a shared letter or digit the two names share no token, so every
    /// score component is an edit-distance ratio whose common characters can
    /// only be separators. ratio and token_sort compare the full forms,
    /// token_set compares the distinct tokens:
    ///   score <= max(edit_bound(full), 0.95 * edit_bound(distinct))
    fn cannot_reach(&self, entry: &IndexEntry, cutoff: f64) -> bool {
        if entry.mask & self.mask != 0 {
            return false;
        }
        let full = edit_bound(self.length, self.spaces, entry.length, entry.spaces);
        let distinct = edit_bound(self.set_length, self.set_spaces, entry.set_length, entry.set_spaces);
        full.max(distinct * TOKEN_SCALE) < cutoff
    }
}

/// Best possible ratio of two strings sharing only separators
fn edit_bound(len_a: usize, spaces_a: usize, len_b: usize, spaces_b: usize) -> f64 {
    let longest = len_a.max(len_b);
    if longest == 0 {
        0.0
    } else {
        100.0 * spaces_a.min(spaces_b) as f64 / longest as f64
    }
}

/// Similarity of two raw names in [0, 100]
pub fn score(a: &str, b: &str) -> f64 {
    normalized_score(&normalize_name(a), &normalize_name(b))
}

/// Similarity of two already-normalized names
fn normalized_score(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 100.0;
    }

    let base = ratio(a, b);
    let sorted = token_sort_ratio(a, b) * TOKEN_SCALE;
    let set = token_set_ratio(a, b) * TOKEN_SCALE;

    base.max(sorted).max(set)
}

/// Normalized Levenshtein similarity × 100; empty input scores 0
pub fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    normalized_levenshtein(a, b) * 100.0
}

/// Ratio after sorting whitespace-separated tokens
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sorted_tokens(a), &sorted_tokens(b))
}

/// Compares the shared tokens against each side's full token set
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();

    let shared = join(tokens_a.intersection(&tokens_b));
    let only_a = join(tokens_a.difference(&tokens_b));
    let only_b = join(tokens_b.difference(&tokens_a));

    let combined_a = join_nonempty(&shared, &only_a);
    let combined_b = join_nonempty(&shared, &only_b);

    ratio(&shared, &combined_a)
        .max(ratio(&shared, &combined_b))
        .max(ratio(&combined_a, &combined_b))
}

fn sorted_tokens(text: &str) -> String {
    let mut tokens: Vec<&str> = text.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

fn join<'a, 'b: 'a, I: Iterator<Item = &'a &'b str>>(tokens: I) -> String {
    tokens.copied().collect::<Vec<_>>().join(" ")
}

fn join_nonempty(left: &str, right: &str) -> String {
    match (left.is_empty(), right.is_empty()) {
        (true, _) => right.to_string(),
        (_, true) => left.to_string(),
        _ => format!("{} {}", left, right),
    }
}

// ============================================================================
// TESTS
// ============================================================================
