//! Fuzzy matching of OCR titles against catalog names
//!
//! Each candidate is scored three ways and keeps its best score:
//! - token set: shared words count fully, extra words on one side are free
//! - token sort: words sorted before comparing, so order does not matter
//! - ratio: insert/delete edit similarity of the whole string
//!
//! All scores are on a 0–100 scale. Token scores ignore case and punctuation;
//! the plain ratio ignores case only.

use crate::catalog::CatalogEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Default minimum score for accepting a match
pub const DEFAULT_THRESHOLD: u8 = 90;

/// Component scores for one title/name pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricScores {
    pub token_set: f64,
    pub token_sort: f64,
    pub ratio: f64,
}

impl MetricScores {
    /// Best of the three scores
    pub fn best(&self) -> f64 {
        self.token_set.max(self.token_sort).max(self.ratio)
    }
}

/// Outcome of matching one title
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// The title as given
    pub title: String,
    /// Accepted catalog entry, absent when nothing reached the threshold
    pub matched: Option<CatalogEntry>,
    /// Best score seen, whether or not it was accepted
    pub score: f64,
    /// Component scores of the best candidate
    pub scores: MetricScores,
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        self.matched.is_some()
    }

    pub fn matched_id(&self) -> Option<&str> {
        self.matched.as_ref().map(|e| e.id.as_str())
    }
}

/// A string prepared for scoring
#[derive(Debug, Clone)]
struct Prepared {
    /// Lowercased and trimmed, punctuation kept
    raw: String,
    /// Lowercased alphanumeric words
    tokens: Vec<String>,
}

impl Prepared {
    fn new(s: &str) -> Self {
        let raw = s.trim().to_lowercase();
        let tokens = raw
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        Self { raw, tokens }
    }
}

/// Matches titles against a fixed list of catalog entries
pub struct FuzzyMatcher<'a> {
    entries: &'a [CatalogEntry],
    prepared: Vec<Prepared>,
    threshold: u8,
}

impl<'a> FuzzyMatcher<'a> {
    /// Prepare every catalog name once
    pub fn new(entries: &'a [CatalogEntry], threshold: u8) -> Self {
        let prepared = entries.iter().map(|e| Prepared::new(&e.name)).collect();
        Self {
            entries,
            prepared,
            threshold: threshold.min(100),
        }
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Find the best catalog entry for `title`.
    ///
    /// The first entry in catalog order wins a tie. A best score below the
    /// threshold yields an unmatched result that still carries that score.
    pub fn match_title(&self, title: &str) -> MatchResult {
        let query = Prepared::new(title);
        let mut best: Option<(usize, MetricScores, f64)> = None;

        for (index, candidate) in self.prepared.iter().enumerate() {
            let scores = score_prepared(&query, candidate);
            let score = scores.best();
            if best.as_ref().map_or(true, |(_, _, top)| score > *top) {
                best = Some((index, scores, score));
            }
        }

        match best {
            Some((index, scores, score)) if score >= f64::from(self.threshold) => MatchResult {
                title: title.to_string(),
                matched: Some(self.entries[index].clone()),
                score,
                scores,
            },
            Some((_, scores, score)) => MatchResult {
                title: title.to_string(),
                matched: None,
                score,
                scores,
            },
            None => MatchResult {
                title: title.to_string(),
                matched: None,
                score: 0.0,
                scores: MetricScores::default(),
            },
        }
    }
}

/// Score two strings with all three metrics
pub fn score(a: &str, b: &str) -> MetricScores {
    score_prepared(&Prepared::new(a), &Prepared::new(b))
}

fn score_prepared(a: &Prepared, b: &Prepared) -> MetricScores {
    MetricScores {
        token_set: token_set_ratio(&a.tokens, &b.tokens),
        token_sort: token_sort_ratio(&a.tokens, &b.tokens),
        ratio: ratio(&a.raw, &b.raw),
    }
}

/// Indel similarity on a 0–100 scale.
///
/// Only insertions and deletions count as edits, so a dropped character
/// costs one edit against the combined length of both strings.
fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 0.0;
    }
    200.0 * lcs_len(&a, &b) as f64 / total as f64
}

/// Length of the longest common subsequence
fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut row = vec![0usize; b.len() + 1];
    for &ca in a {
        let mut diag = 0;
        for (j, &cb) in b.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == cb { diag + 1 } else { above.max(row[j]) };
            diag = above;
        }
    }
    row[b.len()]
}

fn token_sort_ratio(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    ratio(&sorted_join(a), &sorted_join(b))
}

fn token_set_ratio(a: &[String], b: &[String]) -> f64 {
    let set_a: BTreeSet<&str> = a.iter().map(String::as_str).collect();
    let set_b: BTreeSet<&str> = b.iter().map(String::as_str).collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let common: Vec<&str> = set_a.intersection(&set_b).copied().collect();
    let only_a: Vec<&str> = set_a.difference(&set_b).copied().collect();
    let only_b: Vec<&str> = set_b.difference(&set_a).copied().collect();

    // One side's words are all contained in the other's
    if !common.is_empty() && (only_a.is_empty() || only_b.is_empty()) {
        return 100.0;
    }

    let common_joined = common.join(" ");
    let with_a = join_nonempty(&common_joined, &only_a.join(" "));
    let with_b = join_nonempty(&common_joined, &only_b.join(" "));

    let mut best = ratio(&with_a, &with_b);
    if !common.is_empty() {
        best = best
            .max(ratio(&common_joined, &with_a))
            .max(ratio(&common_joined, &with_b));
    }
    best
}

fn sorted_join(tokens: &[String]) -> String {
    let mut sorted: Vec<&str> = tokens.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.join(" ")
}

fn join_nonempty(head: &str, tail: &str) -> String {
    match (head.is_empty(), tail.is_empty()) {
        (true, _) => tail.to_string(),
        (_, true) => head.to_string(),
        _ => format!("{head} {tail}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries() -> Vec<CatalogEntry> {
        vec![
            CatalogEntry::new("1", "Slay the Dragon"),
            CatalogEntry::new("2", "Defeat the Boss"),
        ]
    }

    #[test]
    fn test_identical_title_scores_100() {
        let entries = entries();
        let matcher = FuzzyMatcher::new(&entries, 100);
        let result = matcher.match_title("Defeat the Boss");
        assert_eq!(result.matched_id(), Some("2"));
        assert_eq!(result.score, 100.0);
    }

    #[test]
    fn test_partial_title_matches_by_token_set() {
        let entries = entries();
        let matcher = FuzzyMatcher::new(&entries, 80);
        let result = matcher.match_title("slay dragon");
        assert_eq!(result.matched_id(), Some("1"));
        assert!(result.score >= 80.0);
        assert_eq!(result.scores.token_set, 100.0);
    }

    #[test]
    fn test_below_threshold_is_unmatched_with_score() {
        let entries = entries();
        let matcher = FuzzyMatcher::new(&entries, 90);
        let result = matcher.match_title("Completely Unrelated Text");
        assert!(!result.is_match());
        assert!(result.score < 90.0);
        assert!(result.score > 0.0);
    }

    #[test]
    fn test_empty_catalog_never_matches() {
        let matcher = FuzzyMatcher::new(&[], 0);
        let result = matcher.match_title("Anything");
        assert!(!result.is_match());
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_duplicate_names_first_entry_wins() {
        let entries = vec![
            CatalogEntry::new("7", "Same Name"),
            CatalogEntry::new("3", "Same Name"),
        ];
        let matcher = FuzzyMatcher::new(&entries, 90);
        assert_eq!(matcher.match_title("Same Name").matched_id(), Some("7"));
    }

    #[test]
    fn test_case_and_punctuation_ignored_by_token_metrics() {
        let s = score("LIGHTNING-BEARER!", "Lightning Bearer");
        assert_eq!(s.token_sort, 100.0);
        assert_eq!(s.token_set, 100.0);
        assert!(s.ratio < 100.0);
    }

    #[test]
    fn test_token_sort_ignores_word_order() {
        let s = score("Boss the Defeat", "Defeat the Boss");
        assert_eq!(s.token_sort, 100.0);
    }

    #[test]
    fn test_ratio_counts_edits() {
        // a substitution is one deletion plus one insertion over 20 characters
        let s = score("abcdefghij", "abcdefghiX");
        assert!((s.ratio - 90.0).abs() < 1e-9);

        let s = score("abc", "xyz");
        assert_eq!(s.ratio, 0.0);
    }

    #[test]
    fn test_dropped_characters_stay_above_default_threshold() {
        let entries = entries();
        let matcher = FuzzyMatcher::new(&entries, DEFAULT_THRESHOLD);
        let result = matcher.match_title("Slay the Drgn");

        assert_eq!(result.matched_id(), Some("1"));
        // 2 * 13 matching characters over 28
        assert!((result.scores.ratio - 2600.0 / 28.0).abs() < 1e-9);
        assert!((result.score - 2600.0 / 28.0).abs() < 1e-9);
    }

    #[test]
    fn test_lcs_len() {
        let chars = |s: &str| s.chars().collect::<Vec<_>>();
        assert_eq!(lcs_len(&chars("slay the drgn"), &chars("slay the dragon")), 13);
        assert_eq!(lcs_len(&chars(""), &chars("abc")), 0);
        assert_eq!(lcs_len(&chars("abcbdab"), &chars("bdcaba")), 4);
    }

    #[test]
    fn test_punctuation_only_title_matches_itself() {
        let entries = vec![CatalogEntry::new("9", "???")];
        let matcher = FuzzyMatcher::new(&entries, 100);
        assert_eq!(matcher.match_title("???").matched_id(), Some("9"));
    }

    #[test]
    fn test_threshold_is_capped_at_100() {
        let matcher = FuzzyMatcher::new(&[], 250);
        assert_eq!(matcher.threshold(), 100);
    }
}
