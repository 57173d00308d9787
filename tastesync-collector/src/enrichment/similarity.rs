//! String normalization and similarity scoring for fuzzy lookup

use regex::Regex;
use std::sync::{Arc, LazyLock};

use crate::error::SyncError;

/// Bracketed featuring credits: "(feat. X)", "[ft. X]", "(with X)"
static BRACKETED_FEATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\(\[]\s*(?:feat\.?|ft\.?|featuring|with)\s[^\)\]]*[\)\]]").expect("valid regex")
});

/// Trailing featuring credits: "Song feat. X", "Song ft X"
static TRAILING_FEATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s(?:feat\.?|ft\.?|featuring)\s.*$").expect("valid regex")
});

/// Canonical form used for fuzzy comparison
///
/// Lowercases, cuts featuring-artist credits, strips punctuation and collapses
/// whitespace. "Song (feat. X) - Live!" becomes "song live".
pub fn normalize(input: &str) -> String {
    let lowered = input.to_lowercase();
    let without_brackets = BRACKETED_FEATURE.replace_all(&lowered, " ");
    let without_trailing = TRAILING_FEATURE.replace(&without_brackets, "");

    // Apostrophes and dots join words ("don't" -> "dont"), other punctuation splits them
    let stripped: String = without_trailing
        .chars()
        .filter_map(|c| match c {
            '\'' | '.' => None,
            c if c.is_alphanumeric() || c.is_whitespace() => Some(c),
            _ => Some(' '),
        })
        .collect();

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pluggable string similarity in 0.0-1.0
pub trait SimilarityStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, a: &str, b: &str) -> f64;

    /// Score of a (title, artist) pair: mean of the two component scores
    fn pair_score(&self, a: (&str, &str), b: (&str, &str)) -> f64 {
        (self.score(a.0, b.0) + self.score(a.1, b.1)) / 2.0
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NormalizedLevenshtein;

impl SimilarityStrategy for NormalizedLevenshtein {
    fn name(&self) -> &'static str {
        "levenshtein"
    }

    fn score(&self, a: &str, b: &str) -> f64 {
        strsim::normalized_levenshtein(a, b)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JaroWinkler;

impl SimilarityStrategy for JaroWinkler {
    fn name(&self) -> &'static str {
        "jaro_winkler"
    }

    fn score(&self, a: &str, b: &str) -> f64 {
        strsim::jaro_winkler(a, b)
    }
}

/// Look up a strategy by its configured name
pub fn strategy_from_name(name: &str) -> Result<Arc<dyn SimilarityStrategy>, SyncError> {
    match name.trim().to_lowercase().as_str() {
        "levenshtein" | "normalized_levenshtein" => Ok(Arc::new(NormalizedLevenshtein)),
        "jaro_winkler" | "jarowinkler" => Ok(Arc::new(JaroWinkler)),
        other => Err(SyncError::Config(format!("Unknown similarity strategy: {}", other))),
    }
}
