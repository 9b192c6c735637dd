//! Utility helpers for Triage.
//!
//! Shared pattern compilation used by the classifier rules. Keyword lists
//! are compiled into Aho–Corasick automata once and memoised, so a
//! classifier rebuilt from the same configuration reuses the same matcher.

use ahash::AHasher;
use aho_corasick::{AhoCorasick, AhoCorasickBuilder, BuildError};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A memoising wrapper around `AhoCorasick::new` to avoid recompiling
/// automata for repeated lists.  The cache key is a hash of the pattern list.
static AC_CACHE: Lazy<DashMap<u64, Arc<AhoCorasick>>> = Lazy::new(DashMap::new);

/// Given a list of literal patterns, return a shared `AhoCorasick` matcher.
/// If a matcher for the list already exists in the cache, a cloned Arc is
/// returned.  Otherwise a new matcher is constructed and inserted.
pub fn ac_for(list: &[String]) -> Result<Arc<AhoCorasick>, BuildError> {
    let mut hasher = AHasher::default();
    for pat in list {
        pat.hash(&mut hasher);
    }
    let key = hasher.finish();
    if let Some(existing) = AC_CACHE.get(&key) {
        return Ok(existing.clone());
    }
    // Haystacks are lower-cased before matching; patterns follow suit.
    let lower: Vec<String> = list.iter().map(|p| p.to_lowercase()).collect();
    let ac = AhoCorasickBuilder::new()
        .ascii_case_insensitive(true)
        .build(lower)?;
    let arc = Arc::new(ac);
    AC_CACHE.insert(key, arc.clone());
    Ok(arc)
}

/// Build a regex source matching any of `words` as a whole word.
///
/// Boundaries are ASCII only: a non-ASCII letter next to a word counts as a
/// separator, so `"éha"` contains the word `"ha"`.  Only match existence is
/// meaningful; the match span includes the separating characters.
pub fn whole_word_pattern(words: &[&str]) -> String {
    let alternatives: Vec<String> = words.iter().map(|w| regex::escape(w)).collect();
    format!(
        r"(?:^|[^0-9A-Za-z_])(?:{})(?:[^0-9A-Za-z_]|$)",
        alternatives.join("|")
    )
}
