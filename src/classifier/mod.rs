//! Heuristic message classifier.
//!
//! Each category (sentiment, urgency, language, fraud, intent) is an ordered
//! list of `(pattern, label)` rules tested against the lower-cased text.  For
//! the label categories the last matching rule wins, so the order of the list
//! is the priority order.  Intent is the exception: its first matching rule
//! wins.  Categories are independent of each other.  When nothing matches, a
//! category falls back to its least severe label.

use std::sync::Arc;

use aho_corasick::AhoCorasick;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::util::{ac_for, whole_word_pattern};

pub mod fraud;
pub mod intent;
pub mod language;
pub mod sentiment;
pub mod urgency;

pub use self::intent::Intent;
pub use self::language::Language;
pub use self::sentiment::Sentiment;
pub use self::urgency::Urgency;

/// Labels derived from a single message.  Immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub sentiment: Sentiment,
    pub urgency: Urgency,
    pub language: Language,
    pub fraud: bool,
    pub intent: Intent,
}

impl Default for ClassificationResult {
    fn default() -> Self {
        Self {
            sentiment: Sentiment::Neutral,
            urgency: Urgency::Low,
            language: Language::En,
            fraud: false,
            intent: Intent::General,
        }
    }
}

/// Errors raised while compiling rules from configuration.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("empty keyword in {category} keywords")]
    EmptyKeyword { category: &'static str },
    #[error("failed to build keyword automaton: {0}")]
    Automaton(#[from] aho_corasick::BuildError),
    #[error("invalid rule pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Extra keywords appended to the built-in keyword sets.  Loaded from the
/// JSON file named by `TRIAGE_RULES_CONFIG`.  Extra keywords join the rule
/// of their category; they never change the order rules are applied in.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesConfig {
    #[serde(default)]
    pub positive_keywords: Vec<String>,
    #[serde(default)]
    pub frustrated_keywords: Vec<String>,
    #[serde(default)]
    pub negative_keywords: Vec<String>,
    #[serde(default)]
    pub urgent_keywords: Vec<String>,
    #[serde(default)]
    pub critical_keywords: Vec<String>,
    #[serde(default)]
    pub fraud_keywords: Vec<String>,
}

/// How a rule recognises its label in the lower-cased text.
#[derive(Clone)]
pub enum Matcher {
    /// Any keyword occurring anywhere, including inside longer words.
    Keywords(Arc<AhoCorasick>),
    /// Any word of the alternation occurring as a whole word.
    Words(Regex),
    /// An arbitrary regex, matched anywhere.
    Pattern(Regex),
}

impl Matcher {
    /// Substring matcher over built-in keywords plus configured extras.
    pub fn keywords(
        category: &'static str,
        builtin: &[&str],
        extra: &[String],
    ) -> Result<Self, RuleError> {
        let mut list: Vec<String> = builtin.iter().map(|k| k.to_string()).collect();
        for kw in extra {
            let kw = kw.trim();
            if kw.is_empty() {
                return Err(RuleError::EmptyKeyword { category });
            }
            list.push(kw.to_lowercase());
        }
        Ok(Matcher::Keywords(ac_for(&list)?))
    }

    /// Whole-word matcher.
    pub fn words(words: &[&str]) -> Result<Self, RuleError> {
        Ok(Matcher::Words(Regex::new(&whole_word_pattern(words))?))
    }

    pub fn pattern(source: &str) -> Result<Self, RuleError> {
        Ok(Matcher::Pattern(Regex::new(source)?))
    }

    pub fn is_match(&self, hay: &str) -> bool {
        match self {
            Matcher::Keywords(ac) => ac.is_match(hay),
            Matcher::Words(re) | Matcher::Pattern(re) => re.is_match(hay),
        }
    }
}

#[derive(Clone)]
pub struct Rule<L> {
    pub matcher: Matcher,
    pub label: L,
}

/// An ordered list of rules for one category.
#[derive(Clone)]
pub struct RuleSet<L> {
    rules: Vec<Rule<L>>,
    default: L,
}

impl<L: Copy> RuleSet<L> {
    pub fn new(default: L) -> Self {
        Self {
            rules: Vec::new(),
            default,
        }
    }

    /// Append a rule.  Under `resolve` later rules take priority over
    /// earlier ones; under `resolve_first` the reverse.
    pub fn then(mut self, matcher: Matcher, label: L) -> Self {
        self.rules.push(Rule { matcher, label });
        self
    }

    /// Label of the last matching rule, or the default.
    pub fn resolve(&self, hay: &str) -> L {
        let mut label = self.default;
        for rule in &self.rules {
            if rule.matcher.is_match(hay) {
                label = rule.label;
            }
        }
        label
    }

    /// Label of the first matching rule, or the default.
    pub fn resolve_first(&self, hay: &str) -> L {
        self.rules
            .iter()
            .find(|rule| rule.matcher.is_match(hay))
            .map_or(self.default, |rule| rule.label)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// The compiled rule sets of every category.
#[derive(Clone)]
pub struct Classifier {
    sentiment: RuleSet<Sentiment>,
    urgency: RuleSet<Urgency>,
    language: RuleSet<Language>,
    fraud: RuleSet<bool>,
    intent: RuleSet<Intent>,
}

static BUILTIN: Lazy<Classifier> = Lazy::new(|| {
    Classifier::new(&RulesConfig::default()).expect("built-in classifier rules compile")
});

impl Classifier {
    pub fn new(cfg: &RulesConfig) -> Result<Self, RuleError> {
        Ok(Self {
            sentiment: sentiment::rules(cfg)?,
            urgency: urgency::rules(cfg)?,
            language: language::rules()?,
            fraud: fraud::rules(cfg)?,
            intent: intent::rules()?,
        })
    }

    /// Label `text`.  Never fails; empty input yields the defaults.
    ///
    /// Matching is case-insensitive for the ASCII keywords.  Input is folded
    /// with `str::to_lowercase`, so Unicode letters whose upper and lower
    /// forms do not round-trip (dotless `ı` against `I`) may label
    /// differently in each case.
    pub fn classify(&self, text: &str) -> ClassificationResult {
        let hay = text.to_lowercase();
        ClassificationResult {
            sentiment: self.sentiment.resolve(&hay),
            urgency: self.urgency.resolve(&hay),
            language: self.language.resolve(&hay),
            fraud: self.fraud.resolve(&hay),
            intent: self.intent.resolve_first(&hay),
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        BUILTIN.clone()
    }
}

/// Classify with the built-in rules.
pub fn classify(text: &str) -> ClassificationResult {
    BUILTIN.classify(text)
}
