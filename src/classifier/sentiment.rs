use serde::{Deserialize, Serialize};

use super::{Matcher, RuleError, RuleSet, RulesConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
    Frustrated,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
            Sentiment::Frustrated => "frustrated",
        }
    }
}

pub(super) const POSITIVE: &[&str] = &["thank", "great", "awesome"];
pub(super) const FRUSTRATED: &[&str] = &["angry", "mad", "frustrated", "naraaz"];
pub(super) const NEGATIVE: &[&str] = &["bad", "terrible", "hate"];

/// Positive, then frustrated, then negative: a message that is both
/// grateful and hateful reads as negative.
pub(super) fn rules(cfg: &RulesConfig) -> Result<RuleSet<Sentiment>, RuleError> {
    Ok(RuleSet::new(Sentiment::Neutral)
        .then(
            Matcher::keywords("positive", POSITIVE, &cfg.positive_keywords)?,
            Sentiment::Positive,
        )
        .then(
            Matcher::keywords("frustrated", FRUSTRATED, &cfg.frustrated_keywords)?,
            Sentiment::Frustrated,
        )
        .then(
            Matcher::keywords("negative", NEGATIVE, &cfg.negative_keywords)?,
            Sentiment::Negative,
        ))
}
