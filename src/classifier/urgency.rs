use serde::{Deserialize, Serialize};

use super::{Matcher, RuleError, RuleSet, RulesConfig};

/// `Medium` is part of the label model but no keyword rule assigns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
            Urgency::Critical => "critical",
        }
    }
}

pub(super) const URGENT: &[&str] = &["urgent", "asap", "immediately", "bilkul abhi"];
pub(super) const CRITICAL: &[&str] = &["critical", "emergency"];

pub(super) fn rules(cfg: &RulesConfig) -> Result<RuleSet<Urgency>, RuleError> {
    Ok(RuleSet::new(Urgency::Low)
        .then(
            Matcher::keywords("urgent", URGENT, &cfg.urgent_keywords)?,
            Urgency::High,
        )
        .then(
            Matcher::keywords("critical", CRITICAL, &cfg.critical_keywords)?,
            Urgency::Critical,
        ))
}
