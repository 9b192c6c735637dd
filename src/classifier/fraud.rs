use super::{Matcher, RuleError, RuleSet, RulesConfig};

pub(super) const FRAUD: &[&str] = &["refund", "chargeback", "scam", "hack"];

/// A single rule: any fraud keyword raises the flag.
pub(super) fn rules(cfg: &RulesConfig) -> Result<RuleSet<bool>, RuleError> {
    Ok(RuleSet::new(false).then(
        Matcher::keywords("fraud", FRAUD, &cfg.fraud_keywords)?,
        true,
    ))
}
