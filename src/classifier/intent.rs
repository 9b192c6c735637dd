use serde::{Deserialize, Serialize};

use super::{Matcher, RuleError, RuleSet};

/// What the customer is asking about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    General,
    OrderTracking,
    PaymentIssue,
    ComplaintRegistration,
    RefundStatus,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::General => "general",
            Intent::OrderTracking => "order_tracking",
            Intent::PaymentIssue => "payment_issue",
            Intent::ComplaintRegistration => "complaint_registration",
            Intent::RefundStatus => "refund_status",
        }
    }
}

// Order ids look like "ord123".
const ORDER: &str = r"order|tracker|track|ord\d+|awb";
const PAYMENT: &[&str] = &["payment", "paid", "transaction", "utr", "upi", "card"];
const COMPLAINT: &[&str] = &["complaint", "issue", "problem", "shikayat", "register"];
const REFUND: &[&str] = &["refund", "return", "money back", "paise wapas"];

/// Resolved with `RuleSet::resolve_first`: order tracking beats payment,
/// payment beats complaint, complaint beats refund.
pub(super) fn rules() -> Result<RuleSet<Intent>, RuleError> {
    Ok(RuleSet::new(Intent::General)
        .then(Matcher::pattern(ORDER)?, Intent::OrderTracking)
        .then(Matcher::keywords("payment", PAYMENT, &[])?, Intent::PaymentIssue)
        .then(
            Matcher::keywords("complaint", COMPLAINT, &[])?,
            Intent::ComplaintRegistration,
        )
        .then(Matcher::keywords("refund", REFUND, &[])?, Intent::RefundStatus))
}
