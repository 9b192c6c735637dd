//! In-memory counters behind `/stats` and `/metrics`.  Never persisted.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::classifier::{ClassificationResult, Intent, Language, Sentiment, Urgency};
use crate::escalation::FlagReason;

const SENTIMENTS: [Sentiment; 4] = [
    Sentiment::Positive,
    Sentiment::Neutral,
    Sentiment::Negative,
    Sentiment::Frustrated,
];
const URGENCIES: [Urgency; 4] = [
    Urgency::Low,
    Urgency::Medium,
    Urgency::High,
    Urgency::Critical,
];
const LANGUAGES: [Language; 6] = [
    Language::En,
    Language::Hi,
    Language::Ta,
    Language::Te,
    Language::Mr,
    Language::Bn,
];
const INTENTS: [Intent; 5] = [
    Intent::General,
    Intent::OrderTracking,
    Intent::PaymentIssue,
    Intent::ComplaintRegistration,
    Intent::RefundStatus,
];

fn counters<const N: usize>() -> [AtomicU64; N] {
    std::array::from_fn(|_| AtomicU64::new(0))
}

#[derive(Debug)]
pub struct Stats {
    total_requests: AtomicU64,
    rejected_requests: AtomicU64,
    invalid_requests: AtomicU64,
    sentiment: [AtomicU64; 4],
    urgency: [AtomicU64; 4],
    language: [AtomicU64; 6],
    intent: [AtomicU64; 5],
    flags: [AtomicU64; 2],
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            rejected_requests: AtomicU64::new(0),
            invalid_requests: AtomicU64::new(0),
            sentiment: counters(),
            urgency: counters(),
            language: counters(),
            intent: counters(),
            flags: counters(),
        }
    }
}

/// Point-in-time copy of the counters, serialised for `/stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub rejected_requests: u64,
    pub invalid_requests: u64,
    /// Messages labelled high or critical urgency.
    pub urgent_cases: u64,
    pub frustrated_customers: u64,
    pub fraud_flags: u64,
    pub critical_flags: u64,
    pub by_sentiment: BTreeMap<&'static str, u64>,
    pub by_urgency: BTreeMap<&'static str, u64>,
    pub by_language: BTreeMap<&'static str, u64>,
    pub by_intent: BTreeMap<&'static str, u64>,
}

impl Stats {
    /// Count an inbound request before admission.
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid(&self) {
        self.invalid_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_classified(&self, labels: &ClassificationResult, flags: &[FlagReason]) {
        self.sentiment[labels.sentiment as usize].fetch_add(1, Ordering::Relaxed);
        self.urgency[labels.urgency as usize].fetch_add(1, Ordering::Relaxed);
        self.language[labels.language as usize].fetch_add(1, Ordering::Relaxed);
        self.intent[labels.intent as usize].fetch_add(1, Ordering::Relaxed);
        for flag in flags {
            self.flags[*flag as usize].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn flag_count(&self, reason: FlagReason) -> u64 {
        self.flags[reason as usize].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let by_sentiment: BTreeMap<_, _> = SENTIMENTS
            .iter()
            .map(|s| (s.as_str(), load(&self.sentiment[*s as usize])))
            .collect();
        let by_urgency: BTreeMap<_, _> = URGENCIES
            .iter()
            .map(|u| (u.as_str(), load(&self.urgency[*u as usize])))
            .collect();
        let by_language: BTreeMap<_, _> = LANGUAGES
            .iter()
            .map(|l| (l.code(), load(&self.language[*l as usize])))
            .collect();
        let by_intent: BTreeMap<_, _> = INTENTS
            .iter()
            .map(|i| (i.as_str(), load(&self.intent[*i as usize])))
            .collect();
        StatsSnapshot {
            total_requests: load(&self.total_requests),
            rejected_requests: load(&self.rejected_requests),
            invalid_requests: load(&self.invalid_requests),
            urgent_cases: by_urgency["high"] + by_urgency["critical"],
            frustrated_customers: by_sentiment["frustrated"],
            fraud_flags: self.flag_count(FlagReason::FraudPattern),
            critical_flags: self.flag_count(FlagReason::CriticalUrgency),
            by_sentiment,
            by_urgency,
            by_language,
            by_intent,
        }
    }
}
