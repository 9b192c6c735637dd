//! Escalation flags and their delivery.
//!
//! A message whose labels show critical urgency or fraudulent language is
//! flagged.  Each flag is handed to a `Notifier` on a detached task so that
//! delivery never delays or fails the request that raised it.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::classifier::{ClassificationResult, Intent, Urgency};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagReason {
    CriticalUrgency,
    FraudPattern,
}

impl FlagReason {
    pub const ALL: [FlagReason; 2] = [FlagReason::CriticalUrgency, FlagReason::FraudPattern];

    pub fn as_str(&self) -> &'static str {
        match self {
            FlagReason::CriticalUrgency => "critical_urgency",
            FlagReason::FraudPattern => "fraud_pattern",
        }
    }

    /// Human readable reason sent to the webhook.
    pub fn description(&self) -> &'static str {
        match self {
            FlagReason::CriticalUrgency => "critical urgency detected",
            FlagReason::FraudPattern => "fraudulent language pattern detected",
        }
    }
}

/// Flags raised by a classification, critical urgency first.
pub fn flags_for(labels: &ClassificationResult) -> Vec<FlagReason> {
    let mut flags = Vec::new();
    if labels.urgency == Urgency::Critical {
        flags.push(FlagReason::CriticalUrgency);
    }
    if labels.fraud {
        flags.push(FlagReason::FraudPattern);
    }
    flags
}

/// One flagged message, as delivered to a notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Escalation {
    pub conversation_id: Option<String>,
    pub reason: FlagReason,
    pub intent: Intent,
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("webhook responded with status {0}")]
    Status(u16),
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    async fn notify(&self, escalation: &Escalation) -> Result<(), NotifyError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPayload<'a> {
    conversation_id: Option<&'a str>,
    reason: &'static str,
    code: FlagReason,
    intent: Intent,
    text: &'a str,
}

/// POSTs each escalation as JSON to a fixed URL.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, escalation: &Escalation) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            conversation_id: escalation.conversation_id.as_deref(),
            reason: escalation.reason.description(),
            code: escalation.reason,
            intent: escalation.intent,
            text: &escalation.text,
        };
        let resp = self.client.post(&self.url).json(&payload).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// Dispatches escalations to the configured notifier, if any.
#[derive(Clone, Default)]
pub struct Escalator {
    notifier: Option<Arc<dyn Notifier>>,
}

impl Escalator {
    pub fn new(notifier: Option<Arc<dyn Notifier>>) -> Self {
        Self { notifier }
    }

    pub fn is_enabled(&self) -> bool {
        self.notifier.is_some()
    }

    /// Deliver `escalations` on a detached task.  Failures are logged and
    /// dropped.  Returns the task handle when something was spawned.
    pub fn dispatch(&self, escalations: Vec<Escalation>) -> Option<tokio::task::JoinHandle<()>> {
        let notifier = self.notifier.clone()?;
        if escalations.is_empty() {
            return None;
        }
        Some(tokio::spawn(async move {
            for escalation in &escalations {
                match notifier.notify(escalation).await {
                    Ok(()) => tracing::debug!(
                        notifier = %notifier.name(),
                        reason = escalation.reason.as_str(),
                        "escalation delivered"
                    ),
                    Err(err) => tracing::warn!(
                        notifier = %notifier.name(),
                        reason = escalation.reason.as_str(),
                        error = %err,
                        "escalation delivery failed"
                    ),
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<Escalation>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Notifier for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn notify(&self, escalation: &Escalation) -> Result<(), NotifyError> {
            self.seen.lock().unwrap().push(escalation.clone());
            if self.fail {
                Err(NotifyError::Status(500))
            } else {
                Ok(())
            }
        }
    }

    fn escalation(reason: FlagReason) -> Escalation {
        Escalation {
            conversation_id: Some("c-1".into()),
            reason,
            intent: Intent::General,
            text: "help".into(),
        }
    }

    #[test]
    fn flags_follow_labels() {
        assert!(flags_for(&classify("where is my order")).is_empty());
        assert_eq!(
            flags_for(&classify("emergency")),
            vec![FlagReason::CriticalUrgency]
        );
        assert_eq!(
            flags_for(&classify("critical scam on my card")),
            vec![FlagReason::CriticalUrgency, FlagReason::FraudPattern]
        );
        // High urgency alone is not escalated.
        assert!(flags_for(&classify("asap")).is_empty());
    }

    #[test]
    fn flag_reason_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(FlagReason::FraudPattern).unwrap(),
            serde_json::json!("fraud_pattern")
        );
    }

    #[tokio::test]
    async fn dispatch_delivers_every_escalation() {
        let rec = Arc::new(Recording::default());
        let escalator = Escalator::new(Some(rec.clone()));
        let handle = escalator
            .dispatch(vec![
                escalation(FlagReason::CriticalUrgency),
                escalation(FlagReason::FraudPattern),
            ])
            .expect("task spawned");
        handle.await.unwrap();
        let seen = rec.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].reason, FlagReason::FraudPattern);
    }

    #[tokio::test]
    async fn failures_do_not_stop_delivery() {
        let rec = Arc::new(Recording {
            fail: true,
            ..Default::default()
        });
        let escalator = Escalator::new(Some(rec.clone()));
        escalator
            .dispatch(vec![
                escalation(FlagReason::CriticalUrgency),
                escalation(FlagReason::FraudPattern),
            ])
            .unwrap()
            .await
            .unwrap();
        assert_eq!(rec.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn nothing_spawned_without_notifier_or_flags() {
        assert!(Escalator::default()
            .dispatch(vec![escalation(FlagReason::FraudPattern)])
            .is_none());
        let escalator = Escalator::new(Some(Arc::new(Recording::default())));
        assert!(escalator.dispatch(Vec::new()).is_none());
    }
}
