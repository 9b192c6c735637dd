#[path = "common/mod.rs"]
mod common;

use axum::extract::State;
use axum::http::StatusCode;
use axum::{routing::post, Json, Router};
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use triage::{
    app, build_state_from_env, Escalation, FlagReason, Intent, Notifier, NotifyError,
    WebhookNotifier,
};

type Received = Arc<Mutex<Vec<serde_json::Value>>>;

static ENV_MUTEX: Lazy<tokio::sync::Mutex<()>> = Lazy::new(|| tokio::sync::Mutex::new(()));

// Spin up a tiny webhook receiver that records every payload.
async fn start_mock_webhook(status: StatusCode) -> (SocketAddr, Received, JoinHandle<()>) {
    async fn record(
        State((seen, status)): State<(Received, StatusCode)>,
        Json(v): Json<serde_json::Value>,
    ) -> StatusCode {
        seen.lock().unwrap().push(v);
        status
    }
    let seen: Received = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/hook", post(record))
        .with_state((seen.clone(), status));
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, seen, handle)
}

async fn wait_for(seen: &Received, n: usize) {
    for _ in 0..50 {
        if seen.lock().unwrap().len() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn webhook_notifier_posts_payload() {
    let (addr, seen, _h) = start_mock_webhook(StatusCode::OK).await;
    let notifier =
        WebhookNotifier::new(format!("http://{}/hook", addr), Duration::from_millis(500)).unwrap();
    notifier
        .notify(&Escalation {
            conversation_id: Some("conv-1".into()),
            reason: FlagReason::CriticalUrgency,
            intent: Intent::OrderTracking,
            text: "critical emergency".into(),
        })
        .await
        .unwrap();
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["conversationId"], "conv-1");
    assert_eq!(seen[0]["reason"], "critical urgency detected");
    assert_eq!(seen[0]["code"], "critical_urgency");
    assert_eq!(seen[0]["intent"], "order_tracking");
    assert_eq!(seen[0]["text"], "critical emergency");
}

#[tokio::test]
async fn webhook_notifier_reports_error_status() {
    let (addr, _seen, _h) = start_mock_webhook(StatusCode::SERVICE_UNAVAILABLE).await;
    let notifier =
        WebhookNotifier::new(format!("http://{}/hook", addr), Duration::from_millis(500)).unwrap();
    let err = notifier
        .notify(&Escalation {
            conversation_id: None,
            reason: FlagReason::FraudPattern,
            intent: Intent::General,
            text: "scam".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, NotifyError::Status(503)));
}

#[tokio::test]
async fn webhook_notifier_reports_transport_error() {
    // Nothing listens on the discard port.
    let notifier =
        WebhookNotifier::new("http://127.0.0.1:9/hook", Duration::from_millis(200)).unwrap();
    let err = notifier
        .notify(&Escalation {
            conversation_id: None,
            reason: FlagReason::FraudPattern,
            intent: Intent::General,
            text: "scam".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, NotifyError::Transport(_)));
}

#[tokio::test]
async fn flagged_message_is_relayed_from_analyze() {
    let _lock = ENV_MUTEX.lock().await;
    let (addr, seen, _h) = start_mock_webhook(StatusCode::OK).await;
    let mut env = common::clean_env();
    env.set("FLAGGED_WEBHOOK_URL", &format!("http://{}/hook", addr));

    let state = build_state_from_env().await.unwrap();
    assert!(state.escalator.is_enabled());
    let resp = app(state)
        .oneshot(common::analyze_request(
            Some("1.1.1.1"),
            &serde_json::json!({
                "text": "Critical: my account was hacked",
                "conversationId": "conv-9"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    wait_for(&seen, 2).await;
    let seen = seen.lock().unwrap();
    let reasons: Vec<&str> = seen.iter().filter_map(|v| v["code"].as_str()).collect();
    assert_eq!(reasons, vec!["critical_urgency", "fraud_pattern"]);
    assert!(seen.iter().all(|v| v["conversationId"] == "conv-9"));
    assert!(seen.iter().all(|v| v["intent"] == "general"));
}

#[tokio::test]
async fn unreachable_webhook_does_not_fail_analyze() {
    let _lock = ENV_MUTEX.lock().await;
    let mut env = common::clean_env();
    env.set_many(&[
        ("FLAGGED_WEBHOOK_URL", "http://127.0.0.1:9/hook"),
        ("TRIAGE_WEBHOOK_TIMEOUT_MS", "100"),
    ]);
    let state = build_state_from_env().await.unwrap();
    let resp = app(state)
        .oneshot(common::analyze_request(
            None,
            &serde_json::json!({ "text": "emergency chargeback" }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = common::json_body(resp).await;
    assert_eq!(
        json["flags"],
        serde_json::json!(["critical_urgency", "fraud_pattern"])
    );
}
