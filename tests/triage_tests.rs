#[path = "common/mod.rs"]
mod common;

use once_cell::sync::Lazy;
use reqwest::Client;
use tokio::net::TcpListener as TokioTcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use triage::{app, build_state_from_env};

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

// Helper to spawn an instance of the app bound to an available port.
async fn spawn_app() -> (String, JoinHandle<()>) {
    let listener = TokioTcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = build_state_from_env().await.unwrap();
    let app = app(state);
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), handle)
}

async fn analyze(base: &str, body: serde_json::Value) -> (u16, serde_json::Value) {
    let resp = Client::new()
        .post(format!("{}/analyze", base))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

#[tokio::test]
async fn analyze_urgent_refund() {
    let _lock = ENV_MUTEX.lock().await;
    let _env = common::clean_env();
    let (base, h) = spawn_app().await;
    let (status, json) = analyze(
        &base,
        serde_json::json!({ "text": "This is urgent, I need a refund now!" }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(json["sentiment"], "neutral");
    assert_eq!(json["urgency"], "high");
    assert_eq!(json["language"], "en");
    assert_eq!(json["fraud"], true);
    assert_eq!(json["flags"], serde_json::json!(["fraud_pattern"]));
    assert_eq!(json["intent"], "refund_status");
    h.abort();
}

#[tokio::test]
async fn analyze_hinglish_emergency_keeps_conversation_id() {
    let _lock = ENV_MUTEX.lock().await;
    let _env = common::clean_env();
    let (base, h) = spawn_app().await;
    let (status, json) = analyze(
        &base,
        serde_json::json!({
            "text": "Bhai this is a critical emergency",
            "conversationId": "conv-42"
        }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(json["urgency"], "critical");
    assert_eq!(json["language"], "hi");
    assert_eq!(json["fraud"], false);
    assert_eq!(json["flags"], serde_json::json!(["critical_urgency"]));
    assert_eq!(json["conversationId"], "conv-42");
    assert_eq!(json["intent"], "general");
    h.abort();
}

#[tokio::test]
async fn analyze_positive_message() {
    let _lock = ENV_MUTEX.lock().await;
    let _env = common::clean_env();
    let (base, h) = spawn_app().await;
    let (_, json) = analyze(&base, serde_json::json!({ "text": "Thank you, great service!" })).await;
    assert_eq!(json["sentiment"], "positive");
    assert_eq!(json["urgency"], "low");
    assert_eq!(json["flags"], serde_json::json!([]));
    h.abort();
}

#[tokio::test]
async fn analyze_requires_text() {
    let _lock = ENV_MUTEX.lock().await;
    let _env = common::clean_env();
    let (base, h) = spawn_app().await;
    for body in [serde_json::json!({}), serde_json::json!({ "text": "" })] {
        let (status, json) = analyze(&base, body).await;
        assert_eq!(status, 400);
        assert_eq!(json["errorCode"], 4002);
    }
    h.abort();
}

#[tokio::test]
async fn malformed_json_is_a_structured_error() {
    let _lock = ENV_MUTEX.lock().await;
    let _env = common::clean_env();
    let (base, h) = spawn_app().await;
    let resp = Client::new()
        .post(format!("{}/analyze", base))
        .header("content-type", "application/json")
        .body("{ not json")
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_client_error());
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["errorCode"], 4000);
    h.abort();
}

#[tokio::test]
async fn healthz_reports_quota() {
    let _lock = ENV_MUTEX.lock().await;
    let mut env = common::clean_env();
    env.set_many(&[("TRIAGE_RATE_LIMIT", "7"), ("TRIAGE_RATE_WINDOW_MS", "5000")]);
    let (base, h) = spawn_app().await;
    let json: serde_json::Value = Client::new()
        .get(format!("{}/healthz", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["limit"], 7);
    assert_eq!(json["windowMs"], 5000);
    assert_eq!(json["trackedCallers"], 0);
    assert_eq!(json["escalation"], false);
    h.abort();
}

#[tokio::test]
async fn stats_accumulate_across_requests() {
    let _lock = ENV_MUTEX.lock().await;
    let _env = common::clean_env();
    let (base, h) = spawn_app().await;
    for text in ["I am so angry", "emergency!", "scam", "namaste"] {
        analyze(&base, serde_json::json!({ "text": text })).await;
    }
    analyze(&base, serde_json::json!({})).await;
    let json: serde_json::Value = Client::new()
        .get(format!("{}/stats", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["totalRequests"], 5);
    assert_eq!(json["rejectedRequests"], 0);
    assert_eq!(json["invalidRequests"], 1);
    assert_eq!(json["frustratedCustomers"], 1);
    assert_eq!(json["urgentCases"], 1);
    assert_eq!(json["criticalFlags"], 1);
    assert_eq!(json["fraudFlags"], 1);
    assert_eq!(json["byLanguage"]["hi"], 1);
    assert_eq!(json["byIntent"]["general"], 4);
    h.abort();
}
