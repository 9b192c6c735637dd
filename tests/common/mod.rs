use std::collections::HashMap;

use axum::body::Body;
use axum::http::Request;

/// Tracks environment variable mutations and restores originals on drop.
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    #[allow(dead_code)]
    pub fn set_many(&mut self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    #[allow(dead_code)]
    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// Every variable the service reads, cleared so tests start from defaults.
#[allow(dead_code)]
pub const TRIAGE_VARS: &[&str] = &[
    "TRIAGE_RULES_CONFIG",
    "TRIAGE_RATE_LIMIT",
    "TRIAGE_RATE_WINDOW_MS",
    "TRIAGE_SWEEP_INTERVAL_MS",
    "FLAGGED_WEBHOOK_URL",
    "TRIAGE_WEBHOOK_TIMEOUT_MS",
    "STRICT_AUTH_ALLOWED_TOKENS",
    "LOG_FILE",
    "LOG_MAX_BYTES",
    "LOG_ROTATE_KEEP",
    "LOG_ROTATE_COMPRESS",
    "TRIAGE_LOG_STDOUT",
    "TRIAGE_MAX_REQUEST_BYTES",
    "TRIAGE_LOG_SAMPLE_N",
];

#[allow(dead_code)]
pub fn clean_env() -> EnvGuard {
    let mut env = EnvGuard::new();
    for var in TRIAGE_VARS {
        env.remove(var);
    }
    env
}

/// `POST /analyze` with an optional forwarded-for caller.
#[allow(dead_code)]
pub fn analyze_request(caller: Option<&str>, body: &serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/analyze")
        .header("content-type", "application/json");
    if let Some(ip) = caller {
        builder = builder.header("x-forwarded-for", ip);
    }
    builder
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

#[allow(dead_code)]
pub async fn json_body(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
