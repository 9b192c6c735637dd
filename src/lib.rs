//! Core library for Triage.  This module wires together the admission
//! limiter, the message classifier, escalation delivery and the HTTP
//! handlers that expose them.

pub mod classifier;
mod config;
pub mod escalation;
pub mod limiter;
pub mod stats;
pub mod telemetry;
pub mod util;

pub use classifier::{
    classify, ClassificationResult, Classifier, Intent, Language, RuleError, RulesConfig,
    Sentiment, Urgency,
};
pub use config::{AppConfig, RotationConfig};
pub use escalation::{
    flags_for, Escalation, Escalator, FlagReason, Notifier, NotifyError, WebhookNotifier,
};
pub use limiter::{Admission, AdmissionLimiter, LimiterConfig, RateLimitEntry};
pub use stats::{Stats, StatsSnapshot};
pub use telemetry::{RotatingWriter, TelemetryEvent, TelemetrySink};

use anyhow::Context;
use axum::extract::{
    rejection::{BytesRejection, FailedToBufferBody, JsonRejection},
    DefaultBodyLimit, State,
};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

/// Caller id used when no forwarded-for header is present.  All such
/// callers share one quota bucket.
pub const UNKNOWN_CALLER: &str = "unknown";

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    #[serde(flatten)]
    pub labels: ClassificationResult,
    pub flags: Vec<FlagReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_code: i32,
    pub message: String,
    pub http_status: u16,
}

/// Internal application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub classifier: Arc<Classifier>,
    pub limiter: AdmissionLimiter,
    pub escalator: Escalator,
    pub telemetry: TelemetrySink,
    pub stats: Arc<Stats>,
    pub allowed_tokens: Option<HashSet<String>>, // strict auth allowlist
    /// Maximum accepted raw request body size in bytes (None => unlimited)
    pub max_request_bytes: Option<usize>,
    pub sweep_interval: Option<Duration>,
    // Histogram buckets (fixed) for request latency in ms (upper bounds) and counts
    pub hist_buckets: Arc<Vec<u64>>,
    pub hist_counts: Arc<Vec<AtomicU64>>,
    pub hist_sum_ms: Arc<AtomicU64>,
    pub hist_count: Arc<AtomicU64>,
    pub process_start_epoch: f64,
    pub process_start_instant: Instant,
}

impl AppState {
    /// State with built-in rules, the given quota and no telemetry file,
    /// webhook or auth.
    pub fn with_limiter(config: LimiterConfig) -> Self {
        Self::assemble(
            Classifier::default(),
            AdmissionLimiter::new(config),
            Escalator::default(),
            TelemetrySink::disabled(),
            None,
            None,
            None,
        )
    }

    pub fn with_escalator(mut self, escalator: Escalator) -> Self {
        self.escalator = escalator;
        self
    }

    fn assemble(
        classifier: Classifier,
        limiter: AdmissionLimiter,
        escalator: Escalator,
        telemetry: TelemetrySink,
        allowed_tokens: Option<HashSet<String>>,
        max_request_bytes: Option<usize>,
        sweep_interval: Option<Duration>,
    ) -> Self {
        let buckets: Vec<u64> = vec![1, 2, 5, 10, 20, 50, 100, 200, 500, 1000, 2000];
        let start_time = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            classifier: Arc::new(classifier),
            limiter,
            escalator,
            telemetry,
            stats: Arc::new(Stats::default()),
            allowed_tokens,
            max_request_bytes,
            sweep_interval,
            hist_counts: Arc::new(buckets.iter().map(|_| AtomicU64::new(0)).collect()),
            hist_buckets: Arc::new(buckets),
            hist_sum_ms: Arc::new(AtomicU64::new(0)),
            hist_count: Arc::new(AtomicU64::new(0)),
            process_start_epoch: start_time.as_secs_f64(),
            process_start_instant: Instant::now(),
        }
    }

    fn observe_latency(&self, latency_ms: u64) {
        self.hist_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.hist_count.fetch_add(1, Ordering::Relaxed);
        // find first bucket >= value
        for (idx, ub) in self.hist_buckets.iter().enumerate() {
            if latency_ms <= *ub {
                self.hist_counts[idx].fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
    }
}

/// Build state from a parsed configuration.
pub fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    let AppConfig {
        rules_config,
        limiter,
        sweep_interval,
        webhook_url,
        webhook_timeout,
        log_file,
        allowed_tokens,
        rotation,
        log_stdout,
        max_request_bytes,
        log_sample_n,
    } = config;

    let classifier =
        Classifier::new(&rules_config).context("Failed to compile classifier rules")?;

    let escalator = match webhook_url {
        Some(url) => {
            let notifier = WebhookNotifier::new(url.clone(), webhook_timeout)
                .context("Failed to build escalation webhook client")?;
            tracing::info!(url = %url, "escalation webhook enabled");
            Escalator::new(Some(Arc::new(notifier)))
        }
        None => Escalator::default(),
    };

    // We do not create a default file implicitly; we warn if absent.
    let writer = match log_file.as_deref() {
        Some(path) => match RotatingWriter::open(path, rotation) {
            Ok(w) => Some(w),
            Err(e) => {
                tracing::warn!(path=%path, error=%e, "Failed to open LOG_FILE for telemetry; telemetry disabled");
                None
            }
        },
        None => {
            tracing::warn!("Telemetry disabled: LOG_FILE not set");
            None
        }
    };
    let telemetry = TelemetrySink::new(writer, log_stdout, log_sample_n);

    Ok(AppState::assemble(
        classifier,
        AdmissionLimiter::new(limiter),
        escalator,
        telemetry,
        allowed_tokens,
        max_request_bytes,
        sweep_interval,
    ))
}

/// Build state from environment variables.  See `AppConfig::from_env` for
/// the variables read.
pub async fn build_state_from_env() -> Result<AppState, Box<dyn std::error::Error>> {
    let config = AppConfig::from_env().map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;
    build_state(config).map_err(|e| e.into())
}

/// Build the Axum router and attach handlers.
pub fn app(state: AppState) -> Router {
    let max_request_bytes = state.max_request_bytes;

    let router = Router::new()
        .route("/analyze", post(analyze_handler))
        .route("/healthz", get(healthz_handler))
        .route("/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler));

    let router = if let Some(limit) = max_request_bytes {
        router.layer(DefaultBodyLimit::max(limit))
    } else {
        router
    };

    router.with_state(state)
}

/// Caller id for rate limiting: the `x-forwarded-for` value as sent, or
/// `"unknown"` when absent or blank.
pub fn caller_id(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_CALLER)
        .to_string()
}

fn respond_with_error(err: ErrorResponse) -> axum::response::Response {
    let status = StatusCode::from_u16(err.http_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err)).into_response()
}

fn authorization_error() -> ErrorResponse {
    ErrorResponse {
        error_code: 2001,
        message: "Unauthorized".into(),
        http_status: 401,
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<String, ErrorResponse> {
    let raw = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(authorization_error)?;

    if raw.len() < 7 || !raw[..6].eq_ignore_ascii_case("bearer") {
        return Err(authorization_error());
    }
    let token = raw[6..].trim();
    if token.is_empty() {
        return Err(authorization_error());
    }
    Ok(token.to_string())
}

/// Only enforced when an allowlist is configured.
fn ensure_authorized(
    headers: &HeaderMap,
    allowed_tokens: Option<&HashSet<String>>,
) -> Result<(), ErrorResponse> {
    let Some(tokens) = allowed_tokens else {
        return Ok(());
    };
    let token = extract_bearer_token(headers)?;
    if !tokens.contains(&token) {
        return Err(authorization_error());
    }
    Ok(())
}

fn rate_limited(retry_after: Duration) -> axum::response::Response {
    let err = ErrorResponse {
        error_code: 4290,
        message: "rate limit exceeded".into(),
        http_status: 429,
    };
    let mut resp = respond_with_error(err);
    // Whole seconds, rounded up.
    let secs = retry_after.as_millis().div_ceil(1000).max(1);
    if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
        resp.headers_mut().insert(header::RETRY_AFTER, value);
    }
    resp
}

/// Handler for `/analyze`.  Admission first, then validation and
/// classification.  Responds with the labels and any escalation flags.
async fn analyze_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> axum::response::Response {
    let start = Instant::now();
    let caller = caller_id(&headers);
    state.stats.record_request();

    if let Admission::Rejected { retry_after } = state.limiter.check(&caller) {
        state.stats.record_rejected();
        tracing::debug!(caller = %caller, "rate limit exceeded");
        state.telemetry.emit(&TelemetryEvent {
            schema_version: telemetry::SCHEMA_VERSION,
            ts: chrono::Utc::now().to_rfc3339(),
            caller_id: &caller,
            admitted: false,
            conversation_id: None,
            sentiment: None,
            urgency: None,
            language: None,
            fraud: None,
            intent: None,
            flags: &[],
            latency_ms: start.elapsed().as_millis(),
        });
        return rate_limited(retry_after);
    }

    // Size guard: rely on Content-Length header if provided.
    if let Some(limit) = state.max_request_bytes {
        if let Some(clen) = headers
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok())
        {
            if clen > limit {
                state.stats.record_invalid();
                return respond_with_error(ErrorResponse {
                    error_code: 4001,
                    message: format!("Request too large ({} bytes > limit {} bytes)", clen, limit),
                    http_status: 413,
                });
            }
        }
    }
    if let Err(err) = ensure_authorized(&headers, state.allowed_tokens.as_ref()) {
        state.stats.record_invalid();
        return respond_with_error(err);
    }

    let payload = match payload {
        Ok(Json(inner)) => inner,
        Err(rejection) => {
            state.stats.record_invalid();
            return handle_json_rejection(&state, rejection);
        }
    };
    let text = match payload.text.as_deref() {
        Some(t) if !t.is_empty() => t,
        _ => {
            state.stats.record_invalid();
            return respond_with_error(ErrorResponse {
                error_code: 4002,
                message: "text required".into(),
                http_status: 400,
            });
        }
    };

    let labels = state.classifier.classify(text);
    let flags = flags_for(&labels);
    if !flags.is_empty() {
        tracing::info!(
            caller = %caller,
            conversation_id = ?payload.conversation_id,
            flags = ?flags,
            "message flagged for escalation"
        );
        state.escalator.dispatch(
            flags
                .iter()
                .map(|reason| Escalation {
                    conversation_id: payload.conversation_id.clone(),
                    reason: *reason,
                    intent: labels.intent,
                    text: text.to_string(),
                })
                .collect(),
        );
    }
    state.stats.record_classified(&labels, &flags);

    let latency_ms = start.elapsed().as_millis();
    state.observe_latency(latency_ms as u64);
    state.telemetry.emit(&TelemetryEvent {
        schema_version: telemetry::SCHEMA_VERSION,
        ts: chrono::Utc::now().to_rfc3339(),
        caller_id: &caller,
        admitted: true,
        conversation_id: payload.conversation_id.as_deref(),
        sentiment: Some(labels.sentiment),
        urgency: Some(labels.urgency),
        language: Some(labels.language),
        fraud: Some(labels.fraud),
        intent: Some(labels.intent),
        flags: &flags,
        latency_ms,
    });

    let response = AnalyzeResponse {
        labels,
        flags,
        conversation_id: payload.conversation_id,
    };
    (StatusCode::OK, Json(response)).into_response()
}

fn handle_json_rejection(state: &AppState, rejection: JsonRejection) -> axum::response::Response {
    match rejection {
        JsonRejection::BytesRejection(BytesRejection::FailedToBufferBody(
            FailedToBufferBody::LengthLimitError(_),
        )) => {
            tracing::warn!(limit = ?state.max_request_bytes, "request body exceeded configured limit");
            let message = match state.max_request_bytes {
                Some(limit) => format!("Request too large (body exceeded limit {} bytes)", limit),
                None => "Request too large".to_string(),
            };
            respond_with_error(ErrorResponse {
                error_code: 4001,
                message,
                http_status: 413,
            })
        }
        JsonRejection::BytesRejection(bytes) => bytes.into_response(),
        other => respond_with_error(ErrorResponse {
            error_code: 4000,
            message: other.body_text(),
            http_status: other.status().as_u16(),
        }),
    }
}

/// Simple health endpoint for container readiness / liveness checks.
async fn healthz_handler(State(state): State<AppState>) -> axum::response::Response {
    let quota = state.limiter.config();
    let json = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "trackedCallers": state.limiter.len(),
        "limit": quota.limit,
        "windowMs": quota.window.as_millis() as u64,
        "escalation": state.escalator.is_enabled(),
    });
    (StatusCode::OK, Json(json)).into_response()
}

async fn stats_handler(State(state): State<AppState>) -> axum::response::Response {
    (StatusCode::OK, Json(state.stats.snapshot())).into_response()
}

/// Prometheus-style metrics exposition. Text format with simple counters.
async fn metrics_handler(State(state): State<AppState>) -> axum::response::Response {
    use std::fmt::Write as _;
    let mut buf = String::new();
    let snap = state.stats.snapshot();

    let mut counter = |name: &str, help: &str, value: u64| {
        writeln!(&mut buf, "# HELP {name} {help}").ok();
        writeln!(&mut buf, "# TYPE {name} counter").ok();
        writeln!(&mut buf, "{name} {value}").ok();
    };
    counter(
        "triage_requests_total",
        "Total analyze requests received",
        snap.total_requests,
    );
    counter(
        "triage_rejected_total",
        "Requests rejected by the admission limiter",
        snap.rejected_requests,
    );
    counter(
        "triage_invalid_total",
        "Admitted requests refused before classification",
        snap.invalid_requests,
    );
    counter(
        "triage_telemetry_lines_total",
        "Telemetry JSON lines written",
        state.telemetry.lines_total(),
    );
    counter(
        "triage_telemetry_write_errors_total",
        "Telemetry JSON line write failures",
        state.telemetry.write_errors_total(),
    );

    let mut labelled = |name: &str, help: &str, label: &str, values: &[(&str, u64)]| {
        writeln!(&mut buf, "# HELP {name} {help}\n# TYPE {name} counter").ok();
        for (value_label, value) in values {
            writeln!(&mut buf, "{name}{{{label}=\"{value_label}\"}} {value}").ok();
        }
    };
    let flags: Vec<(&str, u64)> = FlagReason::ALL
        .iter()
        .map(|r| (r.as_str(), state.stats.flag_count(*r)))
        .collect();
    labelled(
        "triage_flags_total",
        "Escalation flags raised",
        "reason",
        &flags,
    );
    let sentiments: Vec<(&str, u64)> = snap.by_sentiment.iter().map(|(k, v)| (*k, *v)).collect();
    labelled(
        "triage_sentiment_total",
        "Classified messages by sentiment",
        "sentiment",
        &sentiments,
    );
    let urgencies: Vec<(&str, u64)> = snap.by_urgency.iter().map(|(k, v)| (*k, *v)).collect();
    labelled(
        "triage_urgency_total",
        "Classified messages by urgency",
        "urgency",
        &urgencies,
    );
    let languages: Vec<(&str, u64)> = snap.by_language.iter().map(|(k, v)| (*k, *v)).collect();
    labelled(
        "triage_language_total",
        "Classified messages by detected language",
        "language",
        &languages,
    );
    let intents: Vec<(&str, u64)> = snap.by_intent.iter().map(|(k, v)| (*k, *v)).collect();
    labelled(
        "triage_intent_total",
        "Classified messages by intent",
        "intent",
        &intents,
    );

    // Histogram
    writeln!(
        &mut buf,
        "# HELP triage_request_latency_ms Request latency histogram milliseconds"
    )
    .ok();
    writeln!(&mut buf, "# TYPE triage_request_latency_ms histogram").ok();
    let count = state.hist_count.load(Ordering::Relaxed);
    let mut cumulative: u64 = 0;
    for (i, ub) in state.hist_buckets.iter().enumerate() {
        cumulative += state.hist_counts[i].load(Ordering::Relaxed);
        writeln!(
            &mut buf,
            "triage_request_latency_ms_bucket{{le=\"{}\"}} {}",
            ub, cumulative
        )
        .ok();
    }
    writeln!(
        &mut buf,
        "triage_request_latency_ms_bucket{{le=\"+Inf\"}} {}",
        count
    )
    .ok();
    writeln!(
        &mut buf,
        "triage_request_latency_ms_sum {}",
        state.hist_sum_ms.load(Ordering::Relaxed)
    )
    .ok();
    writeln!(&mut buf, "triage_request_latency_ms_count {}", count).ok();

    let mut gauge = |name: &str, help: &str, value: String| {
        writeln!(&mut buf, "# HELP {name} {help}\n# TYPE {name} gauge").ok();
        writeln!(&mut buf, "{name} {value}").ok();
    };
    gauge(
        "triage_tracked_callers",
        "Caller ids currently held by the admission limiter",
        state.limiter.len().to_string(),
    );
    gauge(
        "triage_log_file_size_bytes",
        "Current size in bytes of active telemetry log file (0 if disabled)",
        state.telemetry.log_file_size_bytes().to_string(),
    );
    gauge(
        "triage_process_start_time_seconds",
        "Process start time (Unix epoch seconds)",
        state.process_start_epoch.to_string(),
    );
    gauge(
        "triage_process_uptime_seconds",
        "Process uptime seconds",
        state.process_start_instant.elapsed().as_secs_f64().to_string(),
    );
    writeln!(
        &mut buf,
        "# HELP triage_build_info Build information\n# TYPE triage_build_info gauge"
    )
    .ok();
    writeln!(
        &mut buf,
        "triage_build_info{{version=\"{}\",schemaVersion=\"{}\"}} 1",
        env!("CARGO_PKG_VERSION"),
        telemetry::SCHEMA_VERSION
    )
    .ok();

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        buf,
    )
        .into_response()
}
