use std::collections::HashSet;
use std::env;
use std::fs;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::classifier::RulesConfig;
use crate::limiter::{LimiterConfig, DEFAULT_LIMIT, DEFAULT_WINDOW};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationConfig {
    pub max_bytes: Option<u64>,
    pub keep: usize,
    pub compress: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub rules_config: RulesConfig,
    pub limiter: LimiterConfig,
    /// Period of the expired-entry sweep; `None` disables it.
    pub sweep_interval: Option<Duration>,
    pub webhook_url: Option<String>,
    pub webhook_timeout: Duration,
    pub log_file: Option<String>,
    pub allowed_tokens: Option<HashSet<String>>,
    pub rotation: RotationConfig,
    pub log_stdout: bool,
    pub max_request_bytes: Option<usize>,
    pub log_sample_n: Option<u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rules_config: RulesConfig::default(),
            limiter: LimiterConfig::default(),
            sweep_interval: Some(DEFAULT_WINDOW),
            webhook_url: None,
            webhook_timeout: Duration::from_millis(2000),
            log_file: None,
            allowed_tokens: None,
            rotation: RotationConfig {
                max_bytes: None,
                keep: 1,
                compress: false,
            },
            log_stdout: false,
            max_request_bytes: None,
            log_sample_n: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let rules_config = if let Ok(path) = env::var("TRIAGE_RULES_CONFIG") {
            let content = fs::read_to_string(&path).with_context(|| {
                format!(
                    "Failed to read TRIAGE_RULES_CONFIG '{}': file unreadable",
                    path
                )
            })?;
            serde_json::from_str::<RulesConfig>(&content).with_context(|| {
                format!(
                    "Failed to parse TRIAGE_RULES_CONFIG '{}': invalid JSON configuration",
                    path
                )
            })?
        } else {
            RulesConfig::default()
        };

        let limit = match parse_optional_u64("TRIAGE_RATE_LIMIT")? {
            Some(v) => u32::try_from(v).map_err(|_| anyhow!("TRIAGE_RATE_LIMIT is too large"))?,
            None => DEFAULT_LIMIT,
        };
        let window = parse_optional_u64("TRIAGE_RATE_WINDOW_MS")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_WINDOW);
        let sweep_interval = match parse_optional_u64("TRIAGE_SWEEP_INTERVAL_MS")? {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => Some(window.max(Duration::from_millis(1))),
        };

        let webhook_url = env::var("FLAGGED_WEBHOOK_URL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let webhook_timeout = Duration::from_millis(
            parse_optional_u64("TRIAGE_WEBHOOK_TIMEOUT_MS")?.unwrap_or(2000),
        );

        let log_file = env::var("LOG_FILE").ok();

        let allowed_tokens = env::var("STRICT_AUTH_ALLOWED_TOKENS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .collect::<HashSet<_>>()
            })
            .filter(|set: &HashSet<String>| !set.is_empty());

        let rotation = RotationConfig {
            max_bytes: parse_optional_u64("LOG_MAX_BYTES")?,
            keep: parse_optional_u64("LOG_ROTATE_KEEP")?.unwrap_or(1) as usize,
            compress: parse_bool_env("LOG_ROTATE_COMPRESS")?.unwrap_or(false),
        };

        let log_stdout = parse_bool_env("TRIAGE_LOG_STDOUT")?.unwrap_or(false);
        let max_request_bytes =
            parse_optional_u64("TRIAGE_MAX_REQUEST_BYTES")?.map(|v| v as usize);
        let log_sample_n = parse_optional_u64("TRIAGE_LOG_SAMPLE_N")?.filter(|n| *n > 1);

        Ok(Self {
            rules_config,
            limiter: LimiterConfig { limit, window },
            sweep_interval,
            webhook_url,
            webhook_timeout,
            log_file,
            allowed_tokens,
            rotation,
            log_stdout,
            max_request_bytes,
            log_sample_n,
        })
    }
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
