//! Newline-delimited JSON telemetry with size-based rotation.
//!
//! One line per `/analyze` decision.  When `max_bytes` is set the active file
//! is shifted to `<path>.1` (older backups to `.2`, `.3`, ...) once it grows
//! past the limit, keeping at most `keep` backups.  With compression enabled
//! backups are gzipped to `<path>.N.gz`.

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use crate::classifier::{Intent, Language, Sentiment, Urgency};
use crate::config::RotationConfig;
use crate::escalation::FlagReason;

pub const SCHEMA_VERSION: u32 = 1;

pub struct RotatingWriter {
    path: PathBuf,
    file: fs::File,
    rotation: RotationConfig,
}

impl RotatingWriter {
    pub fn open(path: impl AsRef<Path>, rotation: RotationConfig) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            file,
            rotation,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of backup number `idx` (1 is the newest).
    pub fn backup_path(&self, idx: usize, gz: bool) -> PathBuf {
        let suffix = if gz { ".gz" } else { "" };
        PathBuf::from(format!("{}.{}{}", self.path.display(), idx, suffix))
    }

    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        if let Some(limit) = self.rotation.max_bytes {
            if self.current_size().unwrap_or(0) >= limit {
                self.rotate()?;
            }
        }
        writeln!(self.file, "{}", line)
    }

    pub fn current_size(&self) -> Option<u64> {
        self.path.metadata().ok().map(|m| m.len())
    }

    fn rotate(&mut self) -> io::Result<()> {
        let keep = self.rotation.keep;
        if keep > 0 {
            for idx in (1..keep).rev() {
                for gz in [false, true] {
                    let from = self.backup_path(idx, gz);
                    if from.exists() {
                        fs::rename(&from, self.backup_path(idx + 1, gz))?;
                    }
                }
            }
            let newest = self.backup_path(1, false);
            fs::rename(&self.path, &newest)?;
            if self.rotation.compress {
                self.compress(&newest)?;
            }
        }
        self.file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        Ok(())
    }

    fn compress(&self, plain: &Path) -> io::Result<()> {
        let data = fs::read(plain)?;
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(&data)?;
        fs::write(self.backup_path(1, true), gz.finish()?)?;
        fs::remove_file(plain)
    }
}

/// One telemetry record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent<'a> {
    pub schema_version: u32,
    pub ts: String,
    pub caller_id: &'a str,
    pub admitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urgency: Option<Urgency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fraud: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    pub flags: &'a [FlagReason],
    pub latency_ms: u128,
}

#[derive(Clone)]
pub struct TelemetrySink {
    writer: Option<Arc<Mutex<RotatingWriter>>>,
    log_stdout: bool,
    log_sample_n: Option<u64>,
    log_sample_counter: Arc<AtomicU64>,
    lines_total: Arc<AtomicU64>,
    write_errors_total: Arc<AtomicU64>,
    log_file_size_bytes: Arc<AtomicU64>,
}

impl TelemetrySink {
    pub fn new(writer: Option<RotatingWriter>, log_stdout: bool, log_sample_n: Option<u64>) -> Self {
        Self {
            writer: writer.map(|w| Arc::new(Mutex::new(w))),
            log_stdout,
            log_sample_n,
            log_sample_counter: Arc::new(AtomicU64::new(0)),
            lines_total: Arc::new(AtomicU64::new(0)),
            write_errors_total: Arc::new(AtomicU64::new(0)),
            log_file_size_bytes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A sink that only mirrors to tracing (when enabled).
    pub fn disabled() -> Self {
        Self::new(None, false, None)
    }

    pub fn emit(&self, event: &TelemetryEvent<'_>) {
        let wrote = match serde_json::to_string(event) {
            Ok(line) => self.write_line(&line),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialise telemetry event");
                false
            }
        };
        if (wrote || self.writer.is_none()) && self.should_log_stdout() {
            tracing::info!(
                target: "telemetry",
                callerId = event.caller_id,
                admitted = event.admitted,
                sentiment = ?event.sentiment,
                urgency = ?event.urgency,
                language = ?event.language,
                fraud = ?event.fraud,
                intent = ?event.intent,
                flags = ?event.flags,
                latencyMs = event.latency_ms
            );
        }
    }

    pub fn lines_total(&self) -> u64 {
        self.lines_total.load(Ordering::Relaxed)
    }

    pub fn write_errors_total(&self) -> u64 {
        self.write_errors_total.load(Ordering::Relaxed)
    }

    pub fn log_file_size_bytes(&self) -> u64 {
        self.log_file_size_bytes.load(Ordering::Relaxed)
    }

    fn write_line(&self, line: &str) -> bool {
        let Some(target) = self.writer.as_ref() else {
            return false;
        };
        let Ok(mut guard) = target.lock() else {
            return false;
        };
        match guard.write_line(line) {
            Ok(()) => {
                self.lines_total.fetch_add(1, Ordering::Relaxed);
                if let Some(sz) = guard.current_size() {
                    self.log_file_size_bytes.store(sz, Ordering::Relaxed);
                }
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %guard.path().display(), "Failed to write telemetry line");
                self.write_errors_total.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    fn should_log_stdout(&self) -> bool {
        if !self.log_stdout {
            return false;
        }
        if let Some(n) = self.log_sample_n {
            let prev = self.log_sample_counter.fetch_add(1, Ordering::Relaxed);
            prev % n == 0
        } else {
            true
        }
    }
}
