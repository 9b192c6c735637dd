//! Per-caller fixed-window admission limiter.
//!
//! Each caller id owns one `RateLimitEntry`.  The first request opens a
//! window; requests inside the window are admitted until `limit` is reached;
//! the first request after the window has elapsed resets the entry.  This is
//! a hard reset, not a sliding window: a caller can get up to `2 * limit`
//! admissions in a short interval straddling a window boundary.
//!
//! Entries live in a `DashMap`.  The check-then-increment for a caller runs
//! while holding that key's shard lock, so concurrent requests from one
//! caller can never both observe `count < limit` and over-admit.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_LIMIT: u32 = 60;
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(60_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Admissions per caller per window.
    pub limit: u32,
    pub window: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            window: DEFAULT_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub count: u32,
    pub window_start: Instant,
}

impl RateLimitEntry {
    fn opened_at(now: Instant) -> Self {
        Self {
            count: 1,
            window_start: now,
        }
    }

    fn expired(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.window_start) > window
    }

    // The window resets once strictly more than `window` has elapsed.
    fn resets_in(&self, now: Instant, window: Duration) -> Duration {
        (self.window_start + window + Duration::from_millis(1)).saturating_duration_since(now)
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Quota exhausted; the caller's window resets after `retry_after`.
    Rejected { retry_after: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Admission limiter state.  Cloning shares the underlying map, so one
/// instance can be handed to request handlers and to the sweeper task.
#[derive(Clone, Debug)]
pub struct AdmissionLimiter {
    entries: Arc<DashMap<String, RateLimitEntry>>,
    config: LimiterConfig,
}

impl Default for AdmissionLimiter {
    fn default() -> Self {
        Self::new(LimiterConfig::default())
    }
}

impl AdmissionLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> LimiterConfig {
        self.config
    }

    /// Decide whether `caller` is admitted now.
    pub fn allow(&self, caller: &str) -> bool {
        self.allow_at(caller, Instant::now())
    }

    pub fn allow_at(&self, caller: &str, now: Instant) -> bool {
        self.check_at(caller, now).is_admitted()
    }

    pub fn check(&self, caller: &str) -> Admission {
        self.check_at(caller, Instant::now())
    }

    /// Decide whether `caller` is admitted at `now`.  A rejection leaves the
    /// entry untouched and carries the wait read under the same entry lock.
    pub fn check_at(&self, caller: &str, now: Instant) -> Admission {
        let LimiterConfig { limit, window } = self.config;
        match self.entries.entry(caller.to_owned()) {
            Entry::Vacant(slot) => {
                slot.insert(RateLimitEntry::opened_at(now));
                Admission::Admitted
            }
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                if entry.expired(now, window) {
                    *entry = RateLimitEntry::opened_at(now);
                    Admission::Admitted
                } else if entry.count >= limit {
                    Admission::Rejected {
                        retry_after: entry.resets_in(now, window),
                    }
                } else {
                    entry.count += 1;
                    Admission::Admitted
                }
            }
        }
    }

    /// Time until a currently exhausted caller is admitted again, or `None`
    /// if the caller would be admitted at `now`.
    pub fn retry_after(&self, caller: &str, now: Instant) -> Option<Duration> {
        let entry = self.entries.get(caller)?;
        if entry.expired(now, self.config.window) || entry.count < self.config.limit {
            return None;
        }
        Some(entry.resets_in(now, self.config.window))
    }

    /// Snapshot of the entry tracked for `caller`.
    pub fn entry(&self, caller: &str) -> Option<RateLimitEntry> {
        self.entries.get(caller).map(|e| *e)
    }

    /// Drop entries whose window has expired.  A dropped caller's next
    /// request opens a fresh window, exactly as the reset it would have hit
    /// anyway, so sweeping never changes an admission decision.  Returns the
    /// number of entries removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.entries.len();
        let window = self.config.window;
        self.entries.retain(|_, entry| !entry.expired(now, window));
        before.saturating_sub(self.entries.len())
    }

    /// Run `sweep` every `interval` on the current tokio runtime.
    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = limiter.sweep(Instant::now());
                if removed > 0 {
                    tracing::debug!(
                        removed,
                        tracked = limiter.len(),
                        "swept expired rate limit entries"
                    );
                }
            }
        })
    }

    /// Number of callers currently tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
