//! Fixed-window request rate limiting.
//!
//! Records are keyed by `(limit class, client identifier)`. Expiry is
//! lazy - a record is treated as absent once its window has passed - and a
//! periodic background sweep purges expired records so memory stays
//! bounded under low traffic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Interval between background sweeps of expired records.
pub const RATE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Window configuration for one limit class.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitClass {
    /// Maximum requests per window.
    pub max_requests: u32,
    /// Window length.
    pub window: Duration,
}

#[derive(Debug)]
struct RateRecord {
    count: u32,
    reset_at: Instant,
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// The request may proceed.
    Allowed { remaining: u32 },
    /// The request is rejected; retry after the given delay.
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Per-endpoint-class request throttle.
#[derive(Debug)]
pub struct RateLimiter {
    classes: HashMap<String, RateLimitClass>,
    default_class: RateLimitClass,
    records: Mutex<HashMap<(String, String), RateRecord>>,
}

impl RateLimiter {
    pub fn new(classes: HashMap<String, RateLimitClass>, default_class: RateLimitClass) -> Self {
        Self {
            classes,
            default_class,
            records: Mutex::new(HashMap::new()),
        }
    }

    fn class(&self, name: &str) -> RateLimitClass {
        self.classes.get(name).copied().unwrap_or(self.default_class)
    }

    /// Checks and records one request for `(class, client)`.
    ///
    /// The first request in a window starts a new record at count 1. Once
    /// the count reaches the class ceiling further requests are rejected
    /// without incrementing, carrying the remaining window as `retry_after`.
    pub fn check(&self, class: &str, client: &str) -> RateDecision {
        let limit = self.class(class);
        let now = Instant::now();
        let key = (class.to_string(), client.to_string());
        let mut records = self.records.lock().expect("rate table mutex poisoned");

        match records.get_mut(&key) {
            Some(record) if now < record.reset_at => {
                if record.count >= limit.max_requests {
                    RateDecision::Limited {
                        retry_after: record.reset_at - now,
                    }
                } else {
                    record.count += 1;
                    RateDecision::Allowed {
                        remaining: limit.max_requests - record.count,
                    }
                }
            }
            _ => {
                // Absent or expired: start a fresh window.
                records.insert(
                    key,
                    RateRecord {
                        count: 1,
                        reset_at: now + limit.window,
                    },
                );
                RateDecision::Allowed {
                    remaining: limit.max_requests.saturating_sub(1),
                }
            }
        }
    }

    /// Removes expired records. Called by the background sweeper; safe to
    /// call at any time.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut records = self.records.lock().expect("rate table mutex poisoned");
        let before = records.len();
        records.retain(|_, record| now < record.reset_at);
        let purged = before - records.len();
        if purged > 0 {
            debug!(purged, remaining = records.len(), "Swept expired rate records");
        }
    }

    /// Number of live records, for diagnostics.
    pub fn record_count(&self) -> usize {
        self.records.lock().expect("rate table mutex poisoned").len()
    }

    /// Runs the periodic sweep until `shutdown` is cancelled.
    pub async fn run_sweeper(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(RATE_SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => self.sweep(),
                _ = shutdown.cancelled() => break,
            }
        }
    }
}
