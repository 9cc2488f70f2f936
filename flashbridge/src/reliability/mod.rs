//! Retry and circuit breaking around external tool calls.
//!
//! [`Reliability::call`] wraps a fallible async operation with two layers
//! of protection:
//!
//! 1. A per-dependency [`CircuitBreaker`]: after repeated consecutive
//!    failures the named circuit opens and calls are rejected immediately,
//!    shedding load from a known-bad tool. After a cooldown exactly one
//!    half-open trial call decides whether the circuit closes again.
//! 2. A bounded [`RetryPolicy`] with multiplicative backoff, applied only
//!    to failures classified as transient (timeouts, spawn errors). A real
//!    tool-reported failure ("device not found") is never retried.
//!
//! The wrapped operation's result is classified via the [`Classify`] trait;
//! a failed-but-completed call is still returned as `Ok(outcome)` - only a
//! rejected call (circuit open) produces an error.

mod breaker;
mod retry;

pub use breaker::{BreakerSnapshot, BreakerState, CircuitBreaker};
pub use retry::RetryPolicy;

use crate::command::CommandOutcome;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How a completed call should be treated by the reliability layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The call succeeded.
    Success,
    /// The call failed for a reason that may clear on retry.
    Transient,
    /// The dependency reported a real failure; retrying will not help.
    Fatal,
}

/// Classifies an operation result for retry and breaker accounting.
pub trait Classify {
    fn verdict(&self) -> Verdict;
}

impl Classify for CommandOutcome {
    fn verdict(&self) -> Verdict {
        if self.success {
            Verdict::Success
        } else if self.timed_out || self.error.is_some() {
            Verdict::Transient
        } else {
            Verdict::Fatal
        }
    }
}

/// Errors produced by the reliability layer itself.
#[derive(Debug, Error)]
pub enum ReliabilityError {
    /// The named circuit is open; the underlying call was not made.
    #[error("circuit {circuit:?} is open, retry in {retry_after:?}")]
    CircuitOpen {
        circuit: String,
        retry_after: Duration,
    },
}

/// Retry + circuit breaking wrapper shared across the coordinator.
#[derive(Debug)]
pub struct Reliability {
    breaker: CircuitBreaker,
    retry: RetryPolicy,
}

impl Reliability {
    pub fn new(breaker: CircuitBreaker, retry: RetryPolicy) -> Arc<Self> {
        Arc::new(Self { breaker, retry })
    }

    /// Runs `op` under the named circuit with transient-failure retries.
    ///
    /// Returns `Err` only when the circuit rejects the call outright. Any
    /// result the operation itself produced - including a fatal failure -
    /// comes back as `Ok` so callers can surface the tool's own message.
    pub async fn call<T, F, Fut>(&self, circuit: &str, op: F) -> Result<T, ReliabilityError>
    where
        T: Classify,
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        self.call_cancellable(circuit, &CancellationToken::new(), op)
            .await
    }

    /// Like [`call`](Self::call), but failures observed after `cancel` has
    /// fired are neither retried nor charged against the circuit.
    ///
    /// A cancelled job terminates its child mid-run; the resulting exit is
    /// the caller's doing, not evidence the tool is unhealthy.
    pub async fn call_cancellable<T, F, Fut>(
        &self,
        circuit: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, ReliabilityError>
    where
        T: Classify,
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            self.breaker.preflight(circuit)?;
            let result = op().await;
            match result.verdict() {
                Verdict::Success => {
                    self.breaker.record_success(circuit);
                    return Ok(result);
                }
                _ if cancel.is_cancelled() => {
                    debug!(circuit, "Call cancelled, skipping breaker accounting");
                    return Ok(result);
                }
                Verdict::Fatal => {
                    self.breaker.record_failure(circuit);
                    return Ok(result);
                }
                Verdict::Transient => {
                    self.breaker.record_failure(circuit);
                    if attempt >= max_attempts {
                        return Ok(result);
                    }
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        circuit,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// The shared circuit breaker, for status inspection.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}
