//! Per-dependency circuit breaker.
//!
//! Each external dependency gets a named circuit. The state machine is:
//!
//! ```text
//! closed --N consecutive failures--> open --cooldown--> half-open
//!   ^                                  ^                    |
//!   |____________success_______________|_______failure______|
//! ```
//!
//! While open, calls are rejected immediately without touching the
//! dependency. Half-open admits exactly one trial call: the first caller
//! whose preflight observes an elapsed cooldown claims the trial slot under
//! the breaker mutex; its result decides the next state.

use super::ReliabilityError;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// State of one named circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
struct CircuitRecord {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    cooldown_until: Option<Instant>,
}

impl CircuitRecord {
    fn closed() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            cooldown_until: None,
        }
    }
}

/// Read-only view of a circuit, for status reporting.
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub circuit: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
}

/// Registry of named circuits with a shared threshold and cooldown.
#[derive(Debug)]
pub struct CircuitBreaker {
    circuits: Mutex<HashMap<String, CircuitRecord>>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    /// Creates a breaker that opens after `failure_threshold` consecutive
    /// failures and stays open for `cooldown`.
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            circuits: Mutex::new(HashMap::new()),
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    /// Checks whether a call on `circuit` may proceed.
    ///
    /// Claims the single half-open trial slot when the cooldown has
    /// elapsed. The whole check-then-transition runs under one mutex so
    /// two concurrent callers cannot both claim the trial.
    pub fn preflight(&self, circuit: &str) -> Result<(), ReliabilityError> {
        let mut circuits = self.circuits.lock().expect("breaker mutex poisoned");
        let record = circuits
            .entry(circuit.to_string())
            .or_insert_with(CircuitRecord::closed);

        match record.state {
            BreakerState::Closed => Ok(()),
            BreakerState::HalfOpen => {
                // Another caller holds the trial slot.
                Err(ReliabilityError::CircuitOpen {
                    circuit: circuit.to_string(),
                    retry_after: self.cooldown,
                })
            }
            BreakerState::Open => {
                let now = Instant::now();
                match record.cooldown_until {
                    Some(until) if now < until => Err(ReliabilityError::CircuitOpen {
                        circuit: circuit.to_string(),
                        retry_after: until - now,
                    }),
                    _ => {
                        info!(circuit, "Circuit cooldown elapsed, allowing trial call");
                        record.state = BreakerState::HalfOpen;
                        Ok(())
                    }
                }
            }
        }
    }

    /// Records a successful call: the circuit closes and the failure count
    /// resets.
    pub fn record_success(&self, circuit: &str) {
        let mut circuits = self.circuits.lock().expect("breaker mutex poisoned");
        let record = circuits
            .entry(circuit.to_string())
            .or_insert_with(CircuitRecord::closed);
        if record.state != BreakerState::Closed {
            info!(circuit, "Circuit closed after successful call");
        }
        *record = CircuitRecord::closed();
    }

    /// Records a failed call, opening the circuit when the threshold is
    /// reached within the cooldown window or the half-open trial fails.
    ///
    /// A failure older than the cooldown no longer counts toward the
    /// threshold: sporadic failures spread over hours do not accumulate
    /// into a trip.
    pub fn record_failure(&self, circuit: &str) {
        let mut circuits = self.circuits.lock().expect("breaker mutex poisoned");
        let record = circuits
            .entry(circuit.to_string())
            .or_insert_with(CircuitRecord::closed);

        let now = Instant::now();
        let previous_is_stale = record
            .last_failure_at
            .is_some_and(|at| now.duration_since(at) > self.cooldown);
        if record.state == BreakerState::Closed && previous_is_stale {
            record.consecutive_failures = 0;
        }
        record.consecutive_failures += 1;
        record.last_failure_at = Some(now);

        let should_open = record.state == BreakerState::HalfOpen
            || record.consecutive_failures >= self.failure_threshold;
        if should_open && record.state != BreakerState::Open {
            warn!(
                circuit,
                failures = record.consecutive_failures,
                cooldown = ?self.cooldown,
                "Circuit opened"
            );
        }
        if should_open {
            record.state = BreakerState::Open;
            record.cooldown_until = Some(now + self.cooldown);
        }
    }

    /// Current state of a circuit. Unknown circuits report closed.
    pub fn state(&self, circuit: &str) -> BreakerState {
        let circuits = self.circuits.lock().expect("breaker mutex poisoned");
        circuits
            .get(circuit)
            .map(|r| r.state)
            .unwrap_or(BreakerState::Closed)
    }

    /// Snapshot of every known circuit.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let circuits = self.circuits.lock().expect("breaker mutex poisoned");
        let mut all: Vec<_> = circuits
            .iter()
            .map(|(name, record)| BreakerSnapshot {
                circuit: name.clone(),
                state: record.state,
                consecutive_failures: record.consecutive_failures,
            })
            .collect();
        all.sort_by(|a, b| a.circuit.cmp(&b.circuit));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));

        breaker.record_failure("flash-tool");
        breaker.record_failure("flash-tool");
        assert_eq!(breaker.state("flash-tool"), BreakerState::Closed);

        breaker.record_failure("flash-tool");
        assert_eq!(breaker.state("flash-tool"), BreakerState::Open);
        assert!(breaker.preflight("flash-tool").is_err());
    }

    #[test]
    fn test_failures_are_isolated_per_circuit() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(30));

        breaker.record_failure("flash-tool");
        breaker.record_failure("flash-tool");

        assert_eq!(breaker.state("flash-tool"), BreakerState::Open);
        assert_eq!(breaker.state("device-bridge"), BreakerState::Closed);
        assert!(breaker.preflight("device-bridge").is_ok());
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));

        breaker.record_failure("flash-tool");
        breaker.record_failure("flash-tool");
        breaker.record_success("flash-tool");
        breaker.record_failure("flash-tool");
        breaker.record_failure("flash-tool");

        assert_eq!(breaker.state("flash-tool"), BreakerState::Closed);
    }

    #[test]
    fn test_stale_failures_age_out_of_the_count() {
        let cooldown = Duration::from_secs(30);
        let breaker = CircuitBreaker::new(3, cooldown);

        breaker.record_failure("flash-tool");
        breaker.record_failure("flash-tool");
        {
            // Push the failures past the window for the test.
            let mut circuits = breaker.circuits.lock().unwrap();
            circuits.get_mut("flash-tool").unwrap().last_failure_at =
                Some(Instant::now() - cooldown - Duration::from_secs(1));
        }

        // The stale pair is forgotten: this failure starts a fresh count.
        breaker.record_failure("flash-tool");
        assert_eq!(breaker.state("flash-tool"), BreakerState::Closed);

        breaker.record_failure("flash-tool");
        breaker.record_failure("flash-tool");
        assert_eq!(breaker.state("flash-tool"), BreakerState::Open);
    }

    #[test]
    fn test_half_open_admits_exactly_one_trial() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));

        breaker.record_failure("flash-tool");
        assert_eq!(breaker.state("flash-tool"), BreakerState::Open);

        // Cooldown of zero has already elapsed: first preflight claims the
        // trial, second is rejected.
        assert!(breaker.preflight("flash-tool").is_ok());
        assert_eq!(breaker.state("flash-tool"), BreakerState::HalfOpen);
        assert!(breaker.preflight("flash-tool").is_err());
    }

    #[test]
    fn test_half_open_success_closes_the_circuit() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));

        breaker.record_failure("flash-tool");
        assert!(breaker.preflight("flash-tool").is_ok());
        breaker.record_success("flash-tool");

        assert_eq!(breaker.state("flash-tool"), BreakerState::Closed);
        assert!(breaker.preflight("flash-tool").is_ok());
    }

    #[test]
    fn test_half_open_failure_reopens_with_fresh_cooldown() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));

        breaker.record_failure("flash-tool");
        {
            // Force the cooldown to elapse for the test.
            let mut circuits = breaker.circuits.lock().unwrap();
            circuits.get_mut("flash-tool").unwrap().cooldown_until = Some(Instant::now());
        }
        assert!(breaker.preflight("flash-tool").is_ok());
        breaker.record_failure("flash-tool");

        assert_eq!(breaker.state("flash-tool"), BreakerState::Open);
        assert!(breaker.preflight("flash-tool").is_err());
    }
}
