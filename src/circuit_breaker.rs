//! # Circuit Breaker Module
//!
//! Circuit breaker for outbound HTTP calls. When an upstream (CRM, catalog)
//! fails repeatedly, the breaker opens and requests fail fast until the
//! reset timeout elapses.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::recovery::RecoveryConfig;

#[derive(Debug, Default)]
struct BreakerState {
    failure_count: u32,
    last_failure_time: Option<Instant>,
    /// A half-open trial call has been let through and has not reported back
    trial_in_flight: bool,
}

/// Circuit breaker for upstream operations
///
/// # State Machine
///
/// - **Closed**: Normal operation, requests pass through
/// - **Open**: Failure threshold exceeded, requests fail fast
/// - **Half-Open**: Reset timeout elapsed, a single trial request is let
///   through; its success closes the circuit, its failure reopens it
///
/// # Configuration
///
/// Uses `RecoveryConfig` for:
/// - `circuit_breaker_threshold`: Failures before opening
/// - `circuit_breaker_reset_secs`: Time before attempting reset
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    config: RecoveryConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    ///
    /// # Examples
    ///
    /// ```rust
    /// use course_cost_bot::recovery::RecoveryConfig;
    /// use course_cost_bot::circuit_breaker::CircuitBreaker;
    ///
    /// let circuit_breaker = CircuitBreaker::new(RecoveryConfig::default());
    /// assert!(!circuit_breaker.is_open());
    /// ```
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            state: Mutex::new(BreakerState::default()),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check if circuit breaker is open (blocking requests)
    ///
    /// Once the reset timeout has elapsed the first caller gets `false` and
    /// becomes the half-open trial; everyone else keeps getting `true` until
    /// that trial records its result.
    pub fn is_open(&self) -> bool {
        let mut state = self.lock();

        if state.failure_count < self.config.circuit_breaker_threshold {
            return false;
        }
        let reset = Duration::from_secs(self.config.circuit_breaker_reset_secs);
        let cooling = state
            .last_failure_time
            .is_some_and(|last_time| last_time.elapsed() < reset);
        if cooling || state.trial_in_flight {
            return true;
        }

        info!(
            failures = state.failure_count,
            "Circuit breaker half-open, letting one trial through"
        );
        state.trial_in_flight = true;
        false
    }

    /// Record a failed upstream call
    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.failure_count += 1;
        state.last_failure_time = Some(Instant::now());
        if state.trial_in_flight {
            state.trial_in_flight = false;
            warn!(failures = state.failure_count, "Circuit breaker trial failed, reopened");
        } else if state.failure_count == self.config.circuit_breaker_threshold {
            warn!(failures = state.failure_count, "Circuit breaker opened");
        }
    }

    /// Record a successful upstream call, closing the circuit
    pub fn record_success(&self) {
        *self.lock() = BreakerState::default();
    }

    /// Number of consecutive failures recorded so far
    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold() {
        let breaker = CircuitBreaker::new(RecoveryConfig {
            circuit_breaker_threshold: 2,
            ..Default::default()
        });

        breaker.record_failure();
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());
    }

    #[test]
    fn success_resets_failures() {
        let breaker = CircuitBreaker::new(RecoveryConfig {
            circuit_breaker_threshold: 2,
            ..Default::default()
        });

        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert!(!breaker.is_open());
        assert_eq!(breaker.failure_count(), 1);
    }

    #[test]
    fn half_open_lets_a_single_trial_through() {
        let breaker = CircuitBreaker::new(RecoveryConfig {
            circuit_breaker_threshold: 1,
            circuit_breaker_reset_secs: 0,
            ..Default::default()
        });

        breaker.record_failure();
        assert!(!breaker.is_open());
        assert!(breaker.is_open());

        breaker.record_success();
        assert!(!breaker.is_open());
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn failed_trial_reopens() {
        let breaker = CircuitBreaker::new(RecoveryConfig {
            circuit_breaker_threshold: 1,
            circuit_breaker_reset_secs: 60,
            ..Default::default()
        });

        breaker.record_failure();
        assert!(breaker.is_open());

        // Pretend the reset timeout has passed
        breaker.lock().last_failure_time = Some(Instant::now() - Duration::from_secs(61));
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());
        assert_eq!(breaker.failure_count(), 2);
    }
}
