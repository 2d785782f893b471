//! # Recovery Module
//!
//! Retry and timeout settings for outbound HTTP calls, plus the retry loop
//! used by the CRM and catalog clients.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::circuit_breaker::CircuitBreaker;
use crate::errors::UpstreamError;

/// Recovery configuration for error handling
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Maximum number of retry attempts after the first try
    pub max_retries: u32,
    /// Base delay between retries in milliseconds
    pub base_retry_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_retry_delay_ms: u64,
    /// Timeout for a single attempt in seconds
    pub operation_timeout_secs: u64,
    /// Circuit breaker failure threshold
    pub circuit_breaker_threshold: u32,
    /// Circuit breaker reset timeout in seconds
    pub circuit_breaker_reset_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_retry_delay_ms: 500,
            max_retry_delay_ms: 5000,
            operation_timeout_secs: 20,
            circuit_breaker_threshold: 5,
            circuit_breaker_reset_secs: 60,
        }
    }
}

/// Delay before retry number `attempt` (1-based): exponential backoff capped
/// at `max_retry_delay_ms`, plus up to 10% random jitter.
pub fn calculate_retry_delay(attempt: u32, config: &RecoveryConfig) -> u64 {
    let exponent = attempt.saturating_sub(1).min(16);
    let backoff = config
        .base_retry_delay_ms
        .saturating_mul(1u64 << exponent)
        .min(config.max_retry_delay_ms);
    let jitter_cap = backoff / 10;
    let jitter = if jitter_cap > 0 {
        rand::thread_rng().gen_range(0..=jitter_cap)
    } else {
        0
    };
    backoff + jitter
}

/// Run `operation` with a per-attempt timeout, retrying transient failures.
///
/// The breaker is consulted once per call and updated once with the final
/// result. Only transient failures count against it; a permanent error means
/// the upstream answered, so it counts as the upstream being reachable.
pub async fn with_retry<T, F, Fut>(
    name: &str,
    config: &RecoveryConfig,
    breaker: &CircuitBreaker,
    mut operation: F,
) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    if breaker.is_open() {
        return Err(UpstreamError::CircuitOpen(name.to_string()));
    }

    let timeout = Duration::from_secs(config.operation_timeout_secs);
    let mut attempt = 0;
    let result = loop {
        let result = match tokio::time::timeout(timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout(format!(
                "{name} exceeded {}s",
                config.operation_timeout_secs
            ))),
        };

        match result {
            Ok(value) => break Ok(value),
            Err(e) => {
                attempt += 1;
                if !e.is_transient() || attempt > config.max_retries {
                    break Err(e);
                }
                let delay = calculate_retry_delay(attempt, config);
                warn!(
                    operation = name,
                    attempt,
                    delay_ms = delay,
                    error = %e,
                    "Retrying upstream call"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
    };

    match &result {
        Err(e) if e.is_transient() => breaker.record_failure(),
        _ => breaker.record_success(),
    }
    result
}
