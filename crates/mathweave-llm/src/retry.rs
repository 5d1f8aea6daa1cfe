//! Exponential backoff helpers for provider calls.
//!
//! The reasoner client owns the retry loop (it also has to watch for
//! cancellation and record every attempt), so this module only supplies the
//! policy: which errors are transient and how long to wait.

use std::time::Duration;

use rand::Rng;

use crate::error::ProviderError;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first call.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Random `0..jitter_fraction` of the delay is added.
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
            jitter_fraction: 0.25,
        }
    }
}

/// Determines whether a [`ProviderError`] should be retried.
pub fn is_retryable(err: &ProviderError) -> bool {
    match err {
        ProviderError::RateLimited { .. } => true,
        ProviderError::Timeout => true,
        ProviderError::Http(_) => true,
        ProviderError::RequestFailed(msg) => {
            msg.starts_with("HTTP 500")
                || msg.starts_with("HTTP 502")
                || msg.starts_with("HTTP 503")
                || msg.starts_with("HTTP 504")
        }
        ProviderError::AuthFailed(_)
        | ProviderError::ModelNotFound(_)
        | ProviderError::NotConfigured(_)
        | ProviderError::InvalidResponse(_)
        | ProviderError::Json(_) => false,
    }
}

/// Delay before retry `attempt` (0-indexed): `min(base * 2^n, max)` plus
/// jitter of up to `jitter_fraction` of that.
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt);
    let base_ms = config.base_delay.as_millis() as u64;
    let capped_ms = base_ms
        .saturating_mul(exp)
        .min(config.max_delay.as_millis() as u64);

    let jitter_max_ms = (capped_ms as f64 * config.jitter_fraction.max(0.0)) as u64;
    let jitter_ms = if jitter_max_ms > 0 {
        rand::thread_rng().gen_range(0..=jitter_max_ms)
    } else {
        0
    };

    Duration::from_millis(capped_ms + jitter_ms)
}

/// Like [`compute_delay`], but honours a provider's `retry_after` hint when
/// it asks for longer.
pub fn delay_for(config: &RetryConfig, attempt: u32, err: &ProviderError) -> Duration {
    let computed = compute_delay(config, attempt);
    match err {
        ProviderError::RateLimited { retry_after_ms } => {
            computed.max(Duration::from_millis(*retry_after_ms))
        }
        _ => computed,
    }
}
