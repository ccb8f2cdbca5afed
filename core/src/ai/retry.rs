use reqwest::StatusCode;
use std::time::{Duration, SystemTime};

use super::ProviderError;

/// Policy parameters for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay used for the first retry attempt.
    pub base_delay: Duration,
    /// Upper bound for any delay, hints included.
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl RetryPolicy {
    pub const fn new(base_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_retries,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(1_000), Duration::from_millis(30_000), 3)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay: Duration,
    pub used_hint: bool,
}

impl RetryDecision {
    const fn no_retry() -> Self {
        Self {
            should_retry: false,
            delay: Duration::ZERO,
            used_hint: false,
        }
    }

    fn retry_with(delay: Duration, used_hint: bool, max_delay: Duration) -> Self {
        Self {
            should_retry: true,
            delay: delay.min(max_delay),
            used_hint,
        }
    }
}

/// Decides whether a failed provider call gets another attempt.
///
/// * `previous_attempts` counts the retries already made.
pub fn evaluate_retry(
    error: &ProviderError,
    policy: RetryPolicy,
    previous_attempts: u32,
) -> RetryDecision {
    if previous_attempts >= policy.max_retries {
        return RetryDecision::no_retry();
    }

    match error {
        ProviderError::Fatal { .. } => RetryDecision::no_retry(),
        ProviderError::Transient {
            retry_after: Some(hint),
            ..
        } => RetryDecision::retry_with(*hint, true, policy.max_delay),
        ProviderError::Transient { .. } | ProviderError::Timeout { .. } => {
            let delay =
                compute_exponential_backoff(policy.base_delay, policy.max_delay, previous_attempts);
            RetryDecision::retry_with(delay, false, policy.max_delay)
        }
    }
}

/// HTTP statuses that are worth retrying: 408, 429 and 5xx.
pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn compute_exponential_backoff(
    base: Duration,
    max_delay: Duration,
    previous_attempts: u32,
) -> Duration {
    if base.is_zero() {
        return Duration::ZERO;
    }

    let multiplier = 1u128
        .checked_shl(previous_attempts)
        .unwrap_or(u128::MAX);
    let delay_ms = base.as_millis().saturating_mul(multiplier);
    let capped_ms = delay_ms.min(max_delay.as_millis());
    Duration::from_millis(u64::try_from(capped_ms).unwrap_or(u64::MAX))
}

/// Parses the value of an HTTP `Retry-After` header, in seconds or as an HTTP date.
pub fn parse_retry_after(value: &str, now: SystemTime) -> Option<Duration> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let instant = httpdate::parse_http_date(trimmed).ok()?;
    Some(instant.duration_since(now).unwrap_or(Duration::ZERO))
}
