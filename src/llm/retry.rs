//! Retry with linear backoff for LLM API calls

use std::time::Duration;

/// Retry policy for generation requests
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_retries: u32,
    /// Delay step; attempt `n` waits `base_delay * (n + 1)`
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Whether an HTTP status is worth retrying (rate limits and server errors)
#[must_use]
pub fn is_recoverable(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Whether a transport error is worth retrying
#[must_use]
pub fn is_recoverable_transport(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// Extract the server-suggested delay from a Google API error body
///
/// The value lives in a `google.rpc.RetryInfo` detail as a duration string
/// such as `"34s"` or `"1.5s"`.
#[must_use]
pub fn parse_retry_after(body: &str) -> Option<Duration> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    let details = v.get("error")?.get("details")?.as_array()?;

    details.iter().find_map(|detail| {
        let delay = detail.get("retryDelay")?.as_str()?;
        let secs: f64 = delay.strip_suffix('s')?.parse().ok()?;
        Duration::try_from_secs_f64(secs).ok()
    })
}

/// Compute the delay after a failed attempt
///
/// A server-provided `retry_after` wins but is capped at `policy.max_delay`.
#[must_use]
pub fn delay_for_attempt(
    policy: &RetryPolicy,
    attempt: u32,
    retry_after: Option<Duration>,
) -> Duration {
    if let Some(ra) = retry_after {
        return ra.min(policy.max_delay);
    }

    policy
        .base_delay
        .saturating_mul(attempt.saturating_add(1))
        .min(policy.max_delay)
}
