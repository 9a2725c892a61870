//! Retry with exponential backoff for description requests

use std::time::Duration;

use crate::Error;

/// Retry policy for the generation endpoint
///
/// `max_attempts` counts the first call. The delay before retry `n`
/// (1-based) is `initial_backoff * 2^(n-1)`; nothing is slept after the
/// final attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry (doubles each retry)
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt `attempt` (1-based) before the next one
    ///
    /// Returns `None` when `attempt` was the last one allowed.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.max_attempts {
            return None;
        }

        Some(
            self.initial_backoff
                .saturating_mul(2u32.saturating_pow(attempt - 1)),
        )
    }

    /// All delays a fully failing call would sleep, in order
    #[must_use]
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts)
            .filter_map(|attempt| self.delay_after(attempt))
            .collect()
    }
}

/// Turn a non-success response from the generation endpoint into a classified error
///
/// This is the only place endpoint failures are matched on text; everything
/// downstream works with the resulting variant.
#[must_use]
pub fn classify_api_failure(status: u16, body: &str) -> Error {
    let lower = body.to_lowercase();
    let detail = if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {body}")
    };

    if status == 401 || status == 403 || lower.contains("api key not valid") {
        return Error::Credential(detail);
    }

    if status == 429
        || lower.contains("resource has been exhausted")
        || lower.contains("resource_exhausted")
    {
        return Error::RateLimited(detail);
    }

    if (500..600).contains(&status) || lower.contains("server error") {
        return Error::TransientService(detail);
    }

    if lower.contains("image") && (lower.contains("invalid") || lower.contains("unsupported")) {
        return Error::UnsupportedImage(detail);
    }

    Error::Api(detail)
}

/// Classify a transport-level failure (nothing came back)
#[must_use]
pub fn classify_transport_failure(err: &reqwest::Error) -> Error {
    if err.is_decode() {
        return Error::Api(format!("malformed response: {err}"));
    }

    Error::TransientService(format!("network error: {err}"))
}
