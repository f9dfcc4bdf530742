//! Retry loop with exponential backoff for transient HTTP failures.
//!
//! Every request made through [`crate::HttpClient`] goes through
//! [`send_with_retry`]. The `build_request` closure is called on each
//! attempt to construct a fresh [`reqwest::RequestBuilder`], since builders
//! are consumed by `.send()`.
//!
//! Transient failures (connection errors, timeouts, truncated bodies, and
//! the configured retry statuses, by default 429 and 5xx gateway errors)
//! are retried. Every other 4xx is permanent and returned immediately.

use std::time::Duration;

use crate::rate_limit::RateLimiter;
use crate::{FetchError, Fetched};

/// Statuses retried by default.
pub const DEFAULT_RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Retry settings shared by every request of a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// HTTP statuses considered transient.
    pub retry_statuses: Vec<u16>,
    /// Delay before the first retry; doubled on each further retry.
    pub base_delay: Duration,
    /// Upper bound for a single backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-based): `base * 2^(retry-1)`,
    /// capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Whether a response status should be retried.
    #[must_use]
    pub fn is_retry_status(&self, status: u16) -> bool {
        self.retry_statuses.contains(&status)
    }
}

/// Sends a request, retrying transient failures, and reads the full body.
///
/// The limiter is consulted before every attempt, retries included.
///
/// # Errors
///
/// * [`FetchError::Transient`] when every attempt failed transiently.
/// * [`FetchError::Permanent`] for non-retryable statuses and request
///   errors.
pub async fn send_with_retry<F>(
    build_request: &F,
    policy: &RetryPolicy,
    limiter: &RateLimiter,
    url: &str,
) -> Result<Fetched, FetchError>
where
    F: Fn() -> reqwest::RequestBuilder + Sync,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut pending_delay: Option<Duration> = None;
    let mut last_message = String::new();

    for attempt in 1..=max_attempts {
        if let Some(delay) = pending_delay.take() {
            log::warn!("  retry {}/{} for {url} in {delay:?}...", attempt - 1, max_attempts - 1);
            tokio::time::sleep(delay).await;
        }

        limiter.wait().await;

        let response = match build_request().send().await {
            Ok(response) => response,
            Err(e) => {
                if is_transient(&e) && attempt < max_attempts {
                    log::warn!("  transient error for {url}: {e}");
                    last_message = e.to_string();
                    pending_delay = Some(policy.delay_for(attempt));
                    continue;
                }
                if is_transient(&e) {
                    return Err(FetchError::Transient {
                        url: url.to_string(),
                        message: format!("{e} after {max_attempts} attempts"),
                    });
                }
                return Err(FetchError::Permanent {
                    url: url.to_string(),
                    status: None,
                    message: e.to_string(),
                });
            }
        };

        let status = response.status();

        if policy.is_retry_status(status.as_u16()) {
            last_message = format!("HTTP {status}");
            if attempt < max_attempts {
                log::warn!("  HTTP {status} for {url}");
                let backoff = policy.delay_for(attempt);
                pending_delay = Some(
                    retry_after(&response)
                        .map_or(backoff, |hint| hint.max(backoff))
                        .min(policy.max_delay),
                );
                continue;
            }
            return Err(FetchError::Transient {
                url: url.to_string(),
                message: format!("{last_message} after {max_attempts} attempts"),
            });
        }

        if !status.is_success() {
            return Err(FetchError::Permanent {
                url: url.to_string(),
                status: Some(status.as_u16()),
                message: format!("HTTP {status}"),
            });
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        match response.bytes().await {
            Ok(body) => {
                return Ok(Fetched {
                    status: status.as_u16(),
                    final_url,
                    content_type,
                    body: body.to_vec(),
                });
            }
            Err(e) => {
                last_message = format!("body read failed: {e}");
                if attempt < max_attempts {
                    log::warn!("  response body read failed for {url}: {e}");
                    pending_delay = Some(policy.delay_for(attempt));
                }
            }
        }
    }

    Err(FetchError::Transient {
        url: url.to_string(),
        message: format!("{last_message} after {max_attempts} attempts"),
    })
}

/// Parses a `Retry-After` header given in seconds.
fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Returns `true` if the error is likely transient and worth retrying.
/// Builder errors (bad URL, bad header) fail the same way every time.
fn is_transient(e: &reqwest::Error) -> bool {
    !e.is_builder() && (e.is_timeout() || e.is_connect() || e.is_body())
}
