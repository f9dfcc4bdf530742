#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! HTTP plumbing shared by every harvest source.
//!
//! [`HttpClient`] wraps a [`reqwest::Client`] with a fixed user agent,
//! timeouts, a [`RetryPolicy`], and a [`RateLimiter`]. Connectors should
//! never call `reqwest` directly; going through the client guarantees
//! rate limiting and retry on every request, including retries.

pub mod payload;
pub mod rate_limit;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use openstrength_harvest_models::PayloadSpec;
use serde::Deserialize;

pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;

/// Default `User-Agent` sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!(
    "openstrength-harvest/",
    env!("CARGO_PKG_VERSION"),
    " (open-access research harvester)"
);

/// Errors that can occur while fetching over HTTP.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The underlying client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    /// Retries were exhausted on a transient failure.
    #[error("transient failure fetching {url}: {message}")]
    Transient {
        /// Requested URL.
        url: String,
        /// Last failure seen.
        message: String,
    },

    /// A non-retryable failure (4xx other than 429, invalid request).
    #[error("request to {url} failed: {message}")]
    Permanent {
        /// Requested URL.
        url: String,
        /// HTTP status, when a response was received.
        status: Option<u16>,
        /// Description.
        message: String,
    },

    /// The body could not be decoded as the requested representation.
    #[error("could not decode response from {url}: {message}")]
    Decode {
        /// Requested URL.
        url: String,
        /// Parser error.
        message: String,
    },
}

impl FetchError {
    /// HTTP status of a permanent failure.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Permanent { status, .. } => *status,
            _ => None,
        }
    }

    /// Whether the server answered 404 or 410.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.status(), Some(404 | 410))
    }

    /// Whether the failure was transient (retries exhausted).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// A successful response with its body fully read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    /// HTTP status.
    pub status: u16,
    /// URL after redirects.
    pub final_url: String,
    /// Declared `Content-Type`.
    pub content_type: Option<String>,
    /// Raw body.
    pub body: Vec<u8>,
}

impl Fetched {
    /// Body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Result of [`HttpClient::fetch_payload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadFetch {
    /// A body of the expected format.
    Valid(Fetched),
    /// Something else came back (e.g. an HTML page with no usable link).
    Invalid {
        /// URL after redirects.
        final_url: String,
        /// Declared content type.
        content_type: Option<String>,
    },
}

/// `[http]` configuration table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// `User-Agent` header.
    pub user_agent: String,
    /// Whole-request timeout.
    pub timeout_secs: u64,
    /// Connection timeout.
    pub connect_timeout_secs: u64,
    /// Total attempts per request.
    pub max_attempts: u32,
    /// First backoff delay.
    pub backoff_base_ms: u64,
    /// Backoff cap.
    pub backoff_max_ms: u64,
    /// Statuses treated as transient.
    pub retry_statuses: Vec<u16>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 60,
            connect_timeout_secs: 20,
            max_attempts: 5,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            retry_statuses: retry::DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }
}

impl HttpConfig {
    /// The retry policy described by this table.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            retry_statuses: self.retry_statuses.clone(),
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms.max(self.backoff_base_ms)),
        }
    }
}

/// Rate-limited, retrying HTTP client.
///
/// Cloning is cheap; clones share the connection pool, and
/// [`with_limiter`](Self::with_limiter) produces a view that throttles
/// against a different [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    policy: Arc<RetryPolicy>,
    limiter: Arc<RateLimiter>,
}

impl HttpClient {
    /// Builds a client from the `[http]` table. The returned client is not
    /// rate limited until [`with_limiter`](Self::with_limiter) is applied.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Build`] if the TLS backend cannot be initialized.
    pub fn new(config: &HttpConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(FetchError::Build)?;

        Ok(Self {
            client,
            policy: Arc::new(config.retry_policy()),
            limiter: Arc::new(RateLimiter::unlimited()),
        })
    }

    /// Same connection pool, different limiter.
    #[must_use]
    pub fn with_limiter(&self, limiter: Arc<RateLimiter>) -> Self {
        Self {
            client: self.client.clone(),
            policy: Arc::clone(&self.policy),
            limiter,
        }
    }

    /// Same connection pool, different retry policy.
    #[must_use]
    pub fn with_policy(&self, policy: RetryPolicy) -> Self {
        Self {
            client: self.client.clone(),
            policy: Arc::new(policy),
            limiter: Arc::clone(&self.limiter),
        }
    }

    /// The limiter this client waits on.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Sends a custom request (headers, auth...) with retry and rate
    /// limiting. `url` is only used for logging and errors.
    ///
    /// # Errors
    ///
    /// See [`retry::send_with_retry`].
    pub async fn execute<F>(&self, url: &str, build_request: F) -> Result<Fetched, FetchError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder + Sync,
    {
        let build = || build_request(&self.client);
        retry::send_with_retry(&build, &self.policy, &self.limiter, url).await
    }

    /// `GET url?query`.
    ///
    /// # Errors
    ///
    /// See [`retry::send_with_retry`].
    pub async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<Fetched, FetchError> {
        self.execute(url, |client| client.get(url).query(query)).await
    }

    /// `GET` and parse the body as JSON.
    ///
    /// # Errors
    ///
    /// Fails like [`get`](Self::get), or with [`FetchError::Decode`] when
    /// the body is not JSON.
    pub async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, FetchError> {
        let fetched = self.get(url, query).await?;
        decode_json(&fetched)
    }

    /// `GET` and return the body as text.
    ///
    /// # Errors
    ///
    /// Fails like [`get`](Self::get).
    pub async fn get_text(&self, url: &str, query: &[(&str, String)]) -> Result<String, FetchError> {
        Ok(self.get(url, query).await?.text())
    }

    /// Downloads a payload and validates its format, following an HTML
    /// landing page to the real document when `spec.follow_landing` is set.
    ///
    /// # Errors
    ///
    /// Returns the [`FetchError`] of the primary URL. Failures of landing
    /// page links are logged and skipped.
    pub async fn fetch_payload(&self, url: &str, spec: &PayloadSpec) -> Result<PayloadFetch, FetchError> {
        let fetched = self.get(url, &[]).await?;
        if payload::is_valid(spec.kind, fetched.content_type.as_deref(), &fetched.final_url, &fetched.body) {
            return Ok(PayloadFetch::Valid(fetched));
        }

        if spec.follow_landing && payload::looks_like_html(&fetched.body) {
            let links = payload::landing_links(&fetched.text(), &fetched.final_url);
            log::debug!("{url}: landing page with {} candidate link(s)", links.len());
            for link in links {
                match self.get(&link, &[]).await {
                    Ok(hop) => {
                        if payload::is_valid(spec.kind, hop.content_type.as_deref(), &hop.final_url, &hop.body) {
                            return Ok(PayloadFetch::Valid(hop));
                        }
                    }
                    Err(e) => log::debug!("{url}: landing link {link} failed: {e}"),
                }
            }
        }

        Ok(PayloadFetch::Invalid {
            final_url: fetched.final_url,
            content_type: fetched.content_type,
        })
    }
}

/// Parses a fetched body as JSON.
///
/// # Errors
///
/// Returns [`FetchError::Decode`] with a short body preview on failure.
pub fn decode_json(fetched: &Fetched) -> Result<serde_json::Value, FetchError> {
    serde_json::from_slice(&fetched.body).map_err(|e| {
        let text = fetched.text();
        let preview: String = text.chars().take(200).collect();
        FetchError::Decode {
            url: fetched.final_url.clone(),
            message: format!("{e} (body starts: {preview:?})"),
        }
    })
}
