//! Minimum-interval rate limiting.
//!
//! A [`RateLimiter`] enforces a minimum spacing between successive calls
//! against one endpoint. It is shared (behind an [`std::sync::Arc`]) by
//! everything that hits that endpoint, including concurrent download
//! workers. The lock is held while sleeping, so concurrent callers are
//! released one interval apart instead of all at once.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces `1 / rate_per_sec` seconds between successive [`wait`](Self::wait)
/// returns.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Option<Duration>,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter allowing `rate_per_sec` calls per second.
    ///
    /// A non-positive (or non-finite) rate disables limiting.
    #[must_use]
    pub fn new(rate_per_sec: f64) -> Self {
        let interval = (rate_per_sec.is_finite() && rate_per_sec > 0.0)
            .then(|| Duration::from_secs_f64(1.0 / rate_per_sec));
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    /// A limiter that never sleeps.
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            interval: None,
            last: Mutex::new(None),
        }
    }

    /// The enforced spacing, if any.
    #[must_use]
    pub const fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Sleeps until at least one interval has passed since the previous
    /// call returned, then records the current time.
    pub async fn wait(&self) {
        let Some(interval) = self.interval else {
            return;
        };

        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < interval {
                tokio::time::sleep(interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}
