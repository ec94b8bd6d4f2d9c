//! Minimum spacing between jobs of one batch run.
//!
//! This is a blocking delay with no burst allowance. A run with a single
//! worker stamps the limiter when a job completes, so the delay separates
//! the end of one job from the start of the next. With several workers the
//! limiter is shared and stamps every dispatch, so it gates how fast new
//! jobs start across all of them.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Delay settings for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Minimum gap between two consecutive job starts.
    pub delay: Duration,

    /// Maximum random jitter added on top of `delay` (uniform [0, jitter]).
    /// `Duration::ZERO` disables it.
    pub jitter: Duration,
}

impl RateLimitConfig {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay plus a fresh random jitter.
    pub fn effective_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.delay;
        }
        let jitter_ms = rand_jitter_ms(self.jitter.as_millis() as u64);
        self.delay + Duration::from_millis(jitter_ms)
    }
}

impl Default for RateLimitConfig {
    /// 2 seconds between jobs, no jitter.
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

/// Shared delay gate. Clones share the same clock.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    last: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            last: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Wait until the configured delay has passed since the last stamp,
    /// then stamp now. The first call never waits.
    ///
    /// The lock is held while sleeping so concurrent callers queue up and
    /// are released one delay apart. Dropping the future before it
    /// completes leaves the stamp untouched.
    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.config.effective_delay();
            let now = Instant::now();
            if ready_at > now {
                tracing::debug!(
                    sleep_ms = %(ready_at - now).as_millis(),
                    "Rate limiting next job"
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Restart the delay window from now.
    pub async fn record_completion(&self) {
        *self.last.lock().await = Some(Instant::now());
    }
}

// ---------------------------------------------------------------------------
// Jitter from a xorshift seeded with the system clock. Not for crypto.
// ---------------------------------------------------------------------------

fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}
