//! Minimum-interval rate limiter.
//!
//! Each pipeline owns its own limiter; the single drainer calling
//! `admit` is the only waiter, so no queueing of waiters is needed.

use crate::config::ConfigError;
use tokio::time::{Duration, Instant, sleep};

/// Enforces a minimum interval of `1 / max_rps` seconds between admissions.
///
/// The first call is admitted immediately. There is no upper delay cap;
/// throughput is bounded only by the configured rate.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_admission: Option<Instant>,
}

impl RateLimiter {
    /// A non-positive (or NaN) rate is a configuration error.
    pub fn new(max_rps: f64) -> Result<Self, ConfigError> {
        if max_rps <= 0.0 || max_rps.is_nan() {
            return Err(ConfigError::InvalidValue(format!(
                "rate limit must be positive, got {max_rps}"
            )));
        }
        Ok(RateLimiter {
            min_interval: Duration::from_secs_f64(1.0 / max_rps),
            last_admission: None,
        })
    }

    /// Suspend until at least `1 / max_rps` seconds have passed since the
    /// previous admission, then record this admission.
    pub async fn admit(&mut self) {
        if let Some(last) = self.last_admission {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        self.last_admission = Some(Instant::now());
    }
}
