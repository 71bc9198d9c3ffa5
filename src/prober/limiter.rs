//! Global token-bucket rate limit shared by all probe workers (spec.md §5
//! "per-item exponential backoff combined with a global rate limit").
//!
//! Hand-rolled rather than pulling in a rate-limiting crate: the bucket is
//! a single shared counter refilled by one background tick, which is all
//! this needs and keeps the dependency set aligned with the teacher.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub struct RateLimiter {
    tokens: AtomicU32,
    burst: u32,
    notify: Notify,
}

impl RateLimiter {
    pub fn new(rps: u32, burst: u32) -> Arc<Self> {
        let limiter = Arc::new(Self {
            tokens: AtomicU32::new(burst),
            burst,
            notify: Notify::new(),
        });
        let refill_every = Duration::from_secs_f64(1.0 / rps.max(1) as f64);
        let weak = Arc::downgrade(&limiter);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(refill_every);
            loop {
                interval.tick().await;
                let Some(limiter) = weak.upgrade() else {
                    return;
                };
                limiter.refill();
            }
        });
        limiter
    }

    fn refill(&self) {
        let prev = self.tokens.load(Ordering::Acquire);
        if prev < self.burst {
            self.tokens.fetch_add(1, Ordering::AcqRel);
            self.notify.notify_one();
        }
    }

    pub async fn acquire(&self) {
        loop {
            let prev = self.tokens.load(Ordering::Acquire);
            if prev > 0
                && self
                    .tokens
                    .compare_exchange(prev, prev - 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                return;
            }
            self.notify.notified().await;
        }
    }
}

/// Exponential backoff for a retried work item (spec.md §5).
pub fn backoff_delay(attempt: u32, min: Duration, max: Duration) -> Duration {
    let factor = 2u64.saturating_pow(attempt.min(20));
    let scaled = min.saturating_mul(factor as u32);
    scaled.min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_then_caps() {
        let min = Duration::from_millis(50);
        let max = Duration::from_secs(30);
        assert_eq!(backoff_delay(0, min, max), Duration::from_millis(50));
        assert_eq!(backoff_delay(1, min, max), Duration::from_millis(100));
        assert_eq!(backoff_delay(2, min, max), Duration::from_millis(200));
        assert_eq!(backoff_delay(30, min, max), max);
    }
}
