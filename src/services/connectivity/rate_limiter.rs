//! Token-bucket rate limiter
//!
//! Refill is monotonic-time based; acquisition suspends cooperatively until
//! a token is available. One bucket per endpoint.

use std::sync::Mutex;
use std::time::{Duration, Instant};

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket: `rate` tokens per second, capacity `burst`
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(rate: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            rate: rate.max(f64::MIN_POSITIVE),
            burst,
            state: Mutex::new(BucketState { tokens: burst, last_refill: Instant::now() }),
        }
    }

    /// Take one token, suspending until one is available
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().expect("token bucket poisoned");
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.rate)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Take one token only if immediately available
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().expect("token bucket poisoned");
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
        state.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_drains_then_blocks() {
        let bucket = TokenBucket::new(1000.0, 3);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[tokio::test]
    async fn refills_over_time() {
        let bucket = TokenBucket::new(1000.0, 1);
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(bucket.try_acquire());
    }

    #[tokio::test]
    async fn emission_bounded_by_rate_plus_burst() {
        // rate 50/s, burst 5: over ~100ms at most 5 + 50*0.1 + 1 tokens
        let bucket = TokenBucket::new(50.0, 5);
        let started = Instant::now();
        let mut granted = 0u32;
        while started.elapsed() < Duration::from_millis(100) {
            if bucket.try_acquire() {
                granted += 1;
            }
            tokio::task::yield_now().await;
        }
        assert!(granted <= 11, "granted {} tokens", granted);
    }
}
