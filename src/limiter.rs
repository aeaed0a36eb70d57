//! Token-bucket pacing for outbound calls
//!
//! One bucket instance throttles all aggregator traffic process-wide; a
//! second, non-blocking instance paces buy admissions. Refill is lazy on
//! each take, so there is no background ticker to leak on shutdown.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

struct BucketState {
    tokens: f64,
    updated: Instant,
}

/// Token bucket. `tokens` stays within `0..=capacity`; refill is
/// monotonic-time-based and saturating.
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(rate_per_sec: f64, burst: f64) -> Self {
        let rate = rate_per_sec.max(0.1);
        let capacity = burst.max(1.0);
        Self {
            rate,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                updated: Instant::now(),
            }),
        }
    }

    /// Refill-and-decrement as one atomic step so concurrent callers
    /// cannot over-admit.
    fn try_take_inner(&self, amount: f64) -> bool {
        let mut state = self.state.lock().expect("bucket mutex poisoned");
        let now = Instant::now();
        let elapsed = now.duration_since(state.updated).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.updated = now;
        if state.tokens >= amount {
            state.tokens -= amount;
            true
        } else {
            false
        }
    }

    /// Non-blocking flavor: admit now or report false immediately.
    pub fn try_take(&self) -> bool {
        self.try_take_inner(1.0)
    }

    /// Blocking flavor: suspend until a token is available.
    pub async fn take(&self, amount: f64) {
        let amount = amount.max(0.1);
        loop {
            if self.try_take_inner(amount) {
                return;
            }
            // sleep long enough for the deficit to refill
            let wait = (amount / self.rate).max(0.01);
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_refusal() {
        let bucket = TokenBucket::new(1.0, 3.0);
        assert!(bucket.try_take());
        assert!(bucket.try_take());
        assert!(bucket.try_take());
        assert!(!bucket.try_take());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_saturating() {
        let bucket = TokenBucket::new(2.0, 2.0);
        assert!(bucket.try_take());
        assert!(bucket.try_take());
        // long idle must not accumulate beyond capacity
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(bucket.try_take());
        assert!(bucket.try_take());
        assert!(!bucket.try_take());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_admission_bound() {
        // In any window of length T, admissions never exceed capacity + rate*T.
        let rate = 5.0;
        let capacity = 3.0;
        let bucket = TokenBucket::new(rate, capacity);

        let window_secs = 4.0;
        let mut admitted = 0u32;
        // hammer the bucket every 10ms across the window
        let steps = (window_secs * 100.0) as u64;
        for _ in 0..steps {
            if bucket.try_take() {
                admitted += 1;
            }
            tokio::time::advance(Duration::from_millis(10)).await;
        }

        let bound = capacity + rate * window_secs;
        assert!(
            (admitted as f64) <= bound,
            "admitted {} exceeds bound {}",
            admitted,
            bound
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_take_waits_for_refill() {
        let bucket = TokenBucket::new(10.0, 1.0);
        bucket.take(1.0).await;

        let start = Instant::now();
        bucket.take(1.0).await; // must suspend ~100ms for one token
        assert!(start.elapsed() >= Duration::from_millis(90));
    }
}
