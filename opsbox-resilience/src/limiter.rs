//! Token-bucket rate limiter.

use std::sync::Mutex;
use std::time::Duration;

use smol_str::SmolStr;
use thiserror::Error;
use tokio::time::Instant;

/// Error returned when no token became available before the deadline.
#[derive(Debug, Clone, Error)]
#[error("rate limit exceeded for '{key}'")]
pub struct RateLimitExceeded {
    /// Bucket key (adapter or host name).
    pub key: SmolStr,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Strict token bucket: `capacity` tokens refilled at `rate` tokens/second,
/// burst capped at `capacity`, no borrowing across buckets.
///
/// [`TokenBucket::acquire`] blocks cooperatively until a token is available
/// or the caller's deadline elapses.
pub struct TokenBucket {
    key: SmolStr,
    capacity: f64,
    rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Creates a full bucket.
    ///
    /// `capacity` and `rate` are clamped to at least a small positive value
    /// so a misconfigured bucket degrades to "very slow" rather than
    /// dividing by zero.
    pub fn new(key: impl Into<SmolStr>, capacity: u32, rate_per_sec: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            key: key.into(),
            capacity,
            rate: rate_per_sec.max(0.001),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Bucket key.
    pub fn key(&self) -> &str {
        &self.key
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.last_refill = now;
    }

    /// Takes a token immediately if one is available.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.refill(&mut state, Instant::now());
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Waits for a token, up to `deadline`.
    ///
    /// The wait suspends in slices sized to the refill rate, so competing
    /// callers interleave fairly. Exceeding the deadline reports
    /// [`RateLimitExceeded`] without consuming a token.
    pub async fn acquire(&self, deadline: Instant) -> Result<(), RateLimitExceeded> {
        loop {
            let wait = {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                let now = Instant::now();
                self.refill(&mut state, now);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Ok(());
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.rate)
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(RateLimitExceeded {
                    key: self.key.clone(),
                });
            }
            let sleep_until = (now + wait).min(deadline);
            tokio::time::sleep_until(sleep_until).await;
            if Instant::now() >= deadline {
                // One last immediate attempt at the boundary.
                if self.try_acquire() {
                    return Ok(());
                }
                return Err(RateLimitExceeded {
                    key: self.key.clone(),
                });
            }
        }
    }
}
