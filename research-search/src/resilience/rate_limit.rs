//! Token-bucket rate limiting for backend calls.
//!
//! Each backend owns a [`TokenBucket`] and one more bucket is shared by all
//! backends. A call must take a token from both; [`acquire_all`] waits for
//! them for at most a short grace period and then fails fast.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::SearchError;

/// Bucket size and refill speed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum burst size (tokens available initially).
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_rate: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            refill_rate: 2.0,
        }
    }
}

impl RateLimitConfig {
    pub(crate) fn validate(&self, label: &str) -> Result<(), SearchError> {
        if self.capacity == 0 {
            return Err(SearchError::Config(format!(
                "{label}: rate_limit capacity must be greater than 0"
            )));
        }
        if !self.refill_rate.is_finite() || self.refill_rate <= 0.0 {
            return Err(SearchError::Config(format!(
                "{label}: rate_limit refill_rate must be greater than 0"
            )));
        }
        Ok(())
    }
}

/// Internal mutable state for the token-bucket algorithm.
#[derive(Debug)]
struct BucketState {
    /// Currently available tokens (fractional for sub-token accumulation).
    available: f64,
    /// Timestamp of the last refill calculation.
    last_check: Instant,
}

/// Thread-safe token bucket.
///
/// Up to `capacity` tokens are available, refilling at `refill_rate` tokens
/// per second. Each successful [`try_acquire`](Self::try_acquire) consumes
/// one token.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            capacity: config.capacity,
            refill_rate: config.refill_rate,
            state: Mutex::new(BucketState {
                available: f64::from(config.capacity),
                last_check: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_check).as_secs_f64();
        state.last_check = now;
        state.available =
            (state.available + elapsed * self.refill_rate).min(f64::from(self.capacity));
    }

    /// Take one token if one is available.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.lock();
        self.refill(&mut state);
        if state.available >= 1.0 {
            state.available -= 1.0;
            true
        } else {
            false
        }
    }

    /// Give back a token taken by a call that never went out.
    pub fn refund(&self) {
        let mut state = self.lock();
        self.refill(&mut state);
        state.available = (state.available + 1.0).min(f64::from(self.capacity));
    }

    /// Time until the next token is available. `None` if the bucket never refills.
    pub fn time_until_available(&self) -> Option<Duration> {
        let mut state = self.lock();
        self.refill(&mut state);
        if state.available >= 1.0 {
            return Some(Duration::ZERO);
        }
        if self.refill_rate <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64((1.0 - state.available) / self.refill_rate))
    }

    /// Tokens currently available, after refilling.
    pub fn available(&self) -> f64 {
        let mut state = self.lock();
        self.refill(&mut state);
        state.available
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Refill to capacity.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.available = f64::from(self.capacity);
        state.last_check = Instant::now();
    }
}

/// Take one token from every bucket, or none at all.
///
/// Waits for tokens while the wait fits inside `grace`; beyond that the call
/// fails with [`SearchError::RateLimited`] instead of queuing.
pub async fn acquire_all(
    label: &str,
    buckets: &[&TokenBucket],
    grace: Duration,
) -> Result<(), SearchError> {
    let deadline = Instant::now() + grace;
    loop {
        let mut wait = Duration::ZERO;
        let mut taken = Vec::with_capacity(buckets.len());
        for bucket in buckets {
            if bucket.try_acquire() {
                taken.push(*bucket);
                continue;
            }
            for held in &taken {
                held.refund();
            }
            taken.clear();
            match bucket.time_until_available() {
                Some(until) => wait = until.max(Duration::from_millis(1)),
                None => {
                    return Err(SearchError::RateLimited(format!(
                        "{label}: bucket never refills"
                    )));
                }
            }
            break;
        }
        if wait.is_zero() {
            return Ok(());
        }
        if Instant::now() + wait > deadline {
            tracing::debug!(backend = %label, wait_ms = wait.as_millis() as u64, "rate limit token not available within grace");
            return Err(SearchError::RateLimited(format!(
                "{label}: no token within {}ms",
                grace.as_millis()
            )));
        }
        tokio::time::sleep(wait).await;
    }
}
