//! Token bucket used for per-client admission.

use std::time::{Duration, Instant};

/// A token bucket that refills one token per `interval`, up to `capacity`.
///
/// The bucket does not read the clock itself; every operation takes the
/// current instant so callers control time.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Maximum number of tokens held
    capacity: u32,
    /// Tokens currently available, fractional between refills
    tokens: f64,
    /// Time needed to accrue a single token
    interval: Duration,
    /// Last instant the token count was brought up to date
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: u32, interval: Duration, now: Instant) -> Self {
        Self {
            capacity,
            tokens: capacity as f64,
            interval,
            last_refill: now,
        }
    }

    /// Take one token if available.
    ///
    /// Returns `true` if the event is admitted, `false` if the bucket is empty.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens available at `now`, without consuming any.
    pub fn available(&self, now: Instant) -> u32 {
        self.tokens_at(now).floor() as u32
    }

    /// Refill the bucket to capacity.
    pub fn reset(&mut self, now: Instant) {
        self.tokens = self.capacity as f64;
        self.last_refill = now;
    }

    /// Get the capacity of this bucket.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Get the refill interval of this bucket.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn tokens_at(&self, now: Instant) -> f64 {
        // A clock that stepped backwards adds nothing.
        let elapsed = now.saturating_duration_since(self.last_refill);
        let accrued = elapsed.as_secs_f64() / self.interval.as_secs_f64();
        (self.tokens + accrued).min(self.capacity as f64)
    }

    fn refill(&mut self, now: Instant) {
        self.tokens = self.tokens_at(now);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }
}
