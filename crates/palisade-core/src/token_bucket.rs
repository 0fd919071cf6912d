//! Lazily refilled token bucket.
//!
//! The bucket never runs a timer. Every access credits the tokens earned
//! since the last refill, so its state is a pure function of the clock and
//! the call history. Each method has an `*_at` form taking the current
//! instant explicitly; the plain forms read [`Instant::now`].

use std::time::Duration;

use tokio::time::Instant;

use crate::error::AppError;

/// Configuration for a [`TokenBucket`].
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucketConfig {
    /// Burst ceiling.
    pub capacity: u32,
    /// Tokens credited per `refill_period`.
    pub refill_rate: f64,
    pub refill_period: Duration,
}

impl TokenBucketConfig {
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            refill_period: Duration::from_secs(1),
        }
    }

    pub fn with_refill_period(mut self, period: Duration) -> Self {
        self.refill_period = period;
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.capacity == 0 {
            return Err(AppError::ConfigError(
                "token bucket capacity must be at least 1".into(),
            ));
        }
        if !self.refill_rate.is_finite() || self.refill_rate <= 0.0 {
            return Err(AppError::ConfigError(format!(
                "token bucket refill rate must be positive, got {}",
                self.refill_rate
            )));
        }
        if self.refill_period.is_zero() {
            return Err(AppError::ConfigError(
                "token bucket refill period must be non-zero".into(),
            ));
        }
        if Duration::try_from_secs_f64(self.refill_period.as_secs_f64() / self.refill_rate).is_err() {
            return Err(AppError::ConfigError(format!(
                "token bucket refill rate {} is too small for a {:?} period",
                self.refill_rate, self.refill_period
            )));
        }
        Ok(())
    }
}

impl Default for TokenBucketConfig {
    /// Five-token burst refilled at 1.5 tokens per second.
    fn default() -> Self {
        Self::new(5, 1.5)
    }
}

#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: u32,
    tokens: u32,
    refill_rate: f64,
    refill_period: Duration,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(config: &TokenBucketConfig) -> Result<Self, AppError> {
        Self::new_at(config, Instant::now())
    }

    pub fn new_at(config: &TokenBucketConfig, now: Instant) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self {
            capacity: config.capacity,
            tokens: config.capacity,
            refill_rate: config.refill_rate,
            refill_period: config.refill_period,
            last_refill: now,
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Time it takes to earn one token.
    fn token_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.refill_period.as_secs_f64() / self.refill_rate)
            .unwrap_or(Duration::MAX)
    }

    pub fn refill_at(&mut self, now: Instant) {
        if self.tokens >= self.capacity {
            // A full bucket does not bank time towards future tokens.
            self.last_refill = now;
            return;
        }

        let elapsed = now.saturating_duration_since(self.last_refill);
        let earned = (elapsed.as_secs_f64() / self.refill_period.as_secs_f64()
            * self.refill_rate)
            .floor();
        if earned < 1.0 {
            return;
        }

        let added = if earned >= f64::from(u32::MAX) {
            u32::MAX
        } else {
            earned as u32
        };
        self.tokens = self.tokens.saturating_add(added).min(self.capacity);

        if self.tokens == self.capacity {
            self.last_refill = now;
        } else {
            // Keep the fractional progress towards the next token.
            let credited = self.token_interval().checked_mul(added).unwrap_or(elapsed);
            self.last_refill = self
                .last_refill
                .checked_add(credited)
                .map_or(now, |at| at.min(now));
        }
    }

    /// Take `n` tokens if available. Leaves the balance untouched otherwise.
    pub fn consume(&mut self, n: u32) -> bool {
        self.consume_at(n, Instant::now())
    }

    pub fn consume_at(&mut self, n: u32, now: Instant) -> bool {
        self.refill_at(now);
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Refilled balance.
    pub fn available(&mut self) -> u32 {
        self.available_at(Instant::now())
    }

    pub fn available_at(&mut self, now: Instant) -> u32 {
        self.refill_at(now);
        self.tokens
    }

    /// How long until at least one token is available, rounded up to the millisecond.
    pub fn time_until_next_token(&mut self) -> Duration {
        self.time_until_next_token_at(Instant::now())
    }

    pub fn time_until_next_token_at(&mut self, now: Instant) -> Duration {
        self.refill_at(now);
        if self.tokens >= 1 {
            return Duration::ZERO;
        }
        let progress = now.saturating_duration_since(self.last_refill);
        let remaining = self.token_interval().saturating_sub(progress);
        let millis = remaining.as_nanos().div_ceil(1_000_000);
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }
}
