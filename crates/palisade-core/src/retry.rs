//! Retry loop with per-context policies and circuit breakers.
//!
//! Every context gets its own [`CircuitBreaker`], created on first use, so a
//! failing target trips independently of healthy ones. Each attempt goes
//! through the breaker; failures are classified and either retried after an
//! exponential backoff or returned to the caller unchanged.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::backoff;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use crate::classify::{ErrorKind, ErrorRecord, ErrorTracker, classify};
use crate::error::AppError;

/// Lower bound on the backoff after a rate-limited attempt.
pub const RATE_LIMIT_MIN_DELAY: Duration = Duration::from_millis(5000);

/// How many times, and how patiently, a context is retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `max_retries + 1` invocations at most.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter_factor: f64,
    pub retryable_kinds: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_factor: 2.0,
            jitter_factor: 0.1,
            retryable_kinds: HashSet::from([
                ErrorKind::NetworkFailure,
                ErrorKind::RateLimited,
                ErrorKind::ProxyFailure,
            ]),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    pub fn with_retryable_kinds(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable_kinds = kinds.into_iter().collect();
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.base_delay > self.max_delay {
            return Err(AppError::ConfigError(format!(
                "retry base delay ({} ms) exceeds max delay ({} ms)",
                self.base_delay.as_millis(),
                self.max_delay.as_millis()
            )));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(AppError::ConfigError(format!(
                "retry backoff factor must be at least 1, got {}",
                self.backoff_factor
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(AppError::ConfigError(format!(
                "retry jitter factor must be within [0, 1], got {}",
                self.jitter_factor
            )));
        }
        Ok(())
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable_kinds.contains(&kind)
    }

    /// Backoff before retry number `attempt + 1`.
    ///
    /// Rate-limited failures wait at least [`RATE_LIMIT_MIN_DELAY`], or the
    /// server's hint when that is longer.
    pub fn delay_for_attempt(
        &self,
        attempt: u32,
        kind: ErrorKind,
        retry_after: Option<Duration>,
    ) -> Duration {
        let delay = backoff::apply_jitter(
            backoff::exponential(self.base_delay, self.backoff_factor, attempt, self.max_delay),
            self.jitter_factor,
        );
        if kind == ErrorKind::RateLimited {
            delay
                .max(RATE_LIMIT_MIN_DELAY)
                .max(backoff::server_hint(retry_after))
        } else {
            delay
        }
    }

    /// Copy of this policy with `overrides` applied.
    pub fn merged(&self, overrides: &RetryOverrides) -> Self {
        let mut policy = self.clone();
        if let Some(v) = overrides.max_retries {
            policy.max_retries = v;
        }
        if let Some(v) = overrides.base_delay {
            policy.base_delay = v;
        }
        if let Some(v) = overrides.max_delay {
            policy.max_delay = v;
        }
        if let Some(v) = overrides.backoff_factor {
            policy.backoff_factor = v;
        }
        if let Some(v) = overrides.jitter_factor {
            policy.jitter_factor = v;
        }
        if let Some(kinds) = &overrides.retryable_kinds {
            policy.retryable_kinds = kinds.clone();
        }
        policy
    }
}

/// Per-call adjustments to a context's policy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryOverrides {
    pub max_retries: Option<u32>,
    pub base_delay: Option<Duration>,
    pub max_delay: Option<Duration>,
    pub backoff_factor: Option<f64>,
    pub jitter_factor: Option<f64>,
    pub retryable_kinds: Option<HashSet<ErrorKind>>,
}

impl RetryOverrides {
    pub fn max_retries(max_retries: u32) -> Self {
        Self {
            max_retries: Some(max_retries),
            ..Default::default()
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Recovered from poisoned retry manager mutex");
        poisoned.into_inner()
    })
}

/// Registry of retry policies and circuit breakers, keyed by context.
pub struct RetryManager {
    default_policy: RetryPolicy,
    default_breaker: CircuitBreakerConfig,
    policies: Mutex<HashMap<String, RetryPolicy>>,
    breaker_configs: Mutex<HashMap<String, CircuitBreakerConfig>>,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    errors: ErrorTracker,
}

impl Default for RetryManager {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), CircuitBreakerConfig::default())
    }
}

impl RetryManager {
    pub fn new(default_policy: RetryPolicy, default_breaker: CircuitBreakerConfig) -> Self {
        Self {
            default_policy,
            default_breaker,
            policies: Mutex::new(HashMap::new()),
            breaker_configs: Mutex::new(HashMap::new()),
            breakers: Mutex::new(HashMap::new()),
            errors: ErrorTracker::new(),
        }
    }

    pub fn default_policy(&self) -> &RetryPolicy {
        &self.default_policy
    }

    /// Register the policy for `context`. A context's policy cannot be replaced.
    pub fn register_policy(
        &self,
        context: impl Into<String>,
        policy: RetryPolicy,
    ) -> Result<(), AppError> {
        policy.validate()?;
        let context = context.into();
        let mut policies = lock(&self.policies);
        if policies.contains_key(&context) {
            return Err(AppError::ConfigError(format!(
                "retry policy for context '{context}' is already registered"
            )));
        }
        tracing::debug!(context = %context, max_retries = policy.max_retries, "Registered retry policy");
        policies.insert(context, policy);
        Ok(())
    }

    /// Breaker settings for `context`. Must happen before the context's first call.
    pub fn register_breaker(
        &self,
        context: impl Into<String>,
        config: CircuitBreakerConfig,
    ) -> Result<(), AppError> {
        config.validate()?;
        let context = context.into();
        // Held across the insert so `breaker` cannot create it in between.
        let breakers = lock(&self.breakers);
        if breakers.contains_key(&context) {
            return Err(AppError::ConfigError(format!(
                "circuit breaker for context '{context}' is already in use"
            )));
        }
        lock(&self.breaker_configs).insert(context, config);
        drop(breakers);
        Ok(())
    }

    /// Registered policy for `context`, or the default.
    pub fn policy_for(&self, context: &str) -> RetryPolicy {
        lock(&self.policies)
            .get(context)
            .cloned()
            .unwrap_or_else(|| self.default_policy.clone())
    }

    /// The breaker guarding `context`, created on first use.
    pub fn breaker(&self, context: &str) -> CircuitBreaker {
        let mut breakers = lock(&self.breakers);
        if let Some(breaker) = breakers.get(context) {
            return breaker.clone();
        }
        let config = lock(&self.breaker_configs)
            .get(context)
            .cloned()
            .unwrap_or_else(|| self.default_breaker.clone());
        let breaker = CircuitBreaker::new(context, config);
        breakers.insert(context.to_string(), breaker.clone());
        breaker
    }

    /// Force the context's breaker closed. Returns false if it was never created.
    pub fn reset_breaker(&self, context: &str) -> bool {
        match lock(&self.breakers).get(context) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Stats for every breaker created so far, ordered by context.
    pub fn breaker_stats(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<CircuitBreakerStats> =
            lock(&self.breakers).values().map(CircuitBreaker::stats).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    pub fn error_stats(&self) -> Vec<ErrorRecord> {
        self.errors.snapshot()
    }

    pub fn errors(&self) -> &ErrorTracker {
        &self.errors
    }

    /// Run `operation` under the context's policy and breaker.
    ///
    /// The operation is invoked once per attempt. The last error is returned
    /// unchanged once retries are exhausted or the error is not retryable.
    pub async fn execute_with_retry<F, Fut, T>(
        &self,
        mut operation: F,
        context: &str,
        overrides: Option<&RetryOverrides>,
    ) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let stored = self.policy_for(context);
        let policy = match overrides {
            Some(overrides) => stored.merged(overrides),
            None => stored,
        };
        let breaker = self.breaker(context);

        let mut attempt: u32 = 0;
        loop {
            let error = match breaker.call(&mut operation).await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(context = %context, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let kind = classify(&error);
            self.errors.record(context, kind, &error);

            if !policy.is_retryable(kind) {
                tracing::debug!(
                    context = %context,
                    attempt,
                    kind = %kind,
                    error = %error,
                    "Not retrying"
                );
                return Err(error);
            }
            if attempt >= policy.max_retries {
                tracing::warn!(
                    context = %context,
                    attempts = attempt + 1,
                    kind = %kind,
                    error = %error,
                    "Retries exhausted"
                );
                return Err(error);
            }

            let delay = policy.delay_for_attempt(attempt, kind, error.retry_after());
            tracing::warn!(
                context = %context,
                attempt = attempt + 1,
                max_retries = policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                kind = %kind,
                error = %error,
                "Attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
