//! Circuit breaker for failure isolation.
//!
//! Stops invoking an operation class that keeps failing until a recovery
//! window has passed.
//!
//! # Circuit States
//!
//! ```text
//! CLOSED (healthy) --[N failures]--> OPEN (rejecting) --[timeout + call]--> HALF_OPEN (probing)
//!                                                                               |
//!                                        <--[failure]--                         |
//!                                                                               |
//! CLOSED <---------------------------[M successes]------------------------------+
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::error::AppError;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed - requests flow normally.
    Closed,
    /// Circuit is open - requests are rejected immediately.
    Open,
    /// Circuit is half-open - requests probe whether the dependency recovered.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u32,

    /// Number of successful requests in half-open state to close the circuit.
    pub success_threshold: u32,

    /// Time to wait before an open circuit lets a probe through.
    pub recovery_timeout: Duration,
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.failure_threshold == 0 || self.success_threshold == 0 {
            return Err(AppError::ConfigError(
                "circuit breaker thresholds must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// Internal state tracking for the circuit breaker.
#[derive(Debug)]
struct CircuitBreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    next_attempt_time: Option<Instant>,
    last_error_message: Option<String>,
}

impl CircuitBreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            next_attempt_time: None,
            last_error_message: None,
        }
    }
}

/// Statistics about circuit breaker state for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_error: Option<String>,
    pub time_until_half_open: Option<Duration>,
}

/// Thread-safe circuit breaker. Clones share state.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<CircuitBreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Arc::new(Mutex::new(CircuitBreakerInner::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Acquires the inner mutex lock, recovering from poison if necessary.
    fn lock_inner(&self) -> std::sync::MutexGuard<'_, CircuitBreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(circuit = %self.name, "Recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }

    /// Current state. Observing never moves an open circuit to half-open.
    pub fn state(&self) -> CircuitState {
        self.lock_inner().state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.lock_inner();
        let time_until_half_open = match (inner.state, inner.next_attempt_time) {
            (CircuitState::Open, Some(next)) => {
                Some(next.saturating_duration_since(Instant::now()))
            }
            _ => None,
        };

        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_error: inner.last_error_message.clone(),
            time_until_half_open,
        }
    }

    /// Executes the given operation through the circuit breaker.
    ///
    /// - Closed: executes operation, tracks success/failure
    /// - Open: returns [`AppError::CircuitOpen`] without calling the operation,
    ///   unless the recovery timeout has elapsed, in which case the circuit
    ///   turns half-open and this call becomes the probe
    /// - HalfOpen: executes operation, transitions based on result
    pub async fn call<F, T, Fut>(&self, operation: F) -> Result<T, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        self.try_acquire()?;

        let result = operation().await;

        match &result {
            Ok(_) => self.record_success(),
            Err(e) => self.record_failure(e),
        }

        result
    }

    /// Decide whether a call may proceed, moving Open to HalfOpen when due.
    fn try_acquire(&self) -> Result<(), AppError> {
        let mut inner = self.lock_inner();
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let now = Instant::now();
        match inner.next_attempt_time {
            Some(next) if now < next => Err(AppError::CircuitOpen {
                name: self.name.clone(),
                retry_after: next - now,
            }),
            _ => {
                tracing::info!(
                    circuit = %self.name,
                    "Circuit breaker transitioning to half-open state"
                );
                inner.state = CircuitState::HalfOpen;
                inner.success_count = 0;
                inner.next_attempt_time = None;
                Ok(())
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock_inner();

        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    tracing::info!(
                        circuit = %self.name,
                        "Circuit breaker closing after {} successful probes",
                        inner.success_count
                    );
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.last_error_message = None;
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, error: &AppError) {
        let mut inner = self.lock_inner();
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                inner.last_failure_time = Some(now);
                inner.last_error_message = Some(error.to_string());

                if inner.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        circuit = %self.name,
                        failures = inner.failure_count,
                        error = %error,
                        recovery_timeout_ms = self.config.recovery_timeout.as_millis() as u64,
                        "Circuit breaker opening after {} consecutive failures",
                        inner.failure_count
                    );
                    inner.state = CircuitState::Open;
                    inner.next_attempt_time = Some(now + self.config.recovery_timeout);
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(
                    circuit = %self.name,
                    error = %error,
                    "Circuit breaker probe failed, returning to open state"
                );
                inner.state = CircuitState::Open;
                inner.last_failure_time = Some(now);
                inner.next_attempt_time = Some(now + self.config.recovery_timeout);
                inner.last_error_message = Some(error.to_string());
                inner.success_count = 0;
            }
            CircuitState::Open => {
                inner.last_error_message = Some(error.to_string());
            }
        }
    }

    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        tracing::info!(circuit = %self.name, "Circuit breaker manually reset");
        *inner = CircuitBreakerInner::new();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn network_error() -> AppError {
        AppError::network("ECONNRESET", "test")
    }

    #[test]
    fn test_circuit_starts_closed() {
        let cb = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_opens_after_threshold_failures() {
        let config = CircuitBreakerConfig::default().with_failure_threshold(3);
        let cb = CircuitBreaker::new("test", config);

        for _ in 0..3 {
            cb.record_failure(&network_error());
        }

        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_circuit_stays_closed_below_threshold() {
        let cb = CircuitBreaker::new("test", CircuitBreakerConfig::default());

        for _ in 0..4 {
            cb.record_failure(&network_error());
        }

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failure_count, 4);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::new("test", CircuitBreakerConfig::default());

        for _ in 0..4 {
            cb.record_failure(&network_error());
        }

        cb.record_success();

        for _ in 0..4 {
            cb.record_failure(&network_error());
        }

        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_manual_reset() {
        let config = CircuitBreakerConfig::default().with_failure_threshold(1);
        let cb = CircuitBreaker::new("test", config);

        cb.record_failure(&network_error());
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.success_count, 0);
        assert!(stats.last_error.is_none());
    }

    #[test]
    fn test_rejects_zero_thresholds() {
        assert!(
            CircuitBreakerConfig::default()
                .with_failure_threshold(0)
                .validate()
                .is_err()
        );
        assert!(CircuitBreakerConfig::default().validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_returns_open_error_without_invoking() {
        let config = CircuitBreakerConfig::default()
            .with_failure_threshold(1)
            .with_recovery_timeout(Duration::from_secs(60));
        let cb = CircuitBreaker::new("test", config);
        cb.record_failure(&network_error());

        let invoked = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&invoked);
        let result = cb
            .call(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AppError>("should not execute")
            })
            .await;

        match result {
            Err(AppError::CircuitOpen { name, retry_after }) => {
                assert_eq!(name, "test");
                assert_eq!(retry_after, Duration::from_secs(60));
            }
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_call_executes_when_closed() {
        let cb = CircuitBreaker::new("test", CircuitBreakerConfig::default());

        let result = cb
            .call(|| async { Ok::<_, AppError>("success".to_string()) })
            .await;

        assert_eq!(result.unwrap(), "success");
    }

    #[tokio::test]
    async fn test_call_records_failure_and_returns_original_error() {
        let config = CircuitBreakerConfig::default().with_failure_threshold(2);
        let cb = CircuitBreaker::new("test", config);

        let result = cb
            .call(|| async { Err::<String, _>(AppError::operation("fail")) })
            .await;

        assert!(matches!(result, Err(AppError::Operation { .. })));
        assert_eq!(cb.stats().failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_recovery_cycle() {
        let config = CircuitBreakerConfig::default()
            .with_failure_threshold(2)
            .with_recovery_timeout(Duration::from_secs(30));
        let cb = CircuitBreaker::new("scores", config);

        for _ in 0..2 {
            let _ = cb
                .call(|| async { Err::<(), _>(network_error()) })
                .await;
        }
        assert_eq!(cb.state(), CircuitState::Open);

        let rejected = cb.call(|| async { Ok::<_, AppError>(()) }).await;
        assert!(matches!(rejected, Err(AppError::CircuitOpen { .. })));

        tokio::time::advance(Duration::from_secs(30)).await;
        // Observation alone does not move the circuit.
        assert_eq!(cb.state(), CircuitState::Open);

        cb.call(|| async { Ok::<_, AppError>(()) }).await.unwrap();
        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::HalfOpen);
        assert_eq!(stats.success_count, 1);

        cb.call(|| async { Ok::<_, AppError>(()) }).await.unwrap();
        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.success_count, 0);
        assert_eq!(stats.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_with_fresh_timeout() {
        let config = CircuitBreakerConfig::default()
            .with_failure_threshold(1)
            .with_recovery_timeout(Duration::from_secs(10));
        let cb = CircuitBreaker::new("test", config);

        cb.record_failure(&network_error());
        tokio::time::advance(Duration::from_secs(10)).await;

        let probe = cb.call(|| async { Err::<(), _>(network_error()) }).await;
        assert!(matches!(probe, Err(AppError::NetworkError { .. })));

        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.success_count, 0);
        assert_eq!(stats.time_until_half_open, Some(Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_after_one_success() {
        let config = CircuitBreakerConfig::default()
            .with_failure_threshold(1)
            .with_recovery_timeout(Duration::from_secs(5));
        let cb = CircuitBreaker::new("test", config);

        cb.record_failure(&network_error());
        tokio::time::advance(Duration::from_secs(5)).await;

        cb.call(|| async { Ok::<_, AppError>(()) }).await.unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let _ = cb.call(|| async { Err::<(), _>(network_error()) }).await;
        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.success_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_error_reports_remaining_time() {
        let config = CircuitBreakerConfig::default()
            .with_failure_threshold(1)
            .with_recovery_timeout(Duration::from_secs(60));
        let cb = CircuitBreaker::new("test", config);
        cb.record_failure(&network_error());

        tokio::time::advance(Duration::from_secs(45)).await;
        match cb.call(|| async { Ok::<_, AppError>(()) }).await {
            Err(AppError::CircuitOpen { retry_after, .. }) => {
                assert_eq!(retry_after, Duration::from_secs(15));
            }
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
    }
}
