//! Composite admission gate for outbound requests.
//!
//! Every operation passing through a [`RateLimiter`] waits out any active
//! cooldown, takes a token from the bucket, and respects a minimum spacing
//! from the previous request that widens with consecutive failures. It is
//! then dispatched with a rotated identity (and proxy, when configured).
//!
//! A rate-limit failure cools down the *whole* limiter, not only the
//! identity or route that triggered it.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use palisade_core::rate_limiter::{CallOptions, RateLimiter, RateLimiterConfig};
//!
//! # async fn run() -> Result<(), palisade_core::AppError> {
//! let limiter = RateLimiter::new(
//!     RateLimiterConfig::default().with_delays(Duration::from_millis(500), Duration::from_secs(3)),
//! )?;
//! let body = limiter
//!     .execute(
//!         |opts| async move { Ok(format!("fetched as {}", opts.identity)) },
//!         CallOptions::default(),
//!     )
//!     .await?;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::backoff;
use crate::classify::{ErrorKind, classify, classify_via_proxy};
use crate::error::AppError;
use crate::request_queue::{QueueHandle, RequestQueue, RequestQueueConfig};
use crate::rotation::{DEFAULT_IDENTITIES, IdentityRotator, ProxyRotator, SelectionStrategy};
use crate::token_bucket::{TokenBucket, TokenBucketConfig};

/// Growth factor applied to the inter-request delay per consecutive failure.
const FAILURE_BACKOFF_BASE: f64 = 1.5;

/// Headers sent with every dispatched request unless the caller overrides them.
pub fn baseline_headers() -> BTreeMap<String, String> {
    [
        (
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,application/json;q=0.8,*/*;q=0.7",
        ),
        ("Accept-Language", "en-US,en;q=0.9"),
        ("Cache-Control", "no-cache"),
        ("Connection", "keep-alive"),
        ("Upgrade-Insecure-Requests", "1"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Caller-side options for one request.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Queue priority; higher runs first. Only used by [`RateLimiter::queue_request`].
    pub priority: i32,
    /// Extra headers, applied over the baseline set.
    pub headers: BTreeMap<String, String>,
    /// Opaque caller values passed through to the operation.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CallOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Options handed to an operation at dispatch time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnhancedOptions {
    pub identity: String,
    pub proxy: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Configuration for a [`RateLimiter`].
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    pub requests_per_second: f64,
    pub burst_limit: u32,
    /// Spacing between requests with no recent failures.
    pub min_delay: Duration,
    /// Upper bound for the failure-scaled spacing.
    pub max_delay: Duration,
    /// Spacing is perturbed within `±jitter_factor` of its value.
    pub jitter_factor: f64,
    /// Cooldown entered on a rate-limit failure without a longer server hint.
    pub cooldown_period: Duration,
    pub identities: Vec<String>,
    pub identity_strategy: SelectionStrategy,
    pub proxies: Vec<String>,
    pub proxy_failure_threshold: u32,
    pub queue: RequestQueueConfig,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 1.5,
            burst_limit: 5,
            min_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
            jitter_factor: 0.3,
            cooldown_period: Duration::from_secs(60),
            identities: DEFAULT_IDENTITIES.iter().map(|s| s.to_string()).collect(),
            identity_strategy: SelectionStrategy::RoundRobin,
            proxies: Vec::new(),
            proxy_failure_threshold: ProxyRotator::DEFAULT_FAILURE_THRESHOLD,
            queue: RequestQueueConfig::default(),
        }
    }
}

impl RateLimiterConfig {
    pub fn with_rate(mut self, requests_per_second: f64, burst_limit: u32) -> Self {
        self.requests_per_second = requests_per_second;
        self.burst_limit = burst_limit;
        self
    }

    pub fn with_delays(mut self, min_delay: Duration, max_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_period = cooldown;
        self
    }

    pub fn with_identities(mut self, identities: Vec<String>, strategy: SelectionStrategy) -> Self {
        self.identities = identities;
        self.identity_strategy = strategy;
        self
    }

    pub fn with_proxies(mut self, proxies: Vec<String>) -> Self {
        self.proxies = proxies;
        self
    }

    pub fn with_queue(mut self, queue: RequestQueueConfig) -> Self {
        self.queue = queue;
        self
    }

    fn bucket_config(&self) -> TokenBucketConfig {
        TokenBucketConfig::new(self.burst_limit, self.requests_per_second)
    }
}

struct LimiterState {
    bucket: TokenBucket,
    identities: IdentityRotator,
    proxies: Option<ProxyRotator>,
    consecutive_failures: u32,
    blocked_until: Option<Instant>,
    last_request: Option<Instant>,
}

/// Snapshot of limiter state for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub available_tokens: u32,
    pub capacity: u32,
    pub consecutive_failures: u32,
    pub cooldown_remaining: Duration,
    pub queued: usize,
    pub identity_usage: Vec<(String, u64)>,
    pub proxy_failures: Vec<(String, u32)>,
}

/// Token bucket + identity/proxy rotation + request queue. Clones share state.
#[derive(Clone)]
pub struct RateLimiter {
    config: Arc<RateLimiterConfig>,
    state: Arc<Mutex<LimiterState>>,
    queue: RequestQueue,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Result<Self, AppError> {
        if config.min_delay > config.max_delay {
            return Err(AppError::ConfigError(format!(
                "min delay ({} ms) exceeds max delay ({} ms)",
                config.min_delay.as_millis(),
                config.max_delay.as_millis()
            )));
        }
        if config.queue.max_size == 0 {
            return Err(AppError::ConfigError(
                "request queue size must be at least 1".into(),
            ));
        }

        let bucket = TokenBucket::new(&config.bucket_config())?;
        let identities =
            IdentityRotator::new(config.identities.clone(), config.identity_strategy)?;
        let proxies = if config.proxies.is_empty() {
            None
        } else {
            Some(ProxyRotator::new(
                config.proxies.clone(),
                config.proxy_failure_threshold,
            )?)
        };

        let queue = RequestQueue::new(config.queue.clone());
        Ok(Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(LimiterState {
                bucket,
                identities,
                proxies,
                consecutive_failures: 0,
                blocked_until: None,
                last_request: None,
            })),
            queue,
        })
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    fn lock_state(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned rate limiter mutex");
            poisoned.into_inner()
        })
    }

    /// Spacing required after `failures` consecutive failures, before jitter.
    fn spacing(&self, failures: u32) -> Duration {
        backoff::exponential(
            self.config.min_delay,
            FAILURE_BACKOFF_BASE,
            failures,
            self.config.max_delay,
        )
    }

    /// Wait until a request may go out: cooldown, then a token, then spacing.
    ///
    /// The cooldown is re-checked after every sleep, so a rate limit hit by
    /// a concurrent request also holds back callers already part way through
    /// admission. A token taken before such a cooldown is kept.
    pub async fn admit(&self) {
        let mut holds_token = false;
        let mut slot: Option<Instant> = None;

        loop {
            let (wait, stage) = {
                let mut state = self.lock_state();
                let now = Instant::now();
                match state.blocked_until {
                    Some(until) if now < until => {
                        // The reserved slot fell inside the cooldown.
                        slot = None;
                        (until - now, "cooldown")
                    }
                    _ => {
                        state.blocked_until = None;
                        if !holds_token {
                            holds_token = state.bucket.consume(1);
                        }

                        if !holds_token {
                            let wait = state.bucket.time_until_next_token();
                            (wait.max(Duration::from_millis(1)), "token")
                        } else if let Some(at) = slot {
                            if now >= at {
                                return;
                            }
                            (at - now, "spacing")
                        } else {
                            let delay = backoff::apply_jitter(
                                self.spacing(state.consecutive_failures),
                                self.config.jitter_factor,
                            );
                            let wait = state
                                .last_request
                                .map(|last| delay.saturating_sub(now.saturating_duration_since(last)))
                                .unwrap_or(Duration::ZERO);
                            // Reserve the slot so concurrent callers space out behind this one.
                            let at = now + wait;
                            state.last_request = Some(at);
                            if wait.is_zero() {
                                return;
                            }
                            slot = Some(at);
                            (wait, "spacing")
                        }
                    }
                }
            };
            tracing::debug!(sleep_ms = wait.as_millis() as u64, stage, "Waiting for admission");
            tokio::time::sleep(wait).await;
        }
    }

    /// Build fresh dispatch options from rotation and the baseline headers.
    fn enhance(&self, options: CallOptions) -> EnhancedOptions {
        let (identity, proxy) = {
            let mut state = self.lock_state();
            let identity = state.identities.select();
            let proxy = state.proxies.as_mut().map(ProxyRotator::get_proxy);
            (identity, proxy)
        };

        let mut headers = baseline_headers();
        headers.insert("User-Agent".to_string(), identity.clone());
        headers.extend(options.headers);

        EnhancedOptions {
            identity,
            proxy,
            headers,
            extra: options.extra,
        }
    }

    /// Admit, dispatch and observe one operation.
    ///
    /// The operation's own error is always returned after bookkeeping.
    pub async fn execute<F, Fut, T>(&self, operation: F, options: CallOptions) -> Result<T, AppError>
    where
        F: FnOnce(EnhancedOptions) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        self.admit().await;

        let enhanced = self.enhance(options);
        let proxy = enhanced.proxy.clone();
        tracing::debug!(
            identity = %enhanced.identity,
            proxy = ?proxy,
            "Dispatching request"
        );

        let result = operation(enhanced).await;
        match &result {
            Ok(_) => self.record_success(),
            Err(e) => self.record_failure(e, proxy.as_deref()),
        }
        result
    }

    /// Queue an operation to be executed through this limiter.
    pub fn queue_request<F, Fut, T>(
        &self,
        operation: F,
        options: CallOptions,
    ) -> Result<QueueHandle<T>, AppError>
    where
        F: FnOnce(EnhancedOptions) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, AppError>> + Send + 'static,
        T: Send + 'static,
    {
        let limiter = self.clone();
        let priority = options.priority;
        self.queue.enqueue(
            move || async move { limiter.execute(operation, options).await },
            priority,
        )
    }

    pub fn record_success(&self) {
        let mut state = self.lock_state();
        if state.consecutive_failures > 0 {
            tracing::debug!(
                previous_failures = state.consecutive_failures,
                "Request succeeded, resetting failure streak"
            );
        }
        state.consecutive_failures = 0;
    }

    /// Update failure bookkeeping for an error raised by a request sent via `proxy`.
    pub fn record_failure(&self, error: &AppError, proxy: Option<&str>) {
        let kind = match proxy {
            Some(_) => classify_via_proxy(error),
            None => classify(error),
        };

        let mut state = self.lock_state();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        match kind {
            ErrorKind::RateLimited => {
                let cooldown = self
                    .config
                    .cooldown_period
                    .max(backoff::server_hint(error.retry_after()));
                let now = Instant::now();
                let until = now
                    .checked_add(cooldown)
                    .or_else(|| now.checked_add(backoff::MAX_SERVER_HINT))
                    .unwrap_or(now);
                state.blocked_until = Some(state.blocked_until.map_or(until, |b| b.max(until)));
                tracing::warn!(
                    cooldown_ms = cooldown.as_millis() as u64,
                    failures = state.consecutive_failures,
                    error = %error,
                    "Rate limited, cooling down all requests"
                );
            }
            ErrorKind::ProxyFailure => {
                if let (Some(proxy), Some(rotator)) = (proxy, state.proxies.as_mut()) {
                    let failures = rotator.record_failure(proxy);
                    tracing::debug!(proxy = %proxy, ?failures, error = %error, "Proxy failure recorded");
                }
            }
            ErrorKind::NetworkFailure | ErrorKind::NonRetryable => {
                tracing::debug!(
                    kind = %kind,
                    failures = state.consecutive_failures,
                    error = %error,
                    "Request failed"
                );
            }
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock_state().consecutive_failures
    }

    pub fn cooldown_remaining(&self) -> Duration {
        self.lock_state()
            .blocked_until
            .map(|until| until.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// Reject everything still waiting in the queue.
    pub fn clear_queue(&self) -> usize {
        self.queue.clear()
    }

    pub fn stats(&self) -> RateLimiterStats {
        let queued = self.queue.len();
        let mut state = self.lock_state();
        let now = Instant::now();
        RateLimiterStats {
            available_tokens: state.bucket.available_at(now),
            capacity: state.bucket.capacity(),
            consecutive_failures: state.consecutive_failures,
            cooldown_remaining: state
                .blocked_until
                .map(|until| until.saturating_duration_since(now))
                .unwrap_or(Duration::ZERO),
            queued,
            identity_usage: state.identities.usage(),
            proxy_failures: state
                .proxies
                .as_ref()
                .map(ProxyRotator::failures)
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn fast_config() -> RateLimiterConfig {
        RateLimiterConfig::default()
            .with_rate(1000.0, 100)
            .with_delays(Duration::ZERO, Duration::from_secs(5))
            .with_jitter(0.0)
    }

    fn identities(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_attaches_identity_and_headers() {
        let limiter = RateLimiter::new(fast_config().with_identities(
            identities(&["agent-a", "agent-b"]),
            SelectionStrategy::RoundRobin,
        ))
        .unwrap();

        let opts = limiter
            .execute(
                |opts| async move { Ok(opts) },
                CallOptions::default()
                    .with_header("Accept-Language", "de-DE")
                    .with_extra("page", serde_json::json!(3)),
            )
            .await
            .unwrap();

        assert_eq!(opts.identity, "agent-a");
        assert_eq!(opts.proxy, None);
        assert_eq!(opts.headers["User-Agent"], "agent-a");
        assert_eq!(opts.headers["Accept-Language"], "de-DE");
        assert_eq!(opts.headers["Connection"], "keep-alive");
        assert_eq!(opts.extra["page"], serde_json::json!(3));

        let second = limiter
            .execute(|opts| async move { Ok(opts.identity) }, CallOptions::default())
            .await
            .unwrap();
        assert_eq!(second, "agent-b");
    }

    #[tokio::test(start_paused = true)]
    async fn burst_then_wait_for_tokens() {
        let limiter = RateLimiter::new(fast_config().with_rate(1.0, 2)).unwrap();
        let start = Instant::now();

        for _ in 0..2 {
            limiter
                .execute(|_| async { Ok(()) }, CallOptions::default())
                .await
                .unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(10));

        limiter
            .execute(|_| async { Ok(()) }, CallOptions::default())
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn spacing_between_requests() {
        let limiter = RateLimiter::new(
            fast_config().with_delays(Duration::from_millis(100), Duration::from_secs(5)),
        )
        .unwrap();

        limiter
            .execute(|_| async { Ok(()) }, CallOptions::default())
            .await
            .unwrap();
        let after_first = Instant::now();
        limiter
            .execute(|_| async { Ok(()) }, CallOptions::default())
            .await
            .unwrap();
        assert!(after_first.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_widen_spacing_and_success_resets() {
        let limiter = RateLimiter::new(
            fast_config().with_delays(Duration::from_millis(100), Duration::from_secs(5)),
        )
        .unwrap();

        for _ in 0..2 {
            let result = limiter
                .execute(
                    |_| async { Err::<(), _>(AppError::operation("bad markup")) },
                    CallOptions::default(),
                )
                .await;
            assert!(matches!(result, Err(AppError::Operation { .. })));
        }
        assert_eq!(limiter.consecutive_failures(), 2);

        let before = Instant::now();
        limiter
            .execute(|_| async { Ok(()) }, CallOptions::default())
            .await
            .unwrap();
        assert!(before.elapsed() >= Duration::from_millis(225));
        assert_eq!(limiter.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_enters_global_cooldown() {
        let limiter =
            RateLimiter::new(fast_config().with_cooldown(Duration::from_secs(1))).unwrap();

        let result = limiter
            .execute(
                |_| async {
                    Err::<(), _>(AppError::RateLimitExceeded {
                        retry_after: Some(Duration::from_secs(3)),
                    })
                },
                CallOptions::default(),
            )
            .await;
        assert!(matches!(result, Err(AppError::RateLimitExceeded { .. })));
        assert_eq!(limiter.cooldown_remaining(), Duration::from_secs(3));

        let before = Instant::now();
        limiter
            .execute(|_| async { Ok(()) }, CallOptions::default())
            .await
            .unwrap();
        assert!(before.elapsed() >= Duration::from_secs(3));
        assert_eq!(limiter.cooldown_remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn configured_cooldown_wins_over_short_hint() {
        let limiter =
            RateLimiter::new(fast_config().with_cooldown(Duration::from_secs(10))).unwrap();
        limiter.record_failure(
            &AppError::RateLimitExceeded {
                retry_after: Some(Duration::from_secs(2)),
            },
            None,
        );
        assert_eq!(limiter.cooldown_remaining(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_server_hint_is_clamped() {
        let limiter = RateLimiter::new(fast_config()).unwrap();
        limiter.record_failure(
            &AppError::RateLimitExceeded {
                retry_after: Some(Duration::from_secs(u64::MAX)),
            },
            None,
        );
        assert_eq!(limiter.cooldown_remaining(), backoff::MAX_SERVER_HINT);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_holds_back_requests_already_admitting() {
        let limiter = RateLimiter::new(
            fast_config()
                .with_delays(Duration::from_millis(100), Duration::from_secs(5))
                .with_cooldown(Duration::from_secs(60)),
        )
        .unwrap();
        let start = Instant::now();

        // The second request is spaced 100ms behind the first, which hits a
        // rate limit at 50ms while the second is still waiting.
        let first = limiter.execute(
            |_| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Err::<(), _>(AppError::RateLimitExceeded { retry_after: None })
            },
            CallOptions::default(),
        );
        let second = limiter.execute(|_| async { Ok(Instant::now()) }, CallOptions::default());
        let (first, second) = tokio::join!(first, second);

        assert!(matches!(first, Err(AppError::RateLimitExceeded { .. })));
        let dispatched = second.unwrap();
        assert!(
            dispatched >= start + Duration::from_millis(60_050),
            "dispatched after {:?}",
            dispatched - start
        );
    }

    #[tokio::test(start_paused = true)]
    async fn proxy_failures_are_counted_against_the_route() {
        let limiter = RateLimiter::new(
            fast_config().with_proxies(identities(&["http://p1:8080", "http://p2:8080"])),
        )
        .unwrap();

        let result = limiter
            .execute(
                |opts| async move {
                    Err::<(), _>(AppError::network(
                        "ECONNREFUSED",
                        format!("refused via {:?}", opts.proxy),
                    ))
                },
                CallOptions::default(),
            )
            .await;
        assert!(result.is_err());

        let stats = limiter.stats();
        assert_eq!(
            stats.proxy_failures,
            vec![
                ("http://p1:8080".to_string(), 1),
                ("http://p2:8080".to_string(), 0)
            ]
        );

        let next = limiter
            .execute(|opts| async move { Ok(opts.proxy) }, CallOptions::default())
            .await
            .unwrap();
        assert_eq!(next.as_deref(), Some("http://p2:8080"));
    }

    #[tokio::test(start_paused = true)]
    async fn queued_requests_run_through_the_limiter() {
        let limiter = RateLimiter::new(fast_config()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..3)
            .map(|i| {
                let calls = Arc::clone(&calls);
                limiter
                    .queue_request(
                        move |opts| async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok((i, opts.identity))
                        },
                        CallOptions::default().with_priority(i),
                    )
                    .unwrap()
            })
            .collect();

        for handle in handles {
            let (_, identity) = handle.await.unwrap();
            assert!(!identity.is_empty());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_capacity_is_enforced() {
        let limiter = RateLimiter::new(fast_config().with_queue(RequestQueueConfig::new(1))).unwrap();
        let first = limiter
            .queue_request(|_| async { Ok(1) }, CallOptions::default())
            .unwrap();
        let second = limiter.queue_request(|_| async { Ok(2) }, CallOptions::default());
        assert!(matches!(second, Err(AppError::QueueFull { .. })));
        assert_eq!(first.await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_queue_rejects_pending() {
        let limiter = RateLimiter::new(fast_config()).unwrap();
        let handle = limiter
            .queue_request(|_| async { Ok(()) }, CallOptions::default())
            .unwrap();
        assert_eq!(limiter.clear_queue(), 1);
        assert!(matches!(handle.await, Err(AppError::QueueCleared)));
    }

    #[test]
    fn rejects_inverted_delays() {
        let config = RateLimiterConfig::default()
            .with_delays(Duration::from_secs(5), Duration::from_secs(1));
        assert!(matches!(
            RateLimiter::new(config),
            Err(AppError::ConfigError(_))
        ));
    }

    #[test]
    fn spacing_is_capped() {
        let limiter = RateLimiter::new(
            RateLimiterConfig::default()
                .with_delays(Duration::from_millis(1000), Duration::from_millis(5000)),
        )
        .unwrap();
        assert_eq!(limiter.spacing(0), Duration::from_millis(1000));
        assert_eq!(limiter.spacing(1), Duration::from_millis(1500));
        assert_eq!(limiter.spacing(10), Duration::from_millis(5000));
    }
}
