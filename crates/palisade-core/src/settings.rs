//! File and environment configuration for the control plane.
//!
//! A settings document is JSON with camelCase keys and durations in
//! milliseconds. Every field is optional; anything left out takes the
//! built-in default. Environment variables (`PALISADE_*`) override file
//! values.
//!
//! ```json
//! {
//!   "rateLimit": { "requestsPerSecond": 0.5, "burstLimit": 2, "proxies": ["http://10.0.0.2:3128"] },
//!   "retry": { "maxRetries": 5, "retryableKinds": ["network_failure", "rate_limited"] },
//!   "circuitBreaker": { "failureThreshold": 3, "recoveryTimeout": 120000 }
//! }
//! ```

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::classify::ErrorKind;
use crate::error::AppError;
use crate::rate_limiter::RateLimiterConfig;
use crate::request_queue::RequestQueueConfig;
use crate::retry::RetryPolicy;
use crate::rotation::{ProxyRotator, SelectionStrategy};
use crate::token_bucket::TokenBucketConfig;

/// Separator for `PALISADE_IDENTITIES`. Browser signatures contain commas.
const IDENTITY_SEPARATOR: char = '|';

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RateLimitSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_per_second: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub burst_limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_delay: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delay: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_period: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_queue_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_pause: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxies: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_failure_threshold: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RetrySettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_delay: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delay: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable_kinds: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CircuitBreakerSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_timeout: Option<u64>,
}

fn millis(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_millis).unwrap_or(default)
}

fn as_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn check_factor(name: &str, value: f64) -> Result<(), AppError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(AppError::ConfigError(format!(
            "{name} must be within [0, 1], got {value}"
        )));
    }
    Ok(())
}

fn check_proxy(raw: &str) -> Result<(), AppError> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| AppError::ConfigError(format!("Invalid proxy URL '{raw}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" | "socks5" | "socks5h" => Ok(()),
        other => Err(AppError::ConfigError(format!(
            "Unsupported proxy scheme '{other}' in '{raw}'"
        ))),
    }
}

/// Read and parse `key` through `lookup`. Unset or blank variables yield `None`.
fn env_value<T, L>(lookup: &L, key: &str) -> Result<Option<T>, AppError>
where
    T: FromStr,
    L: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            AppError::ConfigError(format!("Invalid {key} '{raw}': could not parse value"))
        }),
    }
}

fn env_list<L>(lookup: &L, key: &str, separator: char) -> Option<Vec<String>>
where
    L: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    let items: Vec<String> = raw
        .split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    (!items.is_empty()).then_some(items)
}

macro_rules! override_from_env {
    ($lookup:expr, $($field:expr => $key:literal),+ $(,)?) => {
        $(
            if let Some(value) = env_value($lookup, $key)? {
                $field = Some(value);
            }
        )+
    };
}

impl Settings {
    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        serde_json::from_str(raw)
            .map_err(|e| AppError::ConfigError(format!("Invalid settings document: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("Cannot read settings file {}: {e}", path.display()))
        })?;
        let settings = Self::from_json(&raw)?;
        tracing::debug!(path = %path.display(), "Loaded settings file");
        Ok(settings)
    }

    /// Override fields from `PALISADE_*` environment variables.
    ///
    /// - `PALISADE_REQUESTS_PER_SECOND`, `PALISADE_BURST_LIMIT`
    /// - `PALISADE_MIN_DELAY_MS`, `PALISADE_MAX_DELAY_MS`, `PALISADE_JITTER_FACTOR`
    /// - `PALISADE_COOLDOWN_MS`, `PALISADE_MAX_QUEUE_SIZE`, `PALISADE_QUEUE_PAUSE_MS`
    /// - `PALISADE_IDENTITIES` (`|`-separated), `PALISADE_IDENTITY_STRATEGY`
    /// - `PALISADE_PROXIES` (comma-separated), `PALISADE_PROXY_FAILURE_THRESHOLD`
    /// - `PALISADE_MAX_RETRIES`, `PALISADE_RETRY_BASE_DELAY_MS`, `PALISADE_RETRY_MAX_DELAY_MS`
    /// - `PALISADE_BACKOFF_FACTOR`, `PALISADE_RETRY_JITTER_FACTOR`
    /// - `PALISADE_FAILURE_THRESHOLD`, `PALISADE_SUCCESS_THRESHOLD`, `PALISADE_RECOVERY_TIMEOUT_MS`
    pub fn apply_env(&mut self) -> Result<(), AppError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from<L>(&mut self, lookup: L) -> Result<(), AppError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let rl = &mut self.rate_limit;
        override_from_env!(&lookup,
            rl.requests_per_second => "PALISADE_REQUESTS_PER_SECOND",
            rl.burst_limit => "PALISADE_BURST_LIMIT",
            rl.min_delay => "PALISADE_MIN_DELAY_MS",
            rl.max_delay => "PALISADE_MAX_DELAY_MS",
            rl.jitter_factor => "PALISADE_JITTER_FACTOR",
            rl.cooldown_period => "PALISADE_COOLDOWN_MS",
            rl.max_queue_size => "PALISADE_MAX_QUEUE_SIZE",
            rl.queue_pause => "PALISADE_QUEUE_PAUSE_MS",
            rl.identity_strategy => "PALISADE_IDENTITY_STRATEGY",
            rl.proxy_failure_threshold => "PALISADE_PROXY_FAILURE_THRESHOLD",
        );
        if let Some(identities) = env_list(&lookup, "PALISADE_IDENTITIES", IDENTITY_SEPARATOR) {
            rl.identities = Some(identities);
        }
        if let Some(proxies) = env_list(&lookup, "PALISADE_PROXIES", ',') {
            rl.proxies = Some(proxies);
        }

        let retry = &mut self.retry;
        override_from_env!(&lookup,
            retry.max_retries => "PALISADE_MAX_RETRIES",
            retry.base_delay => "PALISADE_RETRY_BASE_DELAY_MS",
            retry.max_delay => "PALISADE_RETRY_MAX_DELAY_MS",
            retry.backoff_factor => "PALISADE_BACKOFF_FACTOR",
            retry.jitter_factor => "PALISADE_RETRY_JITTER_FACTOR",
        );

        let cb = &mut self.circuit_breaker;
        override_from_env!(&lookup,
            cb.failure_threshold => "PALISADE_FAILURE_THRESHOLD",
            cb.success_threshold => "PALISADE_SUCCESS_THRESHOLD",
            cb.recovery_timeout => "PALISADE_RECOVERY_TIMEOUT_MS",
        );
        Ok(())
    }

    /// Check every section by converting it.
    pub fn validate(&self) -> Result<(), AppError> {
        self.rate_limiter_config()?;
        self.retry_policy()?;
        self.circuit_breaker_config()?;
        Ok(())
    }

    pub fn rate_limiter_config(&self) -> Result<RateLimiterConfig, AppError> {
        let s = &self.rate_limit;
        let defaults = RateLimiterConfig::default();

        let requests_per_second = s.requests_per_second.unwrap_or(defaults.requests_per_second);
        let burst_limit = s.burst_limit.unwrap_or(defaults.burst_limit);
        TokenBucketConfig::new(burst_limit, requests_per_second).validate()?;

        let min_delay = millis(s.min_delay, defaults.min_delay);
        let max_delay = millis(s.max_delay, defaults.max_delay);
        if min_delay > max_delay {
            return Err(AppError::ConfigError(format!(
                "minDelay ({} ms) exceeds maxDelay ({} ms)",
                as_millis(min_delay),
                as_millis(max_delay)
            )));
        }

        let jitter_factor = s.jitter_factor.unwrap_or(defaults.jitter_factor);
        check_factor("rateLimit.jitterFactor", jitter_factor)?;

        let max_size = s.max_queue_size.unwrap_or(defaults.queue.max_size);
        if max_size == 0 {
            return Err(AppError::ConfigError(
                "maxQueueSize must be at least 1".into(),
            ));
        }
        let queue = RequestQueueConfig::new(max_size)
            .with_pause(millis(s.queue_pause, defaults.queue.pause));

        let identity_strategy = match &s.identity_strategy {
            Some(raw) => raw.parse::<SelectionStrategy>()?,
            None => defaults.identity_strategy,
        };
        let identities = match &s.identities {
            Some(list) if list.is_empty() => {
                return Err(AppError::ConfigError(
                    "identities must not be empty when given".into(),
                ));
            }
            Some(list) => list.clone(),
            None => defaults.identities,
        };

        let proxies = s.proxies.clone().unwrap_or_default();
        for proxy in &proxies {
            check_proxy(proxy)?;
        }
        let proxy_failure_threshold = s
            .proxy_failure_threshold
            .unwrap_or(ProxyRotator::DEFAULT_FAILURE_THRESHOLD);
        if proxy_failure_threshold == 0 {
            return Err(AppError::ConfigError(
                "proxyFailureThreshold must be at least 1".into(),
            ));
        }

        Ok(RateLimiterConfig {
            requests_per_second,
            burst_limit,
            min_delay,
            max_delay,
            jitter_factor,
            cooldown_period: millis(s.cooldown_period, defaults.cooldown_period),
            identities,
            identity_strategy,
            proxies,
            proxy_failure_threshold,
            queue,
        })
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, AppError> {
        let s = &self.retry;
        let defaults = RetryPolicy::default();
        let retryable_kinds = match &s.retryable_kinds {
            Some(kinds) => kinds
                .iter()
                .map(|k| k.parse::<ErrorKind>())
                .collect::<Result<_, _>>()?,
            None => defaults.retryable_kinds,
        };
        let policy = RetryPolicy {
            max_retries: s.max_retries.unwrap_or(defaults.max_retries),
            base_delay: millis(s.base_delay, defaults.base_delay),
            max_delay: millis(s.max_delay, defaults.max_delay),
            backoff_factor: s.backoff_factor.unwrap_or(defaults.backoff_factor),
            jitter_factor: s.jitter_factor.unwrap_or(defaults.jitter_factor),
            retryable_kinds,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn circuit_breaker_config(&self) -> Result<CircuitBreakerConfig, AppError> {
        let s = &self.circuit_breaker;
        let defaults = CircuitBreakerConfig::default();
        let config = CircuitBreakerConfig {
            failure_threshold: s.failure_threshold.unwrap_or(defaults.failure_threshold),
            success_threshold: s.success_threshold.unwrap_or(defaults.success_threshold),
            recovery_timeout: millis(s.recovery_timeout, defaults.recovery_timeout),
        };
        config.validate()?;
        Ok(config)
    }

    /// Fully populated settings: every default made explicit.
    pub fn effective(&self) -> Result<Self, AppError> {
        let rl = self.rate_limiter_config()?;
        let retry = self.retry_policy()?;
        let cb = self.circuit_breaker_config()?;

        let mut kinds: Vec<ErrorKind> = retry.retryable_kinds.iter().copied().collect();
        kinds.sort();

        Ok(Self {
            rate_limit: RateLimitSettings {
                requests_per_second: Some(rl.requests_per_second),
                burst_limit: Some(rl.burst_limit),
                min_delay: Some(as_millis(rl.min_delay)),
                max_delay: Some(as_millis(rl.max_delay)),
                jitter_factor: Some(rl.jitter_factor),
                cooldown_period: Some(as_millis(rl.cooldown_period)),
                max_queue_size: Some(rl.queue.max_size),
                queue_pause: Some(as_millis(rl.queue.pause)),
                identities: Some(rl.identities),
                identity_strategy: Some(rl.identity_strategy.to_string()),
                proxies: Some(rl.proxies),
                proxy_failure_threshold: Some(rl.proxy_failure_threshold),
            },
            retry: RetrySettings {
                max_retries: Some(retry.max_retries),
                base_delay: Some(as_millis(retry.base_delay)),
                max_delay: Some(as_millis(retry.max_delay)),
                backoff_factor: Some(retry.backoff_factor),
                jitter_factor: Some(retry.jitter_factor),
                retryable_kinds: Some(kinds.iter().map(|k| k.to_string()).collect()),
            },
            circuit_breaker: CircuitBreakerSettings {
                failure_threshold: Some(cb.failure_threshold),
                success_threshold: Some(cb.success_threshold),
                recovery_timeout: Some(as_millis(cb.recovery_timeout)),
            },
        })
    }
}
