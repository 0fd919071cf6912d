//! Error taxonomy shared by the rate limiter and the retry manager.
//!
//! Both layers must agree on what a rate limit or a network blip looks like,
//! so classification lives here and works only on the signals an
//! [`AppError`] exposes (code, status, message, retry-after).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Failure kind, independent of the concrete error variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeouts, resets, refused connections, DNS failures, 502/503/504.
    NetworkFailure,
    /// HTTP 429 or an explicit rate-limit signal.
    RateLimited,
    /// Refused/timed-out connection through a specific egress route.
    ProxyFailure,
    /// Anything else. Never retried unless a policy opts in.
    NonRetryable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NetworkFailure => "network_failure",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ProxyFailure => "proxy_failure",
            ErrorKind::NonRetryable => "non_retryable",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "network_failure" | "network" => Ok(ErrorKind::NetworkFailure),
            "rate_limited" => Ok(ErrorKind::RateLimited),
            "proxy_failure" | "proxy" => Ok(ErrorKind::ProxyFailure),
            "non_retryable" => Ok(ErrorKind::NonRetryable),
            _ => Err(AppError::ConfigError(format!("Unknown error kind: {s}"))),
        }
    }
}

const NETWORK_CODES: &[&str] = &[
    "ECONNRESET",
    "ECONNREFUSED",
    "ETIMEDOUT",
    "ENOTFOUND",
    "EAI_AGAIN",
    "ECONNABORTED",
    "EHOSTUNREACH",
    "ENETUNREACH",
    "EPIPE",
];

const NETWORK_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "connection closed",
    "socket hang up",
    "dns",
    "network",
];

const RATE_LIMIT_CODES: &[&str] = &["RATE_LIMITED", "TOO_MANY_REQUESTS"];

const RATE_LIMIT_PATTERNS: &[&str] = &[
    "rate limit",
    "rate-limit",
    "ratelimit",
    "too many requests",
];

const TRANSIENT_STATUSES: &[u16] = &[502, 503, 504];

/// Codes that, seen through a proxy, point at the route rather than the target.
const ROUTE_CODES: &[&str] = &["ECONNREFUSED", "ETIMEDOUT"];

const ROUTE_PATTERNS: &[&str] = &["connection refused", "timed out", "timeout"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn code_in(code: Option<&str>, codes: &[&str]) -> bool {
    code.is_some_and(|c| codes.iter().any(|k| c.eq_ignore_ascii_case(k)))
}

/// Classify an error by its signals.
pub fn classify(error: &AppError) -> ErrorKind {
    match error {
        AppError::ConfigError(_)
        | AppError::ValidationError(_)
        | AppError::SerializationError(_) => return ErrorKind::NonRetryable,
        e if e.is_rejection() => return ErrorKind::NonRetryable,
        _ => {}
    }

    let signals = error.signals();
    let message = signals.message.to_lowercase();

    if signals.status == Some(429)
        || code_in(signals.code, RATE_LIMIT_CODES)
        || contains_any(&message, RATE_LIMIT_PATTERNS)
    {
        return ErrorKind::RateLimited;
    }

    if matches!(error, AppError::ProxyError { .. }) || message.contains("proxy") {
        return ErrorKind::ProxyFailure;
    }

    if matches!(
        error,
        AppError::NetworkError { .. } | AppError::Timeout(_)
    ) || signals
        .status
        .is_some_and(|s| TRANSIENT_STATUSES.contains(&s))
        || code_in(signals.code, NETWORK_CODES)
        || contains_any(&message, NETWORK_PATTERNS)
    {
        return ErrorKind::NetworkFailure;
    }

    ErrorKind::NonRetryable
}

/// Classify an error raised by a request that went out through a proxy.
///
/// Refused connections and timeouts are blamed on the route.
pub fn classify_via_proxy(error: &AppError) -> ErrorKind {
    let kind = classify(error);
    if kind != ErrorKind::NetworkFailure {
        return kind;
    }
    let message = error.to_string().to_lowercase();
    if matches!(error, AppError::Timeout(_))
        || code_in(error.code(), ROUTE_CODES)
        || contains_any(&message, ROUTE_PATTERNS)
    {
        ErrorKind::ProxyFailure
    } else {
        kind
    }
}

/// Aggregated occurrences of one error kind within one context.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub context: String,
    pub kind: ErrorKind,
    pub count: u64,
    pub last_message: String,
    pub last_seen: DateTime<Utc>,
}

/// Counts observed errors per (context, kind).
#[derive(Debug, Default)]
pub struct ErrorTracker {
    entries: Mutex<HashMap<(String, ErrorKind), ErrorRecord>>,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<(String, ErrorKind), ErrorRecord>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned error tracker mutex");
            poisoned.into_inner()
        })
    }

    pub fn record(&self, context: &str, kind: ErrorKind, error: &AppError) {
        let mut entries = self.lock_entries();
        let now = Utc::now();
        let record = entries
            .entry((context.to_string(), kind))
            .or_insert_with(|| ErrorRecord {
                context: context.to_string(),
                kind,
                count: 0,
                last_message: String::new(),
                last_seen: now,
            });
        record.count += 1;
        record.last_message = error.to_string();
        record.last_seen = now;
    }

    pub fn count(&self, context: &str, kind: ErrorKind) -> u64 {
        self.lock_entries()
            .get(&(context.to_string(), kind))
            .map(|r| r.count)
            .unwrap_or(0)
    }

    /// All records, ordered by context then kind.
    pub fn snapshot(&self) -> Vec<ErrorRecord> {
        let mut records: Vec<ErrorRecord> = self.lock_entries().values().cloned().collect();
        records.sort_by(|a, b| a.context.cmp(&b.context).then(a.kind.cmp(&b.kind)));
        records
    }

    pub fn clear(&self) {
        self.lock_entries().clear();
    }
}
