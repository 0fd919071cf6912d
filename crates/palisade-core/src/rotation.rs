//! Identity (browser signature) and egress route rotation.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Browser signatures used when no identity pool is configured.
pub const DEFAULT_IDENTITIES: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

/// How the next identity is picked from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectionStrategy {
    /// Walk the pool in order, wrapping at the end.
    #[default]
    #[serde(rename = "rotate")]
    RoundRobin,
    /// Uniformly random.
    #[serde(rename = "random")]
    Random,
    /// Lowest usage count; ties go to the earlier entry.
    #[serde(rename = "least-used")]
    LeastUsed,
}

impl SelectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionStrategy::RoundRobin => "rotate",
            SelectionStrategy::Random => "random",
            SelectionStrategy::LeastUsed => "least-used",
        }
    }
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SelectionStrategy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rotate" | "round-robin" => Ok(SelectionStrategy::RoundRobin),
            "random" => Ok(SelectionStrategy::Random),
            "least-used" => Ok(SelectionStrategy::LeastUsed),
            _ => Err(AppError::ConfigError(format!(
                "Unknown selection strategy: {s} (expected rotate, random or least-used)"
            ))),
        }
    }
}

/// Pool of outbound identities with usage accounting.
#[derive(Debug, Clone)]
pub struct IdentityRotator {
    identities: Vec<String>,
    usage: Vec<u64>,
    cursor: usize,
    strategy: SelectionStrategy,
}

impl IdentityRotator {
    pub fn new(identities: Vec<String>, strategy: SelectionStrategy) -> Result<Self, AppError> {
        if identities.is_empty() {
            return Err(AppError::ConfigError(
                "identity pool must contain at least one entry".into(),
            ));
        }
        let usage = vec![0; identities.len()];
        Ok(Self {
            identities,
            usage,
            cursor: 0,
            strategy,
        })
    }

    pub fn with_defaults(strategy: SelectionStrategy) -> Self {
        Self {
            identities: DEFAULT_IDENTITIES.iter().map(|s| s.to_string()).collect(),
            usage: vec![0; DEFAULT_IDENTITIES.len()],
            cursor: 0,
            strategy,
        }
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Pick the next identity and count the use.
    pub fn select(&mut self) -> String {
        let index = match self.strategy {
            SelectionStrategy::RoundRobin => {
                let index = self.cursor % self.identities.len();
                self.cursor = (index + 1) % self.identities.len();
                index
            }
            SelectionStrategy::Random => rand::thread_rng().gen_range(0..self.identities.len()),
            SelectionStrategy::LeastUsed => self
                .usage
                .iter()
                .enumerate()
                .min_by_key(|&(i, count)| (*count, i))
                .map(|(i, _)| i)
                .unwrap_or(0),
        };
        self.usage[index] += 1;
        self.identities[index].clone()
    }

    pub fn usage_of(&self, identity: &str) -> u64 {
        self.identities
            .iter()
            .position(|i| i == identity)
            .map(|i| self.usage[i])
            .unwrap_or(0)
    }

    /// `(identity, uses)` in pool order.
    pub fn usage(&self) -> Vec<(String, u64)> {
        self.identities
            .iter()
            .cloned()
            .zip(self.usage.iter().copied())
            .collect()
    }
}

/// Round-robin pool of egress routes that sidelines failing routes.
#[derive(Debug, Clone)]
pub struct ProxyRotator {
    proxies: Vec<String>,
    failures: Vec<u32>,
    cursor: usize,
    failure_threshold: u32,
}

impl ProxyRotator {
    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

    pub fn new(proxies: Vec<String>, failure_threshold: u32) -> Result<Self, AppError> {
        if proxies.is_empty() {
            return Err(AppError::ConfigError(
                "proxy pool must contain at least one entry".into(),
            ));
        }
        if failure_threshold == 0 {
            return Err(AppError::ConfigError(
                "proxy failure threshold must be at least 1".into(),
            ));
        }
        let failures = vec![0; proxies.len()];
        Ok(Self {
            proxies,
            failures,
            cursor: 0,
            failure_threshold,
        })
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Next route under the failure threshold.
    ///
    /// When every route is at or over the threshold, all counts are cleared
    /// and the first route is returned.
    pub fn get_proxy(&mut self) -> String {
        let len = self.proxies.len();
        for step in 0..len {
            let index = (self.cursor + step) % len;
            if self.failures[index] < self.failure_threshold {
                self.cursor = (index + 1) % len;
                return self.proxies[index].clone();
            }
        }

        tracing::warn!(
            proxies = len,
            threshold = self.failure_threshold,
            "All proxies over failure threshold, resetting failure counts"
        );
        self.failures.fill(0);
        self.cursor = 1 % len;
        self.proxies[0].clone()
    }

    /// Count a failure against `proxy`. Returns the new count, or `None` for an unknown route.
    pub fn record_failure(&mut self, proxy: &str) -> Option<u32> {
        let index = self.proxies.iter().position(|p| p == proxy)?;
        self.failures[index] += 1;
        let count = self.failures[index];
        if count == self.failure_threshold {
            tracing::warn!(
                proxy = %proxy,
                failures = count,
                "Proxy reached failure threshold, excluding from rotation"
            );
        }
        Some(count)
    }

    pub fn failure_count(&self, proxy: &str) -> Option<u32> {
        self.proxies
            .iter()
            .position(|p| p == proxy)
            .map(|i| self.failures[i])
    }

    /// `(proxy, failures)` in pool order.
    pub fn failures(&self) -> Vec<(String, u32)> {
        self.proxies
            .iter()
            .cloned()
            .zip(self.failures.iter().copied())
            .collect()
    }
}
