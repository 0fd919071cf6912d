use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use palisade_core::{
    AppError, CircuitBreakerConfig, EnhancedOptions, Fetcher, RateLimiter, RateLimiterConfig,
    RetryManager, RetryPolicy,
};

/// Limiter with a generous bucket and no spacing, so only cooldowns delay requests.
pub fn fast_limiter() -> RateLimiter {
    RateLimiter::new(
        RateLimiterConfig::default()
            .with_rate(100.0, 20)
            .with_delays(Duration::ZERO, Duration::from_secs(1))
            .with_jitter(0.0)
            .with_cooldown(Duration::from_secs(2)),
    )
    .expect("valid limiter config")
}

pub fn retry_manager(failure_threshold: u32) -> RetryManager {
    RetryManager::new(
        RetryPolicy::default().with_jitter(0.0),
        CircuitBreakerConfig::default().with_failure_threshold(failure_threshold),
    )
}

/// Fetcher replaying scripted responses, recording URL and dispatch options.
#[derive(Clone, Default)]
pub struct ScriptedFetcher {
    responses: Arc<Mutex<VecDeque<Result<String, AppError>>>>,
    calls: Arc<Mutex<Vec<(String, EnhancedOptions)>>>,
}

impl ScriptedFetcher {
    pub fn new(responses: Vec<Result<String, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Vec<(String, EnhancedOptions)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str, options: &EnhancedOptions) -> Result<String, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), options.clone()));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("<html>{url}</html>")))
    }
}
