use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::classify::{ErrorKind, classify};
use crate::error::AppError;
use crate::rate_limiter::{CallOptions, RateLimiter};
use crate::retry::{RetryManager, RetryOverrides};
use crate::traits::Fetcher;

/// One URL polled every round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTarget {
    pub url: String,
    /// Retry policy and circuit breaker key.
    pub context: String,
    pub priority: i32,
}

impl PollTarget {
    pub fn new(url: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            context: context.into(),
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poller_id: String,
    pub interval: Duration,
    /// Applied to every target's retry policy.
    pub retry_overrides: Option<RetryOverrides>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poller_id: format!("poller-{}", &Uuid::new_v4().to_string()[..8]),
            interval: Duration::from_secs(300),
            retry_overrides: None,
        }
    }
}

impl PollerConfig {
    pub fn with_poller_id(mut self, id: impl Into<String>) -> Self {
        self.poller_id = id.into();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_retry_overrides(mut self, overrides: RetryOverrides) -> Self {
        self.retry_overrides = Some(overrides);
        self
    }
}

/// Result of polling one target once.
#[derive(Debug)]
pub struct PollOutcome {
    pub target: PollTarget,
    pub result: Result<String, AppError>,
}

/// Events emitted by the poller for monitoring/logging.
#[derive(Debug, Clone)]
pub enum PollEvent<'a> {
    Started {
        poller_id: &'a str,
        targets: usize,
    },
    RoundStarted {
        round: u64,
    },
    TargetFetched {
        url: &'a str,
        context: &'a str,
        bytes: usize,
    },
    TargetFailed {
        url: &'a str,
        context: &'a str,
        kind: ErrorKind,
        error: &'a str,
    },
    RoundCompleted {
        round: u64,
        succeeded: usize,
        failed: usize,
    },
    ShuttingDown {
        poller_id: &'a str,
        requests_cleared: usize,
    },
    Stopped {
        poller_id: &'a str,
        rounds: u64,
    },
}

/// Trait for receiving poller events (decoupled logging).
pub trait PollReporter: Send + Sync {
    fn report(&self, event: PollEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPollReporter;

impl PollReporter for TracingPollReporter {
    fn report(&self, event: PollEvent<'_>) {
        match event {
            PollEvent::Started { poller_id, targets } => {
                tracing::info!(%poller_id, targets, "Poller started");
            }
            PollEvent::RoundStarted { round } => {
                tracing::debug!(round, "Polling round started");
            }
            PollEvent::TargetFetched {
                url,
                context,
                bytes,
            } => {
                tracing::info!(%url, %context, bytes, "Target fetched");
            }
            PollEvent::TargetFailed {
                url,
                context,
                kind,
                error,
            } => {
                tracing::warn!(%url, %context, %kind, %error, "Target failed");
            }
            PollEvent::RoundCompleted {
                round,
                succeeded,
                failed,
            } => {
                tracing::info!(round, succeeded, failed, "Polling round completed");
            }
            PollEvent::ShuttingDown {
                poller_id,
                requests_cleared,
            } => {
                tracing::info!(%poller_id, requests_cleared, "Poller shutting down");
            }
            PollEvent::Stopped { poller_id, rounds } => {
                tracing::info!(%poller_id, rounds, "Poller stopped");
            }
        }
    }
}

/// Fetches a fixed set of targets on an interval through the retry manager
/// and the rate limiter's queue.
pub struct PollerService<F: Fetcher> {
    fetcher: F,
    limiter: RateLimiter,
    retry: Arc<RetryManager>,
    targets: Vec<PollTarget>,
    config: PollerConfig,
}

impl<F> PollerService<F>
where
    F: Fetcher + 'static,
{
    pub fn new(
        fetcher: F,
        limiter: RateLimiter,
        retry: Arc<RetryManager>,
        targets: Vec<PollTarget>,
        config: PollerConfig,
    ) -> Self {
        Self {
            fetcher,
            limiter,
            retry,
            targets,
            config,
        }
    }

    pub fn targets(&self) -> &[PollTarget] {
        &self.targets
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn retry_manager(&self) -> &RetryManager {
        &self.retry
    }

    /// Fetch one target: every attempt is queued on the limiter with the
    /// target's priority.
    pub async fn fetch_target(&self, target: &PollTarget) -> Result<String, AppError> {
        self.retry
            .execute_with_retry(
                || {
                    let fetcher = self.fetcher.clone();
                    let url = target.url.clone();
                    let handle = self.limiter.queue_request(
                        move |options| async move { fetcher.fetch(&url, &options).await },
                        CallOptions::default().with_priority(target.priority),
                    );
                    async move { handle?.await }
                },
                &target.context,
                self.config.retry_overrides.as_ref(),
            )
            .await
    }

    /// Poll every target once, concurrently. Outcomes follow target order.
    pub async fn poll_once(&self) -> Vec<PollOutcome> {
        let results = join_all(self.targets.iter().map(|t| self.fetch_target(t))).await;
        self.targets
            .iter()
            .cloned()
            .zip(results)
            .map(|(target, result)| PollOutcome { target, result })
            .collect()
    }

    async fn run_round<PR: PollReporter>(&self, round: u64, reporter: &PR) {
        reporter.report(PollEvent::RoundStarted { round });

        let outcomes = self.poll_once().await;
        let mut succeeded = 0;
        for outcome in &outcomes {
            match &outcome.result {
                Ok(body) => {
                    succeeded += 1;
                    reporter.report(PollEvent::TargetFetched {
                        url: &outcome.target.url,
                        context: &outcome.target.context,
                        bytes: body.len(),
                    });
                }
                Err(e) => {
                    let error = e.to_string();
                    reporter.report(PollEvent::TargetFailed {
                        url: &outcome.target.url,
                        context: &outcome.target.context,
                        kind: classify(e),
                        error: &error,
                    });
                }
            }
        }

        reporter.report(PollEvent::RoundCompleted {
            round,
            succeeded,
            failed: outcomes.len() - succeeded,
        });
    }

    /// Run polling rounds until cancellation.
    pub async fn run<PR: PollReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &PR,
    ) -> Result<(), AppError> {
        if self.targets.is_empty() {
            return Err(AppError::ValidationError(
                "poller needs at least one target".into(),
            ));
        }

        reporter.report(PollEvent::Started {
            poller_id: &self.config.poller_id,
            targets: self.targets.len(),
        });

        let mut round: u64 = 0;
        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            round += 1;
            tokio::select! {
                () = self.run_round(round, reporter) => {}
                () = cancel_token.cancelled() => break,
            }

            tokio::select! {
                () = tokio::time::sleep(self.config.interval) => {}
                () = cancel_token.cancelled() => break,
            }
        }

        // Graceful shutdown: reject queued requests nobody is waiting for.
        let requests_cleared = self.limiter.clear_queue();
        reporter.report(PollEvent::ShuttingDown {
            poller_id: &self.config.poller_id,
            requests_cleared,
        });
        reporter.report(PollEvent::Stopped {
            poller_id: &self.config.poller_id,
            rounds: round,
        });

        Ok(())
    }
}
