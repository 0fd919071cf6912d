//! Resilience and throttling control plane for polite, self-healing
//! fetching against rate-limited targets.
//!
//! [`RateLimiter`] decides when and as whom a request goes out;
//! [`RetryManager`] decides how a failing context recovers.

pub mod backoff;
pub mod circuit_breaker;
pub mod classify;
pub mod error;
pub mod poller;
pub mod rate_limiter;
pub mod request_queue;
pub mod retry;
pub mod rotation;
pub mod settings;
pub mod token_bucket;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use classify::{ErrorKind, ErrorTracker, classify, classify_via_proxy};
pub use error::AppError;
pub use poller::{PollEvent, PollReporter, PollTarget, PollerConfig, PollerService, TracingPollReporter};
pub use rate_limiter::{CallOptions, EnhancedOptions, RateLimiter, RateLimiterConfig};
pub use request_queue::{QueueHandle, RequestQueue, RequestQueueConfig};
pub use retry::{RetryManager, RetryOverrides, RetryPolicy};
pub use rotation::{IdentityRotator, ProxyRotator, SelectionStrategy};
pub use settings::Settings;
pub use token_bucket::{TokenBucket, TokenBucketConfig};
pub use traits::Fetcher;
