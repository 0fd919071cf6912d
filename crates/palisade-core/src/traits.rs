use std::future::Future;

use crate::error::AppError;
use crate::rate_limiter::EnhancedOptions;

/// Fetches a page or API body from a URL using dispatch options
/// (identity, headers and egress route) chosen by the rate limiter.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        url: &str,
        options: &EnhancedOptions,
    ) -> impl Future<Output = Result<String, AppError>> + Send;
}
