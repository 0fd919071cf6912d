use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use palisade_core::backoff::MAX_SERVER_HINT;
use palisade_core::error::AppError;
use palisade_core::rate_limiter::EnhancedOptions;
use palisade_core::traits::Fetcher;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Proxy, StatusCode};
use url::Url;

/// HTTP fetcher using reqwest.
///
/// Sends each request with the identity and headers chosen by the rate
/// limiter, through the chosen egress route when there is one. Clients are
/// built once per route and reused, so connection pools survive rotation.
#[derive(Clone)]
pub struct ReqwestFetcher {
    direct: Client,
    proxied: Arc<Mutex<HashMap<String, Client>>>,
    timeout: Duration,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let direct = build_client(timeout, None)?;
        Ok(Self {
            direct,
            proxied: Arc::default(),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn lock_proxied(&self) -> MutexGuard<'_, HashMap<String, Client>> {
        self.proxied.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned proxy client cache");
            poisoned.into_inner()
        })
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client, AppError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };
        let mut cache = self.lock_proxied();
        if let Some(client) = cache.get(proxy) {
            return Ok(client.clone());
        }
        let client = build_client(self.timeout, Some(proxy))?;
        tracing::debug!(proxy = %proxy, "Built client for egress route");
        cache.insert(proxy.to_string(), client.clone());
        Ok(client)
    }

    fn map_send_error(&self, error: reqwest::Error, proxy: Option<&str>) -> AppError {
        if error.is_timeout() {
            AppError::Timeout(self.timeout.as_secs())
        } else if error.is_connect() {
            match proxy {
                Some(proxy) => AppError::ProxyError {
                    proxy: proxy.to_string(),
                    message: format!("Connection failed: {error}"),
                },
                None => AppError::network("ECONNREFUSED", format!("Connection failed: {error}")),
            }
        } else {
            AppError::HttpError(error.to_string())
        }
    }
}

fn build_client(timeout: Duration, proxy: Option<&str>) -> Result<Client, AppError> {
    let builder = Client::builder().timeout(timeout);
    // Egress is chosen by rotation, never by the environment.
    let builder = match proxy {
        Some(proxy) => {
            let route = Proxy::all(proxy).map_err(|e| {
                AppError::ConfigError(format!("Invalid proxy URL '{proxy}': {e}"))
            })?;
            builder.proxy(route)
        }
        None => builder.no_proxy(),
    };
    builder
        .build()
        .map_err(|e| AppError::HttpError(e.to_string()))
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, options: &EnhancedOptions) -> Result<String, AppError> {
        validate_url(url)?;
        let proxy = options.proxy.as_deref();
        let client = self.client_for(proxy)?;
        let headers = header_map(&options.headers)?;

        let response = client
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| self.map_send_error(e, proxy))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(status_error(status, url, retry_after));
        }

        response
            .text()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))
    }
}

/// Only `http` and `https` targets are fetched.
fn validate_url(url: &str) -> Result<(), AppError> {
    let parsed =
        Url::parse(url).map_err(|e| AppError::ValidationError(format!("Invalid URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(AppError::ValidationError(format!(
            "URL scheme '{scheme}' is not allowed (only http/https)"
        ))),
    }
}

fn header_map<'a>(
    headers: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> Result<HeaderMap, AppError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| AppError::ValidationError(format!("Invalid header name '{name}'")))?;
        let header_value = HeaderValue::from_str(value).map_err(|_| {
            AppError::ValidationError(format!("Invalid value for header '{name}'"))
        })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

fn status_error(status: StatusCode, url: &str, retry_after: Option<Duration>) -> AppError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return AppError::RateLimitExceeded { retry_after };
    }
    AppError::HttpStatus {
        status: status.as_u16(),
        message: format!(
            "{} for {url}",
            status.canonical_reason().unwrap_or("Unexpected status")
        ),
        retry_after,
    }
}

/// Parse a `Retry-After` header: delay seconds or an HTTP-date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    parse_retry_after_at(value, Utc::now())
}

/// [`parse_retry_after`] against an explicit current time.
///
/// Past dates yield zero; hints beyond [`MAX_SERVER_HINT`] are clamped to it.
pub fn parse_retry_after_at(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    let delay = if let Ok(seconds) = value.parse::<u64>() {
        Duration::from_secs(seconds)
    } else {
        let date = DateTime::parse_from_rfc2822(value).ok()?;
        let delta = date.with_timezone(&Utc) - now;
        delta.to_std().unwrap_or(Duration::ZERO)
    };
    Some(delay.min(MAX_SERVER_HINT))
}
