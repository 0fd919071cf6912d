use std::sync::{Arc, Mutex};
use std::time::Duration;

use palisade_core::{
    AppError, CallOptions, CircuitState, ErrorKind, Fetcher, PollTarget, PollerConfig,
    PollerService, RateLimiter, RateLimiterConfig, RequestQueueConfig, RetryManager, Settings,
};
use tokio::time::Instant;

use crate::integration::common::{ScriptedFetcher, fast_limiter, retry_manager};

async fn fetch_through(
    limiter: &RateLimiter,
    retry: &RetryManager,
    fetcher: &ScriptedFetcher,
    url: &str,
    context: &str,
) -> Result<String, AppError> {
    retry
        .execute_with_retry(
            || {
                let fetcher = fetcher.clone();
                let url = url.to_string();
                async move {
                    limiter
                        .execute(
                            |options| async move { fetcher.fetch(&url, &options).await },
                            CallOptions::default(),
                        )
                        .await
                }
            },
            context,
            None,
        )
        .await
}

#[tokio::test(start_paused = true)]
async fn rate_limited_response_cools_down_and_recovers() {
    let limiter = fast_limiter();
    let retry = retry_manager(5);
    let fetcher = ScriptedFetcher::new(vec![Err(AppError::RateLimitExceeded {
        retry_after: Some(Duration::from_secs(7)),
    })]);
    let start = Instant::now();

    let body = fetch_through(&limiter, &retry, &fetcher, "https://example.com/s", "search")
        .await
        .unwrap();

    assert_eq!(body, "<html>https://example.com/s</html>");
    assert!(start.elapsed() >= Duration::from_secs(7));
    assert_eq!(limiter.consecutive_failures(), 0);
    assert_eq!(limiter.cooldown_remaining(), Duration::ZERO);
    assert_eq!(retry.errors().count("search", ErrorKind::RateLimited), 1);
}

#[tokio::test(start_paused = true)]
async fn each_attempt_gets_a_fresh_identity() {
    let limiter = RateLimiter::new(
        RateLimiterConfig::default()
            .with_rate(100.0, 20)
            .with_delays(Duration::ZERO, Duration::from_secs(1))
            .with_identities(
                vec!["agent-a".into(), "agent-b".into()],
                palisade_core::SelectionStrategy::RoundRobin,
            ),
    )
    .unwrap();
    let retry = retry_manager(5);
    let fetcher = ScriptedFetcher::new(vec![Err(AppError::network("ECONNRESET", "reset"))]);

    fetch_through(&limiter, &retry, &fetcher, "https://example.com/a", "listing")
        .await
        .unwrap();

    let identities: Vec<String> = fetcher
        .calls()
        .into_iter()
        .map(|(_, options)| options.identity)
        .collect();
    assert_eq!(identities, ["agent-a", "agent-b"]);
}

#[tokio::test(start_paused = true)]
async fn breaker_isolates_failing_context() {
    let limiter = fast_limiter();
    let retry = retry_manager(3);
    let failing = ScriptedFetcher::new(
        (0..20)
            .map(|_| Err(AppError::http_status(503, "Service Unavailable")))
            .collect(),
    );

    let result = fetch_through(&limiter, &retry, &failing, "https://example.com/x", "flaky").await;

    // Third failure trips the breaker; the fourth attempt is rejected untried.
    assert!(matches!(result, Err(AppError::CircuitOpen { .. })));
    assert_eq!(failing.calls().len(), 3);
    assert_eq!(retry.breaker("flaky").state(), CircuitState::Open);

    let healthy = ScriptedFetcher::default();
    fetch_through(&limiter, &retry, &healthy, "https://example.com/y", "stable")
        .await
        .unwrap();
    assert_eq!(retry.breaker("stable").state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn queue_runs_higher_priority_first() {
    let limiter = RateLimiter::new(
        RateLimiterConfig::default()
            .with_rate(100.0, 20)
            .with_delays(Duration::ZERO, Duration::from_secs(1))
            .with_queue(RequestQueueConfig::new(10)),
    )
    .unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let record = |label: &'static str, priority: i32, hold: Duration| {
        let order = Arc::clone(&order);
        limiter
            .queue_request(
                move |_| async move {
                    order.lock().unwrap().push(label);
                    tokio::time::sleep(hold).await;
                    Ok(label)
                },
                CallOptions::default().with_priority(priority),
            )
            .unwrap()
    };

    // The first entry starts draining at once and holds the queue.
    let first = record("first", 0, Duration::from_millis(50));
    tokio::time::sleep(Duration::from_millis(1)).await;
    let low = record("low", 1, Duration::ZERO);
    let high = record("high", 10, Duration::ZERO);
    let also_low = record("also-low", 1, Duration::ZERO);

    for handle in [first, low, high, also_low] {
        handle.await.unwrap();
    }
    assert_eq!(*order.lock().unwrap(), ["first", "high", "low", "also-low"]);
}

#[tokio::test(start_paused = true)]
async fn settings_drive_the_whole_stack() {
    let settings = Settings::from_json(
        r#"{
            "rateLimit": {
                "requestsPerSecond": 50,
                "burstLimit": 10,
                "minDelay": 0,
                "maxDelay": 100,
                "proxies": ["http://10.0.0.1:8080", "http://10.0.0.2:8080"]
            },
            "retry": { "maxRetries": 1, "jitterFactor": 0 },
            "circuitBreaker": { "failureThreshold": 10 }
        }"#,
    )
    .unwrap();

    let limiter = RateLimiter::new(settings.rate_limiter_config().unwrap()).unwrap();
    let retry = Arc::new(RetryManager::new(
        settings.retry_policy().unwrap(),
        settings.circuit_breaker_config().unwrap(),
    ));
    let fetcher = ScriptedFetcher::default();
    let poller = PollerService::new(
        fetcher.clone(),
        limiter,
        retry,
        vec![
            PollTarget::new("https://example.com/1", "pages"),
            PollTarget::new("https://example.com/2", "pages"),
        ],
        PollerConfig::default(),
    );

    let outcomes = poller.poll_once().await;
    assert!(outcomes.iter().all(|o| o.result.is_ok()));

    let mut proxies: Vec<String> = fetcher
        .calls()
        .into_iter()
        .filter_map(|(_, options)| options.proxy)
        .collect();
    proxies.sort();
    assert_eq!(proxies, ["http://10.0.0.1:8080", "http://10.0.0.2:8080"]);
}
