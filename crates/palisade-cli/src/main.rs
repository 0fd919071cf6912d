use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use palisade_client::ReqwestFetcher;
use palisade_core::{
    CallOptions, Fetcher, PollTarget, PollerConfig, PollerService, RateLimiter, RetryManager,
    Settings, TracingPollReporter,
};

#[derive(Parser)]
#[command(name = "palisade", version, about = "Polite, self-healing fetcher")]
struct Cli {
    /// JSON settings file (rateLimit / retry / circuitBreaker sections)
    #[arg(short, long, global = true, env = "PALISADE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one URL through the rate limiter and retry manager
    Fetch {
        /// Target URL
        #[arg(short, long)]
        url: String,

        /// Retry/breaker context (defaults to the URL host)
        #[arg(long)]
        context: Option<String>,

        /// Request timeout in seconds
        #[arg(long, default_value_t = 30, env = "PALISADE_TIMEOUT_SECS")]
        timeout: u64,
    },

    /// Poll a set of URLs on an interval until Ctrl-C
    Watch {
        /// Target URL (repeatable)
        #[arg(short, long = "url", required = true)]
        urls: Vec<String>,

        /// Seconds between polling rounds
        #[arg(short, long, default_value_t = 300, env = "PALISADE_POLL_INTERVAL_SECS")]
        interval: u64,

        /// Request timeout in seconds
        #[arg(long, default_value_t = 30, env = "PALISADE_TIMEOUT_SECS")]
        timeout: u64,
    },

    /// Print the effective settings as JSON
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("palisade=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Fetch {
            url,
            context,
            timeout,
        } => {
            let context = context.unwrap_or_else(|| derive_context(&url));
            cmd_fetch(&settings, &url, &context, Duration::from_secs(timeout)).await?;
        }
        Commands::Watch {
            urls,
            interval,
            timeout,
        } => {
            cmd_watch(
                &settings,
                urls,
                Duration::from_secs(interval),
                Duration::from_secs(timeout),
            )
            .await?;
        }
        Commands::Config => {
            let effective = settings.effective().map_err(|e| anyhow::anyhow!(e))?;
            println!("{}", serde_json::to_string_pretty(&effective)?);
        }
    }

    Ok(())
}

/// Settings from the optional file, overridden by `PALISADE_*` variables.
fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let mut settings = match path {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };
    settings
        .apply_env()
        .context("Invalid PALISADE_* environment override")?;
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

/// Use the URL host as the context, so each site gets its own breaker.
fn derive_context(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "default".to_string())
}

fn build_control_plane(settings: &Settings) -> Result<(RateLimiter, Arc<RetryManager>)> {
    let limiter = RateLimiter::new(settings.rate_limiter_config()?)
        .context("Failed to build rate limiter")?;
    let retry = RetryManager::new(settings.retry_policy()?, settings.circuit_breaker_config()?);
    Ok((limiter, Arc::new(retry)))
}

async fn cmd_fetch(settings: &Settings, url: &str, context: &str, timeout: Duration) -> Result<()> {
    let (limiter, retry) = build_control_plane(settings)?;
    let fetcher = ReqwestFetcher::with_timeout(timeout).context("Failed to create HTTP client")?;

    tracing::info!(%url, %context, "Fetching");

    let body = retry
        .execute_with_retry(
            || {
                let fetcher = fetcher.clone();
                let limiter = limiter.clone();
                async move {
                    limiter
                        .execute(
                            |options| async move { fetcher.fetch(url, &options).await },
                            CallOptions::default(),
                        )
                        .await
                }
            },
            context,
            None,
        )
        .await
        .with_context(|| format!("Failed to fetch {url}"))?;

    tracing::info!(bytes = body.len(), "Fetched");
    println!("{body}");

    Ok(())
}

async fn cmd_watch(
    settings: &Settings,
    urls: Vec<String>,
    interval: Duration,
    timeout: Duration,
) -> Result<()> {
    let (limiter, retry) = build_control_plane(settings)?;
    let fetcher = ReqwestFetcher::with_timeout(timeout).context("Failed to create HTTP client")?;

    let targets = urls
        .into_iter()
        .map(|url| {
            let context = derive_context(&url);
            PollTarget::new(url, context)
        })
        .collect();

    let poller = PollerService::new(
        fetcher,
        limiter,
        Arc::clone(&retry),
        targets,
        PollerConfig::default().with_interval(interval),
    );

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "Failed to install CTRL+C handler"),
        }
        signal_token.cancel();
    });

    poller
        .run(cancel, &TracingPollReporter)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    let summary = serde_json::json!({
        "limiter": poller.limiter().stats(),
        "breakers": retry.breaker_stats(),
        "errors": retry.error_stats(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
