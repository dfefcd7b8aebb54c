//! Tributary poller binary
//!
//! A minimal stand-in for the host application's task scheduler: sweeps
//! every Following on an interval and runs its connect cycle, then its
//! purge pass. Deployments that embed the engine drive it through
//! [`tributary::Engine`] instead.

use std::sync::Arc;

use tributary::service::{EmptyFollowerDirectory, HttpTransport};
use tributary::{config, Engine};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Initialize tracing/logging
/// 2. Load configuration from file and environment
/// 3. Initialize the engine
/// 4. Run the poll loop
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize tracing/logging
    let log_format =
        std::env::var("TRIBUTARY__LOGGING__FORMAT").unwrap_or_else(|_| "pretty".to_string());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "tributary=info".into()),
            )
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "tributary=info".into()),
            )
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting Tributary...");

    // 2. Load configuration
    let config = config::AppConfig::load()?;
    tracing::info!(
        domain = %config.server.domain,
        database = %config.database.path.display(),
        "Configuration loaded"
    );

    // 3. Initialize the engine
    //
    // The poller only ingests; it has no followers to broadcast to and
    // no signing key, so the unsigned transport is enough for the
    // push-subscription handshakes it sends.
    let http = reqwest::Client::builder()
        .user_agent(config.fetch.user_agent.clone())
        .timeout(std::time::Duration::from_secs(config.fetch.timeout_seconds))
        .build()?;
    let engine = Engine::new(
        config.clone(),
        Arc::new(HttpTransport::new(http)),
        Arc::new(EmptyFollowerDirectory),
    )
    .await?;

    // 4. Poll loop
    let interval_secs = config.scheduler.poll_interval_seconds.max(1);
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));

    tracing::info!(interval_secs, "Poll loop started");

    loop {
        interval.tick().await;
        run_sweep(&engine).await;
    }
}

/// Connect and purge every Following, one at a time.
///
/// Sequential on purpose: the engine requires at most one concurrent
/// connect per Following, and a single poller gets that for free.
async fn run_sweep(engine: &Engine) {
    let followings = match engine.db.get_all_followings().await {
        Ok(followings) => followings,
        Err(error) => {
            tracing::error!(%error, "Failed to list followings");
            return;
        }
    };

    tracing::info!(count = followings.len(), "Starting connect sweep");

    for following in followings {
        if let Err(error) = engine.connect(&following.id).await {
            // Connection errors are already recorded on the Following;
            // the sweep moves on.
            tracing::warn!(
                %error,
                following_id = %following.id,
                url = %following.url,
                "Connect cycle failed"
            );
        }

        if let Err(error) = engine.purge_following(&following.id).await {
            tracing::warn!(
                %error,
                following_id = %following.id,
                "Purge failed"
            );
        }
    }

    tracing::info!("Connect sweep complete");
}
