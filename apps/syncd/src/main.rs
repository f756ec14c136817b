mod config;
mod scheduler;
mod sinks;

use std::sync::Arc;
use std::time::Duration;

use config::Config;
use sinks::{LogNotificationSink, LogProgressReporter, LogReloadSink};
use tallyboard_connect::{BankApiClient, SyncOrchestrator};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// How long an interrupted cycle gets to wind down before exit
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn init_tracing() {
    let log_format = std::env::var("TALLY_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing();

    let client = Arc::new(BankApiClient::new(&config.api_url, &config.api_token)?);
    let orchestrator = SyncOrchestrator::with_progress_reporter(
        client,
        Arc::new(LogNotificationSink),
        Arc::new(LogReloadSink),
        Arc::new(LogProgressReporter),
        config.sync.clone(),
    );
    tracing::info!("Syncing against {}", config.api_url);

    let scheduler = tokio::spawn(scheduler::run_scheduler(
        orchestrator.clone(),
        config.sync_interval,
    ));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    orchestrator.shutdown();

    if tokio::time::timeout(SHUTDOWN_GRACE, scheduler).await.is_err() {
        tracing::warn!("Scheduler did not stop within {}s", SHUTDOWN_GRACE.as_secs());
    }
    Ok(())
}
