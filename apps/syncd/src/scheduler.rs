//! Background scheduler for periodic bank sync.
//!
//! On startup the scheduler refreshes once if any account is missing a
//! balance, then runs a scheduled cycle on a fixed interval until the
//! orchestrator shuts down.

use std::time::Duration;

use tallyboard_connect::{
    SyncError, SyncOrchestrator, SyncProgressReporter, SyncReport, SyncScope, SyncTrigger,
};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub async fn run_scheduler<P: SyncProgressReporter + 'static>(
    orchestrator: SyncOrchestrator<P>,
    every: Duration,
) {
    info!("Sync scheduler started ({}s interval)", every.as_secs());

    match orchestrator.run_if_balances_missing().await {
        Ok(Some(report)) => log_report(&report),
        Ok(None) => debug!("Startup refresh skipped: all balances present"),
        Err(SyncError::Cancelled) => {
            info!("Sync scheduler stopped");
            return;
        }
        Err(e) => warn!("Startup refresh failed: {}", e),
    }

    // First scheduled tick is one interval after startup
    let mut ticks = interval_at(Instant::now() + every, every);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // A cycle interrupted by shutdown returns a Cancelled report
        if orchestrator.is_shut_down() {
            break;
        }

        tokio::select! {
            _ = orchestrator.shutdown_requested() => break,
            _ = ticks.tick() => {}
        }

        match orchestrator
            .run_with_trigger(SyncScope::All, SyncTrigger::Scheduled)
            .await
        {
            Ok(report) => log_report(&report),
            Err(SyncError::Cancelled) => break,
            Err(e) => warn!("Scheduled sync failed: {}", e),
        }
    }

    info!("Sync scheduler stopped");
}

fn log_report(report: &SyncReport) {
    info!(
        "Sync {} finished: {} ({} connections)",
        report.cycle_id,
        report.outcome,
        report.jobs.len()
    );
}
