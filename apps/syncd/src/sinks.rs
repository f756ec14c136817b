//! Log-backed collaborators for the daemon.
//!
//! The daemon has no UI, so notifications, reloads and progress all end up in
//! the structured log.

use tallyboard_connect::{
    DataReload, DataReloadSink, JobProgressPayload, NotificationKind, NotificationSink,
    SyncProgressReporter, SyncReport,
};
use tracing::{debug, info, warn};

pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn notify(&self, kind: NotificationKind) {
        match kind {
            NotificationKind::Success => info!("Bank data is up to date"),
            NotificationKind::PartialRateLimited => {
                warn!("Some bank connections were rate limited, data may be incomplete")
            }
            NotificationKind::Failed => warn!("Bank sync failed"),
        }
    }
}

pub struct LogReloadSink;

impl DataReloadSink for LogReloadSink {
    fn reload(&self, data: DataReload) {
        info!(
            accounts = data.accounts.len(),
            transactions = data.transactions.len(),
            "Reloaded account data"
        );
    }
}

pub struct LogProgressReporter;

impl SyncProgressReporter for LogProgressReporter {
    fn report_sync_start(&self, cycle_id: &str) {
        debug!(cycle_id, "Sync cycle started");
    }

    fn report_job_progress(&self, payload: JobProgressPayload) {
        debug!(
            cycle_id = %payload.cycle_id,
            connection_id = %payload.connection_id,
            state = %payload.state,
            pending = payload.pending_jobs,
            "Job progress"
        );
    }

    fn report_sync_complete(&self, report: &SyncReport) {
        info!(
            cycle_id = %report.cycle_id,
            trigger = ?report.trigger,
            outcome = %report.outcome,
            jobs = report.jobs.len(),
            reloaded = report.reloaded,
            "Sync cycle complete"
        );
    }
}
