//! Progress reporting for sync cycles.
//!
//! Hosts implement [`SyncProgressReporter`] to stream per-job progress to
//! their UI (events, SSE, logs). This is separate from the single
//! notification a cycle emits through [`NotificationSink`](crate::NotificationSink).

use serde::{Deserialize, Serialize};

use crate::models::{JobState, SyncReport};

/// Payload for job progress events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressPayload {
    pub cycle_id: String,
    pub connection_id: String,
    pub state: JobState,
    /// Jobs of the cycle still pending after this update
    pub pending_jobs: usize,
    pub message: Option<String>,
}

impl JobProgressPayload {
    pub fn new(
        cycle_id: impl Into<String>,
        connection_id: impl Into<String>,
        state: JobState,
    ) -> Self {
        Self {
            cycle_id: cycle_id.into(),
            connection_id: connection_id.into(),
            state,
            pending_jobs: 0,
            message: None,
        }
    }

    pub fn with_pending_jobs(mut self, pending: usize) -> Self {
        self.pending_jobs = pending;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Trait for reporting sync progress.
pub trait SyncProgressReporter: Send + Sync {
    /// Report that a cycle is starting.
    fn report_sync_start(&self, cycle_id: &str);

    /// Report a job state change.
    fn report_job_progress(&self, payload: JobProgressPayload);

    /// Report that a cycle finished (whatever the outcome).
    fn report_sync_complete(&self, report: &SyncReport);
}

/// A no-op progress reporter for contexts where progress reporting is not needed.
#[derive(Debug, Clone, Default)]
pub struct NoOpProgressReporter;

impl SyncProgressReporter for NoOpProgressReporter {
    fn report_sync_start(&self, _cycle_id: &str) {}

    fn report_job_progress(&self, _payload: JobProgressPayload) {}

    fn report_sync_complete(&self, _report: &SyncReport) {}
}
