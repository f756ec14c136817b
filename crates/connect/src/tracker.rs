//! Per-connection fetch job tracking.
//!
//! At most one job exists per connection. A job is `Pending` until a status
//! read (or a cycle timeout) moves it to a terminal state, after which it is
//! immutable. The tracker is owned by a single orchestrator and is only
//! mutated from that orchestrator's coordinating task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::models::{FetchStart, JobState, SyncJob};
use crate::traits::AccountDataService;

pub struct SyncJobTracker {
    service: Arc<dyn AccountDataService>,
    jobs: Mutex<HashMap<String, SyncJob>>,
}

impl SyncJobTracker {
    pub fn new(service: Arc<dyn AccountDataService>) -> Self {
        Self {
            service,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, SyncJob>> {
        // A poisoned map still holds consistent jobs: every mutation is a single insert or transition.
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a fetch job for a connection.
    ///
    /// If the connection already has a pending job, that job is returned and
    /// no request is sent. A synchronous rate-limit answer produces a job that
    /// is already `RateLimited`. A transport error records a `Failed` job and
    /// is returned to the caller.
    pub async fn start(&self, connection_id: &str) -> Result<SyncJob> {
        if let Some(job) = self.outstanding(connection_id) {
            debug!(
                "[Tracker] Connection {} already has a pending job, reusing it",
                connection_id
            );
            return Ok(job);
        }

        let job = match self.service.start_fetch(connection_id).await {
            Ok(FetchStart::Accepted) => SyncJob::new(connection_id, JobState::Pending),
            Ok(FetchStart::RateLimited) => {
                info!("[Tracker] Fetch start rate limited for {}", connection_id);
                SyncJob::new(connection_id, JobState::RateLimited)
            }
            Ok(FetchStart::Failed(message)) => {
                warn!(
                    "[Tracker] Fetch start rejected for {}: {}",
                    connection_id, message
                );
                SyncJob::new(connection_id, JobState::Failed).with_error(message)
            }
            Err(err) => {
                warn!(
                    "[Tracker] Fetch start request failed for {}: {}",
                    connection_id, err
                );
                let job = SyncJob::new(connection_id, JobState::Failed).with_error(err.to_string());
                self.jobs().insert(connection_id.to_string(), job);
                return Err(err);
            }
        };

        self.jobs().insert(connection_id.to_string(), job.clone());
        Ok(job)
    }

    /// Read the current state of a connection's job.
    ///
    /// Terminal jobs answer from the tracker without a request. For a pending
    /// job this is exactly one status read; waiting between reads is the
    /// caller's concern.
    pub async fn poll(&self, connection_id: &str) -> Result<JobState> {
        let job = self
            .job(connection_id)
            .ok_or_else(|| SyncError::UnknownJob(connection_id.to_string()))?;
        if job.is_terminal() {
            return Ok(job.state);
        }

        let status = self.service.get_fetch_status(connection_id).await?;
        self.advance(connection_id, status.into())
    }

    /// Apply a state to a tracked job. Rejected once the job is terminal.
    pub fn advance(&self, connection_id: &str, next: JobState) -> Result<JobState> {
        let mut jobs = self.jobs();
        let job = jobs
            .get_mut(connection_id)
            .ok_or_else(|| SyncError::UnknownJob(connection_id.to_string()))?;
        job.transition(next)?;
        Ok(job.state)
    }

    /// Fail a pending job that outlived its cycle.
    pub fn expire(&self, connection_id: &str, reason: &str) -> Result<JobState> {
        let mut jobs = self.jobs();
        let job = jobs
            .get_mut(connection_id)
            .ok_or_else(|| SyncError::UnknownJob(connection_id.to_string()))?;
        job.transition(JobState::Failed)?;
        job.error = Some(reason.to_string());
        Ok(job.state)
    }

    pub fn job(&self, connection_id: &str) -> Option<SyncJob> {
        self.jobs().get(connection_id).cloned()
    }

    /// The connection's job, if one is still pending.
    pub fn outstanding(&self, connection_id: &str) -> Option<SyncJob> {
        self.jobs()
            .get(connection_id)
            .filter(|job| !job.is_terminal())
            .cloned()
    }

    /// Drop the terminal jobs of a finished cycle. Pending jobs stay tracked.
    pub fn release<'a, I>(&self, connection_ids: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut jobs = self.jobs();
        for id in connection_ids {
            if jobs.get(id).is_some_and(SyncJob::is_terminal) {
                jobs.remove(id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs().is_empty()
    }
}
