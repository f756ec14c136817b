//! Models shared by the registry, the job tracker, and the orchestrator.
//! Wire-facing types mirror the bank data API JSON (camelCase).

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

// ─────────────────────────────────────────────────────────────────────────────
// Accounts & Connections
// ─────────────────────────────────────────────────────────────────────────────

/// A bank account as listed by the account data service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// The bank authorization this account was linked through
    pub connection_id: String,
    #[serde(default)]
    pub currency: Option<String>,
    /// Current balance, `None` until the first balance refresh lands
    #[serde(default)]
    pub balance: Option<Decimal>,
    #[serde(default)]
    pub balance_updated_at: Option<DateTime<Utc>>,
}

/// A booked transaction, used only for the post-cycle reload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub account_id: String,
    pub amount: Decimal,
    #[serde(default)]
    pub currency: Option<String>,
    pub booked_on: NaiveDate,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub tag_ids: Vec<String>,
}

/// One linked bank authorization and the accounts grouped under it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    pub account_ids: BTreeSet<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Upstream call outcomes
// ─────────────────────────────────────────────────────────────────────────────

/// Result of the single balance-refresh request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalanceRefresh {
    /// Balances refreshed; `partial` when only some accounts were updated
    Success { partial: bool },
    RateLimited,
    Failed(String),
}

/// Synchronous answer to a fetch start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStart {
    /// Job accepted and now pending upstream
    Accepted,
    RateLimited,
    Failed(String),
}

/// Status vocabulary of the fetch status endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Pending,
    Completed,
    Failed,
    RateLimited,
}

// ─────────────────────────────────────────────────────────────────────────────
// Sync jobs
// ─────────────────────────────────────────────────────────────────────────────

/// State of one tracked fetch job.
///
/// `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Completed,
    Failed,
    RateLimited,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobState::Pending)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
            JobState::RateLimited => write!(f, "rate_limited"),
        }
    }
}

impl From<FetchStatus> for JobState {
    fn from(status: FetchStatus) -> Self {
        match status {
            FetchStatus::Pending => JobState::Pending,
            FetchStatus::Completed => JobState::Completed,
            FetchStatus::Failed => JobState::Failed,
            FetchStatus::RateLimited => JobState::RateLimited,
        }
    }
}

/// One outstanding (or finished) fetch operation for a single connection.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncJob {
    pub connection_id: String,
    pub state: JobState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl SyncJob {
    pub(crate) fn new(connection_id: impl Into<String>, state: JobState) -> Self {
        let now = Utc::now();
        Self {
            connection_id: connection_id.into(),
            state,
            started_at: now,
            finished_at: state.is_terminal().then_some(now),
            error: None,
        }
    }

    pub(crate) fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Move the job to `next`.
    ///
    /// Terminal jobs are immutable: any transition out of a terminal state is
    /// rejected, including a repeat of the same terminal state.
    pub fn transition(&mut self, next: JobState) -> Result<()> {
        if self.state.is_terminal() {
            return Err(SyncError::TerminalJob {
                connection_id: self.connection_id.clone(),
                state: self.state,
            });
        }
        if next.is_terminal() {
            self.state = next;
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cycle inputs and outputs
// ─────────────────────────────────────────────────────────────────────────────

/// Which connections a cycle covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncScope {
    /// Every connection in the registry snapshot
    #[default]
    All,
    /// Only these connections (intersected with the registry snapshot)
    Connections(Vec<String>),
}

/// What started a cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Manual,
    MissingBalances,
    Scheduled,
}

/// Aggregate outcome of one sync cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOutcome {
    Success,
    Failed,
    RateLimited,
    /// The registry snapshot was empty (distinct from `Success`)
    NoConnections,
    /// Polling was cancelled before every job was terminal; nothing was aggregated
    Cancelled,
}

impl std::fmt::Display for AggregateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregateOutcome::Success => write!(f, "success"),
            AggregateOutcome::Failed => write!(f, "failed"),
            AggregateOutcome::RateLimited => write!(f, "rate_limited"),
            AggregateOutcome::NoConnections => write!(f, "no_connections"),
            AggregateOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The one user-facing message kind emitted per cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Success,
    PartialRateLimited,
    Failed,
}

/// Per-connection line of a cycle report.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    pub connection_id: String,
    pub state: JobState,
    pub error: Option<String>,
}

impl From<&SyncJob> for JobReport {
    fn from(job: &SyncJob) -> Self {
        Self {
            connection_id: job.connection_id.clone(),
            state: job.state,
            error: job.error.clone(),
        }
    }
}

/// Summary of a finished cycle, shared with every caller attached to it.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub cycle_id: String,
    pub trigger: SyncTrigger,
    pub outcome: AggregateOutcome,
    /// `None` when no balance call was issued (empty snapshot)
    pub balance_outcome: Option<crate::outcome::ComponentOutcome>,
    pub balance_partial: bool,
    pub jobs: Vec<JobReport>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Whether the dependent reload was triggered
    pub reloaded: bool,
}

/// Fresh data handed to the reload sink after a cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataReload {
    pub accounts: Vec<Account>,
    pub transactions: Vec<Transaction>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Profile & preferences
// ─────────────────────────────────────────────────────────────────────────────

/// Filter configuration mirrored between local state and the remote profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceState {
    #[serde(default)]
    pub selected_account_ids: BTreeSet<String>,
    #[serde(default)]
    pub category_ids: BTreeSet<String>,
    #[serde(default)]
    pub tag_ids: BTreeSet<String>,
    #[serde(default)]
    pub new_only: bool,
    #[serde(default)]
    pub include_uncategorized: bool,
    #[serde(default)]
    pub include_untagged: bool,
}

/// Remote profile record. Only the preference fields take part in sync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub preferences: PreferenceState,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_job_moves_to_terminal() {
        let mut job = SyncJob::new("conn-1", JobState::Pending);
        assert!(job.finished_at.is_none());

        job.transition(JobState::Completed).unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_pending_to_pending_is_noop() {
        let mut job = SyncJob::new("conn-1", JobState::Pending);
        job.transition(JobState::Pending).unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert!(job.finished_at.is_none());
    }

    #[test]
    fn test_terminal_job_rejects_every_transition() {
        for terminal in [JobState::Completed, JobState::Failed, JobState::RateLimited] {
            let mut job = SyncJob::new("conn-1", terminal);
            for next in [
                JobState::Pending,
                JobState::Completed,
                JobState::Failed,
                JobState::RateLimited,
            ] {
                let err = job.transition(next).unwrap_err();
                assert!(matches!(err, SyncError::TerminalJob { .. }));
                assert_eq!(job.state, terminal);
            }
        }
    }

    #[test]
    fn test_fetch_status_deserializes_snake_case() {
        let status: FetchStatus = serde_json::from_str("\"rate_limited\"").unwrap();
        assert_eq!(status, FetchStatus::RateLimited);
        assert_eq!(JobState::from(status), JobState::RateLimited);
    }

    #[test]
    fn test_profile_tolerates_missing_preferences() {
        let profile: Profile = serde_json::from_str(r#"{"id":"user-1"}"#).unwrap();
        assert_eq!(profile.preferences, PreferenceState::default());
    }

    #[test]
    fn test_account_without_balance() {
        let account: Account =
            serde_json::from_str(r#"{"id":"acc-1","connectionId":"conn-1"}"#).unwrap();
        assert!(account.balance.is_none());
        assert!(account.name.is_none());
    }
}
