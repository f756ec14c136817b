//! Outcome aggregation for a sync cycle.
//!
//! Priority is `RateLimited > Failed > Success`: a rate limit anywhere in the
//! cycle is reported even if every other component succeeded.

use serde::{Deserialize, Serialize};

use crate::models::{AggregateOutcome, BalanceRefresh, JobState, NotificationKind};

/// Outcome of one component of a cycle (the balance call or a single job).
///
/// Variant order encodes the aggregation priority, lowest first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ComponentOutcome {
    Success,
    Failed,
    RateLimited,
}

impl ComponentOutcome {
    /// Map a terminal job state. `Pending` has no outcome yet.
    pub fn from_job_state(state: JobState) -> Option<Self> {
        match state {
            JobState::Pending => None,
            JobState::Completed => Some(Self::Success),
            JobState::Failed => Some(Self::Failed),
            JobState::RateLimited => Some(Self::RateLimited),
        }
    }
}

impl From<&BalanceRefresh> for ComponentOutcome {
    fn from(refresh: &BalanceRefresh) -> Self {
        match refresh {
            BalanceRefresh::Success { .. } => Self::Success,
            BalanceRefresh::RateLimited => Self::RateLimited,
            BalanceRefresh::Failed(_) => Self::Failed,
        }
    }
}

impl From<ComponentOutcome> for AggregateOutcome {
    fn from(outcome: ComponentOutcome) -> Self {
        match outcome {
            ComponentOutcome::Success => AggregateOutcome::Success,
            ComponentOutcome::Failed => AggregateOutcome::Failed,
            ComponentOutcome::RateLimited => AggregateOutcome::RateLimited,
        }
    }
}

/// Fold component outcomes into the cycle outcome.
///
/// An empty input aggregates to `Success`; the orchestrator reports
/// `NoConnections` itself before any component exists.
pub fn aggregate<I>(components: I) -> AggregateOutcome
where
    I: IntoIterator<Item = ComponentOutcome>,
{
    components
        .into_iter()
        .max()
        .unwrap_or(ComponentOutcome::Success)
        .into()
}

impl AggregateOutcome {
    /// Notification to emit for this outcome. A cancelled cycle emits none.
    pub fn notification_kind(self) -> Option<NotificationKind> {
        match self {
            AggregateOutcome::Success | AggregateOutcome::NoConnections => {
                Some(NotificationKind::Success)
            }
            AggregateOutcome::RateLimited => Some(NotificationKind::PartialRateLimited),
            AggregateOutcome::Failed => Some(NotificationKind::Failed),
            AggregateOutcome::Cancelled => None,
        }
    }
}
