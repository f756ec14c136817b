//! Sync cycle orchestration across every linked bank connection.
//!
//! A cycle snapshots the connection registry, dispatches one balance refresh
//! plus one fetch start per connection, polls the pending jobs on a fixed
//! interval until all are terminal (or the cycle times out), aggregates a
//! single outcome, reloads accounts/transactions, and notifies once.
//!
//! Only one cycle runs per orchestrator. Overlapping `run` calls attach to
//! the active cycle and receive the same report.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::models::{
    Account, AggregateOutcome, BalanceRefresh, Connection, DataReload, JobReport, JobState,
    NotificationKind, SyncJob, SyncReport, SyncScope, SyncTrigger,
};
use crate::outcome::{aggregate, ComponentOutcome};
use crate::progress::{JobProgressPayload, NoOpProgressReporter, SyncProgressReporter};
use crate::registry::ConnectionRegistry;
use crate::tracker::SyncJobTracker;
use crate::traits::{AccountDataService, DataReloadSink, NotificationSink};

/// Configuration for sync cycles.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Delay between two poll rounds.
    pub poll_interval: Duration,
    /// Upper bound on a cycle; jobs still pending after it are failed.
    pub max_cycle_duration: Duration,
    /// Window of transactions reloaded after a cycle.
    pub recent_transactions_days: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_cycle_duration: Duration::from_secs(5 * 60),
            recent_transactions_days: 30,
        }
    }
}

/// Whether any account still lacks a balance.
pub fn needs_balance_refresh(accounts: &[Account]) -> bool {
    accounts.iter().any(|account| account.balance.is_none())
}

type CycleResult = Result<SyncReport>;

struct ActiveCycle {
    cycle_id: String,
    cancel: CancellationToken,
    done: watch::Receiver<Option<CycleResult>>,
}

struct Inner<P: SyncProgressReporter> {
    service: Arc<dyn AccountDataService>,
    registry: ConnectionRegistry,
    tracker: SyncJobTracker,
    notifier: Arc<dyn NotificationSink>,
    reload_sink: Arc<dyn DataReloadSink>,
    progress_reporter: Arc<P>,
    config: SyncConfig,
    active: Mutex<Option<ActiveCycle>>,
    shutdown: CancellationToken,
}

/// Clears the active-cycle slot when the cycle task ends, even on panic.
struct ActiveSlot<'a, P: SyncProgressReporter>(&'a Inner<P>);

impl<P: SyncProgressReporter> Drop for ActiveSlot<'_, P> {
    fn drop(&mut self) {
        self.0.active().take();
    }
}

/// Orchestrates bank connection sync cycles.
///
/// # Example
///
/// ```ignore
/// let orchestrator = SyncOrchestrator::new(api_client, notifier, reload_sink, SyncConfig::default());
/// let report = orchestrator.run(SyncScope::All).await?;
/// ```
pub struct SyncOrchestrator<P: SyncProgressReporter + 'static = NoOpProgressReporter> {
    inner: Arc<Inner<P>>,
}

impl<P: SyncProgressReporter + 'static> Clone for SyncOrchestrator<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl SyncOrchestrator<NoOpProgressReporter> {
    /// Create an orchestrator without progress reporting.
    pub fn new(
        service: Arc<dyn AccountDataService>,
        notifier: Arc<dyn NotificationSink>,
        reload_sink: Arc<dyn DataReloadSink>,
        config: SyncConfig,
    ) -> Self {
        Self::with_progress_reporter(
            service,
            notifier,
            reload_sink,
            Arc::new(NoOpProgressReporter),
            config,
        )
    }
}

impl<P: SyncProgressReporter + 'static> SyncOrchestrator<P> {
    pub fn with_progress_reporter(
        service: Arc<dyn AccountDataService>,
        notifier: Arc<dyn NotificationSink>,
        reload_sink: Arc<dyn DataReloadSink>,
        progress_reporter: Arc<P>,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: ConnectionRegistry::new(service.clone()),
                tracker: SyncJobTracker::new(service.clone()),
                service,
                notifier,
                reload_sink,
                progress_reporter,
                config,
                active: Mutex::new(None),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Run a manually triggered cycle.
    pub async fn run(&self, scope: SyncScope) -> Result<SyncReport> {
        self.run_with_trigger(scope, SyncTrigger::Manual).await
    }

    /// Run a cycle, or attach to the one already running.
    ///
    /// The cycle executes on its own task, so dropping this future does not
    /// stop it; use [`cancel_active`](Self::cancel_active) for that.
    pub async fn run_with_trigger(
        &self,
        scope: SyncScope,
        trigger: SyncTrigger,
    ) -> Result<SyncReport> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let mut done = self.attach_or_start(scope, trigger);
        let result = match done.wait_for(Option::is_some).await {
            Ok(result) => (*result).clone().unwrap_or(Err(SyncError::Cancelled)),
            // The cycle task ended without publishing (it panicked)
            Err(_) => Err(SyncError::Cancelled),
        };
        result
    }

    /// Run an automatic cycle if any linked account has no balance yet.
    ///
    /// Returns `Ok(None)` when every balance is present.
    pub async fn run_if_balances_missing(&self) -> Result<Option<SyncReport>> {
        let accounts = self
            .inner
            .service
            .list_accounts()
            .await
            .map_err(|e| SyncError::RegistryUnavailable(e.to_string()))?;

        if !needs_balance_refresh(&accounts) {
            debug!(
                "[Sync] All {} accounts have balances, no automatic refresh",
                accounts.len()
            );
            return Ok(None);
        }

        info!("[Sync] Accounts without balance detected, starting automatic refresh");
        self.run_with_trigger(SyncScope::All, SyncTrigger::MissingBalances)
            .await
            .map(Some)
    }

    pub fn is_running(&self) -> bool {
        self.inner.active().is_some()
    }

    /// Stop polling the active cycle. Returns `false` when no cycle is running.
    ///
    /// Upstream jobs are left alone; a later cycle picks up any that are
    /// still pending without starting them again.
    pub fn cancel_active(&self) -> bool {
        match self.inner.active().as_ref() {
            Some(cycle) => {
                info!("[Sync] Cancelling cycle {}", cycle.cycle_id);
                cycle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel the active cycle and refuse new ones.
    pub fn shutdown(&self) {
        info!("[Sync] Orchestrator shutting down");
        self.inner.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Resolves once [`shutdown`](Self::shutdown) has been called.
    pub async fn shutdown_requested(&self) {
        self.inner.shutdown.cancelled().await
    }

    fn attach_or_start(
        &self,
        scope: SyncScope,
        trigger: SyncTrigger,
    ) -> watch::Receiver<Option<CycleResult>> {
        let mut active = self.inner.active();
        if let Some(cycle) = active.as_ref() {
            info!(
                "[Sync] Cycle {} already running, attaching {:?} request",
                cycle.cycle_id, trigger
            );
            return cycle.done.clone();
        }

        let cycle_id = Uuid::new_v4().to_string();
        let cancel = self.inner.shutdown.child_token();
        let (tx, rx) = watch::channel(None);
        *active = Some(ActiveCycle {
            cycle_id: cycle_id.clone(),
            cancel: cancel.clone(),
            done: rx.clone(),
        });
        drop(active);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let result = {
                let _slot = ActiveSlot(&inner);
                inner.run_cycle(&cycle_id, scope, trigger, &cancel).await
            };
            // The slot is free before waiters wake, so they can start a new cycle.
            let _ = tx.send(Some(result));
        });

        rx
    }
}

impl<P: SyncProgressReporter> Inner<P> {
    fn active(&self) -> MutexGuard<'_, Option<ActiveCycle>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run_cycle(
        &self,
        cycle_id: &str,
        scope: SyncScope,
        trigger: SyncTrigger,
        cancel: &CancellationToken,
    ) -> CycleResult {
        let started_at = Utc::now();
        info!("[Sync] Cycle {} started (trigger: {:?})", cycle_id, trigger);
        self.progress_reporter.report_sync_start(cycle_id);

        let result = self.execute(cycle_id, scope, trigger, cancel).await;

        match &result {
            Ok(report) => {
                info!(
                    "[Sync] Cycle {} finished: {} ({} jobs)",
                    cycle_id,
                    report.outcome,
                    report.jobs.len()
                );
                self.progress_reporter.report_sync_complete(report);
            }
            Err(err) => {
                error!("[Sync] Cycle {} failed: {}", cycle_id, err);
                self.notifier.notify(NotificationKind::Failed);
                let failed_report = SyncReport {
                    cycle_id: cycle_id.to_string(),
                    trigger,
                    outcome: AggregateOutcome::Failed,
                    balance_outcome: None,
                    balance_partial: false,
                    jobs: Vec::new(),
                    started_at,
                    completed_at: Some(Utc::now()),
                    reloaded: false,
                };
                self.progress_reporter.report_sync_complete(&failed_report);
            }
        }

        result
    }

    async fn execute(
        &self,
        cycle_id: &str,
        scope: SyncScope,
        trigger: SyncTrigger,
        cancel: &CancellationToken,
    ) -> CycleResult {
        let started_at = Utc::now();
        let deadline = Instant::now() + self.config.max_cycle_duration;

        let mut report = SyncReport {
            cycle_id: cycle_id.to_string(),
            trigger,
            outcome: AggregateOutcome::NoConnections,
            balance_outcome: None,
            balance_partial: false,
            jobs: Vec::new(),
            started_at,
            completed_at: None,
            reloaded: false,
        };

        // Step 1: snapshot connections
        let connections = self.registry.list_active_connections().await?;
        let connection_ids = select_connections(&connections, &scope);
        if connection_ids.is_empty() {
            info!("[Sync] Cycle {}: no connections in scope", cycle_id);
            report.completed_at = Some(Utc::now());
            self.finish(&mut report).await;
            return Ok(report);
        }
        info!(
            "[Sync] Cycle {}: syncing {} connections",
            cycle_id,
            connection_ids.len()
        );

        // Steps 2-3: balance refresh and fetch starts go out together
        let (balance, starts) = tokio::join!(
            self.service.refresh_balances(),
            join_all(connection_ids.iter().map(|id| self.tracker.start(id)))
        );

        let balance_error = match balance {
            Ok(refresh) => {
                match &refresh {
                    BalanceRefresh::Success { partial: true } => {
                        info!("[Sync] Cycle {}: balances partially refreshed", cycle_id)
                    }
                    BalanceRefresh::Success { partial: false } => {
                        debug!("[Sync] Cycle {}: balances refreshed", cycle_id)
                    }
                    BalanceRefresh::RateLimited => {
                        warn!("[Sync] Cycle {}: balance refresh rate limited", cycle_id)
                    }
                    BalanceRefresh::Failed(message) => {
                        warn!(
                            "[Sync] Cycle {}: balance refresh failed: {}",
                            cycle_id, message
                        )
                    }
                }
                report.balance_partial = matches!(refresh, BalanceRefresh::Success { partial: true });
                report.balance_outcome = Some(ComponentOutcome::from(&refresh));
                None
            }
            Err(err) => {
                warn!(
                    "[Sync] Cycle {}: balance refresh request failed: {}",
                    cycle_id, err
                );
                report.balance_outcome = Some(ComponentOutcome::Failed);
                Some(err)
            }
        };

        let mut pending: Vec<String> = Vec::new();
        let mut dispatched: Vec<SyncJob> = Vec::with_capacity(connection_ids.len());
        let mut dispatch_errors = 0usize;
        for (id, start) in connection_ids.iter().zip(starts) {
            match start {
                Ok(job) => {
                    if job.state == JobState::Pending {
                        pending.push(id.clone());
                    }
                    dispatched.push(job);
                }
                Err(err) => {
                    if err.is_transport() {
                        dispatch_errors += 1;
                    }
                    dispatched.extend(self.tracker.job(id));
                }
            }
        }
        for job in &dispatched {
            self.report_job(cycle_id, job, pending.len());
        }

        if let Some(err) = balance_error {
            if err.is_transport() && dispatch_errors == connection_ids.len() {
                self.tracker.release(&connection_ids);
                return Err(SyncError::DispatchUnavailable(format!(
                    "balance refresh and all {} fetch starts failed: {}",
                    connection_ids.len(),
                    err
                )));
            }
        }

        // Steps 4-5: poll until every job is terminal
        let cancelled = self.poll_until_terminal(cycle_id, pending, deadline, cancel).await;

        let jobs: Vec<SyncJob> = connection_ids
            .iter()
            .filter_map(|id| self.tracker.job(id))
            .collect();
        report.jobs = jobs.iter().map(JobReport::from).collect();

        if cancelled {
            let still_pending = jobs.iter().filter(|job| !job.is_terminal()).count();
            info!(
                "[Sync] Cycle {} cancelled, leaving {} jobs pending upstream",
                cycle_id, still_pending
            );
            self.tracker.release(&connection_ids);
            report.outcome = AggregateOutcome::Cancelled;
            return Ok(report);
        }

        // Step 6: aggregate
        debug_assert!(jobs.iter().all(SyncJob::is_terminal));
        let components = report.balance_outcome.into_iter().chain(
            jobs.iter()
                .filter_map(|job| ComponentOutcome::from_job_state(job.state)),
        );
        report.outcome = aggregate(components);
        report.completed_at = Some(Utc::now());
        self.tracker.release(&connection_ids);

        // Step 7: reload and notify, once
        self.finish(&mut report).await;
        Ok(report)
    }

    /// Poll rounds until `pending` drains. Returns `true` if cancelled.
    async fn poll_until_terminal(
        &self,
        cycle_id: &str,
        mut pending: Vec<String>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> bool {
        let total = pending.len();
        let mut round = 0usize;

        while !pending.is_empty() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return true,
                _ = tokio::time::sleep_until(deadline) => {
                    self.expire_pending(cycle_id, &pending, total);
                    return false;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            round += 1;
            debug!(
                "[Sync] Cycle {}: poll round {} for {} jobs",
                cycle_id,
                round,
                pending.len()
            );

            let polls = join_all(pending.iter().map(|id| self.tracker.poll(id)));
            let states = tokio::select! {
                biased;
                _ = cancel.cancelled() => return true,
                _ = tokio::time::sleep_until(deadline) => {
                    self.expire_pending(cycle_id, &pending, total);
                    return false;
                }
                states = polls => states,
            };

            let mut still_pending = Vec::with_capacity(pending.len());
            let mut finished = Vec::new();
            for (id, state) in pending.into_iter().zip(states) {
                match state {
                    Ok(state) if state.is_terminal() => finished.push(id),
                    Ok(_) => still_pending.push(id),
                    Err(err) => {
                        warn!(
                            "[Sync] Cycle {}: status read failed for {}, retrying next round: {}",
                            cycle_id, id, err
                        );
                        still_pending.push(id);
                    }
                }
            }
            pending = still_pending;

            for id in &finished {
                if let Some(job) = self.tracker.job(id) {
                    self.report_job(cycle_id, &job, pending.len());
                }
            }
        }

        false
    }

    fn expire_pending(&self, cycle_id: &str, pending: &[String], total: usize) {
        warn!(
            "[Sync] Cycle {} timed out with {} of {} jobs pending",
            cycle_id,
            pending.len(),
            total
        );
        for id in pending {
            if let Err(err) = self.tracker.expire(id, "sync cycle timed out") {
                debug!("[Sync] Could not expire job for {}: {}", id, err);
            }
            if let Some(job) = self.tracker.job(id) {
                self.report_job(cycle_id, &job, 0);
            }
        }
    }

    /// Reload dependent data and emit the cycle's single notification.
    async fn finish(&self, report: &mut SyncReport) {
        let (accounts, transactions) = tokio::join!(
            self.service.list_accounts(),
            self.service
                .list_recent_transactions(self.config.recent_transactions_days)
        );

        match (accounts, transactions) {
            (Ok(accounts), Ok(transactions)) => {
                debug!(
                    "[Sync] Cycle {}: reloaded {} accounts, {} transactions",
                    report.cycle_id,
                    accounts.len(),
                    transactions.len()
                );
                self.reload_sink.reload(DataReload {
                    accounts,
                    transactions,
                });
                report.reloaded = true;
            }
            (Err(err), _) | (_, Err(err)) => {
                warn!("[Sync] Cycle {}: reload failed: {}", report.cycle_id, err);
            }
        }

        if let Some(kind) = report.outcome.notification_kind() {
            self.notifier.notify(kind);
        }
    }

    fn report_job(&self, cycle_id: &str, job: &SyncJob, pending_jobs: usize) {
        let mut payload = JobProgressPayload::new(cycle_id, &job.connection_id, job.state)
            .with_pending_jobs(pending_jobs);
        if let Some(error) = &job.error {
            payload = payload.with_message(error.clone());
        }
        self.progress_reporter.report_job_progress(payload);
    }
}

/// Connection ids covered by `scope`, in registry order.
fn select_connections(connections: &[Connection], scope: &SyncScope) -> Vec<String> {
    match scope {
        SyncScope::All => connections.iter().map(|c| c.id.clone()).collect(),
        SyncScope::Connections(wanted) => {
            let wanted: HashSet<&str> = wanted.iter().map(String::as_str).collect();
            connections
                .iter()
                .filter(|c| wanted.contains(c.id.as_str()))
                .map(|c| c.id.clone())
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FetchStart, FetchStatus};
    use crate::testing::{
        account, account_with_balance, MockAccountService, RecordingNotificationSink,
        RecordingProgressReporter, RecordingReloadSink,
    };
    use rust_decimal_macros::dec;

    struct Harness {
        service: Arc<MockAccountService>,
        notifier: Arc<RecordingNotificationSink>,
        reloads: Arc<RecordingReloadSink>,
        progress: Arc<RecordingProgressReporter>,
        orchestrator: SyncOrchestrator<RecordingProgressReporter>,
    }

    fn test_config() -> SyncConfig {
        SyncConfig {
            poll_interval: Duration::from_secs(1),
            max_cycle_duration: Duration::from_secs(30),
            recent_transactions_days: 7,
        }
    }

    fn harness(service: MockAccountService) -> Harness {
        harness_with_config(service, test_config())
    }

    fn harness_with_config(service: MockAccountService, config: SyncConfig) -> Harness {
        let service = Arc::new(service);
        let notifier = Arc::new(RecordingNotificationSink::new());
        let reloads = Arc::new(RecordingReloadSink::new());
        let progress = Arc::new(RecordingProgressReporter::new());
        let orchestrator = SyncOrchestrator::with_progress_reporter(
            service.clone(),
            notifier.clone(),
            reloads.clone(),
            progress.clone(),
            config,
        );
        Harness {
            service,
            notifier,
            reloads,
            progress,
            orchestrator,
        }
    }

    fn three_connections() -> Vec<Account> {
        vec![
            account("acc-1", "conn-1"),
            account("acc-2", "conn-2"),
            account("acc-3", "conn-3"),
        ]
    }

    #[test]
    fn test_sync_config_default() {
        let config = SyncConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.max_cycle_duration, Duration::from_secs(300));
        assert_eq!(config.recent_transactions_days, 30);
    }

    #[test]
    fn test_needs_balance_refresh() {
        assert!(!needs_balance_refresh(&[]));
        assert!(!needs_balance_refresh(&[account_with_balance(
            "acc-1",
            "conn-1",
            dec!(10.50)
        )]));
        assert!(needs_balance_refresh(&[
            account_with_balance("acc-1", "conn-1", dec!(10.50)),
            account("acc-2", "conn-1"),
        ]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_takes_priority_over_failure() {
        let h = harness(
            MockAccountService::new()
                .with_accounts(three_connections())
                .with_start("conn-3", FetchStart::RateLimited)
                .with_statuses("conn-1", vec![FetchStatus::Pending, FetchStatus::Completed])
                .with_statuses("conn-2", vec![FetchStatus::Failed]),
        );

        let report = h.orchestrator.run(SyncScope::All).await.unwrap();

        assert_eq!(report.outcome, AggregateOutcome::RateLimited);
        assert_eq!(h.notifier.kinds(), vec![NotificationKind::PartialRateLimited]);
        assert_eq!(h.reloads.count(), 1);
        assert!(report.reloaded);
        assert!(report.completed_at.is_some());

        for id in ["conn-1", "conn-2", "conn-3"] {
            assert_eq!(h.service.start_calls_for(id), 1);
        }
        assert_eq!(h.service.status_calls_for("conn-3"), 0);
        assert_eq!(h.service.balance_calls(), 1);

        let states: Vec<JobState> = report.jobs.iter().map(|j| j.state).collect();
        assert_eq!(
            states,
            vec![JobState::Completed, JobState::Failed, JobState::RateLimited]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_connections_completes_immediately() {
        let h = harness(MockAccountService::new());

        let report = h.orchestrator.run(SyncScope::All).await.unwrap();

        assert_eq!(report.outcome, AggregateOutcome::NoConnections);
        assert!(report.jobs.is_empty());
        assert!(h.service.start_calls().is_empty());
        assert_eq!(h.service.status_calls(), 0);
        assert_eq!(h.service.balance_calls(), 0);
        assert_eq!(h.notifier.kinds(), vec![NotificationKind::Success]);
        assert_eq!(h.reloads.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_still_pending_at_timeout_fails() {
        let config = SyncConfig {
            poll_interval: Duration::from_secs(1),
            max_cycle_duration: Duration::from_secs(10),
            recent_transactions_days: 7,
        };
        let h = harness_with_config(
            MockAccountService::new()
                .with_accounts(vec![account("acc-1", "conn-1")])
                .with_statuses("conn-1", vec![FetchStatus::Pending]),
            config,
        );

        let report = h.orchestrator.run(SyncScope::All).await.unwrap();

        assert_eq!(report.outcome, AggregateOutcome::Failed);
        assert_eq!(report.jobs[0].state, JobState::Failed);
        assert_eq!(report.jobs[0].error.as_deref(), Some("sync cycle timed out"));
        assert_eq!(h.notifier.kinds(), vec![NotificationKind::Failed]);
        assert_eq!(h.reloads.count(), 1);
        // One round per interval before the deadline, never more
        assert!(h.service.status_calls_for("conn-1") <= 10);
        assert!(h.orchestrator.inner.tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_runs_share_one_cycle() {
        let h = harness(
            MockAccountService::new()
                .with_accounts(vec![account("acc-1", "conn-1"), account("acc-2", "conn-2")])
                .with_statuses(
                    "conn-1",
                    vec![
                        FetchStatus::Pending,
                        FetchStatus::Pending,
                        FetchStatus::Pending,
                        FetchStatus::Completed,
                    ],
                ),
        );

        let first = {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.run(SyncScope::All).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(h.orchestrator.is_running());

        let second = h
            .orchestrator
            .run_with_trigger(SyncScope::All, SyncTrigger::MissingBalances)
            .await
            .unwrap();
        let first = first.await.unwrap().unwrap();

        assert_eq!(first.cycle_id, second.cycle_id);
        assert_eq!(second.trigger, SyncTrigger::Manual);
        assert_eq!(h.service.start_calls_for("conn-1"), 1);
        assert_eq!(h.service.start_calls_for("conn-2"), 1);
        assert_eq!(h.notifier.count(), 1);
        assert_eq!(h.reloads.count(), 1);
        assert_eq!(h.progress.starts(), 1);
        assert_eq!(h.progress.completes().len(), 1);
        assert!(!h.orchestrator.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_runs_start_new_cycles() {
        let h = harness(MockAccountService::new().with_accounts(vec![account("acc-1", "conn-1")]));

        let first = h.orchestrator.run(SyncScope::All).await.unwrap();
        let second = h.orchestrator.run(SyncScope::All).await.unwrap();

        assert_ne!(first.cycle_id, second.cycle_id);
        assert_eq!(h.service.start_calls_for("conn-1"), 2);
        assert_eq!(h.notifier.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_cycle_leaves_job_for_next_run() {
        let h = harness(
            MockAccountService::new()
                .with_accounts(vec![account("acc-1", "conn-1")])
                .with_statuses("conn-1", vec![FetchStatus::Pending]),
        );

        let running = {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.run(SyncScope::All).await })
        };
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert!(h.orchestrator.cancel_active());

        let cancelled = running.await.unwrap().unwrap();
        assert_eq!(cancelled.outcome, AggregateOutcome::Cancelled);
        assert!(cancelled.completed_at.is_none());
        assert_eq!(h.notifier.count(), 0);
        assert_eq!(h.reloads.count(), 0);
        assert!(h.orchestrator.inner.tracker.outstanding("conn-1").is_some());

        // The upstream job finishes; the next cycle re-attaches instead of starting again
        h.service.set_statuses("conn-1", vec![FetchStatus::Completed]);
        let report = h.orchestrator.run(SyncScope::All).await.unwrap();

        assert_eq!(report.outcome, AggregateOutcome::Success);
        assert_eq!(h.service.start_calls_for("conn-1"), 1);
        assert_eq!(h.notifier.kinds(), vec![NotificationKind::Success]);
        assert!(h.orchestrator.inner.tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_without_active_cycle() {
        let h = harness(MockAccountService::new());
        assert!(!h.orchestrator.cancel_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_balance_rate_limit_does_not_abort_fetch() {
        let h = harness(
            MockAccountService::new()
                .with_accounts(vec![account("acc-1", "conn-1")])
                .with_balance(BalanceRefresh::RateLimited),
        );

        let report = h.orchestrator.run(SyncScope::All).await.unwrap();

        assert_eq!(report.outcome, AggregateOutcome::RateLimited);
        assert_eq!(report.balance_outcome, Some(ComponentOutcome::RateLimited));
        assert_eq!(report.jobs[0].state, JobState::Completed);
        assert_eq!(h.service.start_calls_for("conn-1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_balance_refresh_is_success() {
        let h = harness(
            MockAccountService::new()
                .with_accounts(vec![account("acc-1", "conn-1")])
                .with_balance(BalanceRefresh::Success { partial: true }),
        );

        let report = h.orchestrator.run(SyncScope::All).await.unwrap();

        assert_eq!(report.outcome, AggregateOutcome::Success);
        assert!(report.balance_partial);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_failure_is_hard_error() {
        let h = harness(
            MockAccountService::new().with_accounts_error(SyncError::transport("dns failure")),
        );

        let err = h.orchestrator.run(SyncScope::All).await.unwrap_err();

        assert!(matches!(err, SyncError::RegistryUnavailable(_)));
        assert_eq!(h.notifier.kinds(), vec![NotificationKind::Failed]);
        assert_eq!(h.reloads.count(), 0);
        assert!(h.service.start_calls().is_empty());
        assert!(!h.orchestrator.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_dispatch_failure_is_hard_error() {
        let h = harness(
            MockAccountService::new()
                .with_accounts(vec![account("acc-1", "conn-1"), account("acc-2", "conn-2")])
                .with_balance_error(SyncError::transport("offline"))
                .with_start_error("conn-1", SyncError::transport("offline"))
                .with_start_error("conn-2", SyncError::transport("offline")),
        );

        let err = h.orchestrator.run(SyncScope::All).await.unwrap_err();

        assert!(matches!(err, SyncError::DispatchUnavailable(_)));
        assert_eq!(h.notifier.count(), 1);
        assert_eq!(h.service.status_calls(), 0);
        assert!(h.orchestrator.inner.tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_start_failure_is_folded() {
        let h = harness(
            MockAccountService::new()
                .with_accounts(vec![account("acc-1", "conn-1"), account("acc-2", "conn-2")])
                .with_start_error("conn-1", SyncError::transport("reset")),
        );

        let report = h.orchestrator.run(SyncScope::All).await.unwrap();

        assert_eq!(report.outcome, AggregateOutcome::Failed);
        assert_eq!(report.jobs[0].state, JobState::Failed);
        assert_eq!(report.jobs[1].state, JobState::Completed);
        assert_eq!(h.service.status_calls_for("conn-1"), 0);
        assert_eq!(h.notifier.kinds(), vec![NotificationKind::Failed]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_read_error_keeps_polling() {
        let h = harness(
            MockAccountService::new()
                .with_accounts(vec![account("acc-1", "conn-1")])
                .with_status_results(
                    "conn-1",
                    vec![
                        Err(SyncError::transport("timeout")),
                        Ok(FetchStatus::Completed),
                    ],
                ),
        );

        let report = h.orchestrator.run(SyncScope::All).await.unwrap();

        assert_eq!(report.outcome, AggregateOutcome::Success);
        assert_eq!(h.service.status_calls_for("conn-1"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scope_subset() {
        let h = harness(MockAccountService::new().with_accounts(three_connections()));

        let report = h
            .orchestrator
            .run(SyncScope::Connections(vec![
                "conn-2".to_string(),
                "conn-unknown".to_string(),
            ]))
            .await
            .unwrap();

        assert_eq!(report.jobs.len(), 1);
        assert_eq!(report.jobs[0].connection_id, "conn-2");
        assert_eq!(h.service.start_calls(), vec!["conn-2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_scope_subset_is_no_connections() {
        let h = harness(MockAccountService::new().with_accounts(three_connections()));

        let report = h
            .orchestrator
            .run(SyncScope::Connections(vec!["conn-9".to_string()]))
            .await
            .unwrap();

        assert_eq!(report.outcome, AggregateOutcome::NoConnections);
        assert_eq!(h.notifier.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_refresh_skipped_when_balances_present() {
        let h = harness(
            MockAccountService::new()
                .with_accounts(vec![account_with_balance("acc-1", "conn-1", dec!(42))]),
        );

        let report = h.orchestrator.run_if_balances_missing().await.unwrap();

        assert!(report.is_none());
        assert!(h.service.start_calls().is_empty());
        assert_eq!(h.notifier.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_refresh_runs_when_balance_missing() {
        let h = harness(MockAccountService::new().with_accounts(vec![account("acc-1", "conn-1")]));

        let report = h.orchestrator.run_if_balances_missing().await.unwrap().unwrap();

        assert_eq!(report.trigger, SyncTrigger::MissingBalances);
        assert_eq!(report.outcome, AggregateOutcome::Success);
        assert_eq!(h.notifier.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_refuses_new_cycles() {
        let h = harness(MockAccountService::new());
        h.orchestrator.shutdown();

        let err = h.orchestrator.run(SyncScope::All).await.unwrap_err();
        assert_eq!(err, SyncError::Cancelled);
        assert_eq!(h.notifier.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_polling_cancels_cycle() {
        let h = harness(
            MockAccountService::new()
                .with_accounts(vec![account("acc-1", "conn-1")])
                .with_statuses("conn-1", vec![FetchStatus::Pending]),
        );

        let running = {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.run(SyncScope::All).await })
        };
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(h.orchestrator.is_running());
        h.orchestrator.shutdown();

        let report = running.await.unwrap().unwrap();
        assert_eq!(report.outcome, AggregateOutcome::Cancelled);
        assert_eq!(h.notifier.count(), 0);
        assert_eq!(h.reloads.count(), 0);
        assert!(h.orchestrator.inner.tracker.outstanding("conn-1").is_some());
        assert!(h.orchestrator.is_shut_down());
        assert_eq!(
            h.orchestrator.run(SyncScope::All).await.unwrap_err(),
            SyncError::Cancelled
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_requested_resolves_after_shutdown() {
        let h = harness(MockAccountService::new());
        let waiter = {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.shutdown_requested().await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!waiter.is_finished());

        h.orchestrator.shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_mid_round_keeps_completed_jobs() {
        let config = SyncConfig {
            poll_interval: Duration::from_secs(1),
            max_cycle_duration: Duration::from_secs(10),
            recent_transactions_days: 7,
        };
        let h = harness_with_config(
            MockAccountService::new()
                .with_accounts(vec![account("acc-1", "conn-1"), account("acc-2", "conn-2")])
                .with_statuses("conn-1", vec![FetchStatus::Completed])
                .with_statuses("conn-2", vec![FetchStatus::Completed])
                .with_status_delay("conn-2", Duration::from_secs(60)),
            config,
        );

        let report = h.orchestrator.run(SyncScope::All).await.unwrap();

        let states: Vec<(String, JobState)> = report
            .jobs
            .iter()
            .map(|job| (job.connection_id.clone(), job.state))
            .collect();
        assert_eq!(
            states,
            vec![
                ("conn-1".to_string(), JobState::Completed),
                ("conn-2".to_string(), JobState::Failed),
            ]
        );
        assert_eq!(report.jobs[0].error, None);
        assert_eq!(report.jobs[1].error.as_deref(), Some("sync cycle timed out"));
        assert_eq!(report.outcome, AggregateOutcome::Failed);
        assert_eq!(h.notifier.kinds(), vec![NotificationKind::Failed]);
        assert!(h.orchestrator.inner.tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_progress_counts_only_pending_jobs() {
        let h = harness(
            MockAccountService::new()
                .with_accounts(three_connections())
                .with_start("conn-2", FetchStart::RateLimited)
                .with_start("conn-3", FetchStart::Failed("rejected".to_string())),
        );

        h.orchestrator.run(SyncScope::All).await.unwrap();

        let dispatch: Vec<(JobState, usize)> = h
            .progress
            .progress()
            .iter()
            .take(3)
            .map(|p| (p.state, p.pending_jobs))
            .collect();
        assert_eq!(
            dispatch,
            vec![
                (JobState::Pending, 1),
                (JobState::RateLimited, 1),
                (JobState::Failed, 1),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_carries_fresh_data() {
        let h = harness(MockAccountService::new().with_accounts(vec![account("acc-1", "conn-1")]));

        h.orchestrator.run(SyncScope::All).await.unwrap();

        let reload = h.reloads.last().unwrap();
        assert_eq!(reload.accounts.len(), 1);
        assert_eq!(h.service.list_transactions_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_reported_per_job() {
        let h = harness(MockAccountService::new().with_accounts(vec![account("acc-1", "conn-1")]));

        h.orchestrator.run(SyncScope::All).await.unwrap();

        let states: Vec<JobState> = h.progress.progress().iter().map(|p| p.state).collect();
        assert_eq!(states, vec![JobState::Pending, JobState::Completed]);
        assert_eq!(h.progress.completes()[0].outcome, AggregateOutcome::Success);
    }
}
