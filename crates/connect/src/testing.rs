//! In-memory collaborators for tests and local development.
//!
//! Every mock records the calls it receives so tests can assert on dispatch
//! counts and emissions.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::{Result, SyncError};
use crate::models::{
    Account, BalanceRefresh, DataReload, FetchStart, FetchStatus, NotificationKind,
    PreferenceState, Profile, SyncReport, Transaction,
};
use crate::progress::{JobProgressPayload, SyncProgressReporter};
use crate::traits::{
    AccountDataService, DataReloadSink, NotificationSink, PreferenceStore, ProfileService,
};

/// Account without a balance under `connection_id`.
pub fn account(id: &str, connection_id: &str) -> Account {
    Account {
        id: id.to_string(),
        name: Some(format!("Account {}", id)),
        connection_id: connection_id.to_string(),
        currency: Some("EUR".to_string()),
        balance: None,
        balance_updated_at: None,
    }
}

/// Account with a known balance under `connection_id`.
pub fn account_with_balance(id: &str, connection_id: &str, balance: Decimal) -> Account {
    Account {
        balance: Some(balance),
        balance_updated_at: Some(chrono::Utc::now()),
        ..account(id, connection_id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Account data service
// ─────────────────────────────────────────────────────────────────────────────

/// Scriptable [`AccountDataService`].
///
/// Defaults: balances succeed, every start is accepted, every status read
/// reports `completed`, no accounts, no transactions.
#[derive(Default)]
pub struct MockAccountService {
    balance: Mutex<Option<Result<BalanceRefresh>>>,
    starts: Mutex<HashMap<String, Result<FetchStart>>>,
    statuses: Mutex<HashMap<String, VecDeque<Result<FetchStatus>>>>,
    status_delays: Mutex<HashMap<String, Duration>>,
    accounts: Mutex<Option<Result<Vec<Account>>>>,
    transactions: Mutex<Vec<Transaction>>,
    start_calls: Mutex<Vec<String>>,
    status_calls: Mutex<Vec<String>>,
    balance_calls: AtomicUsize,
    list_accounts_calls: AtomicUsize,
    list_transactions_calls: AtomicUsize,
}

impl MockAccountService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(self, accounts: Vec<Account>) -> Self {
        *self.accounts.lock().unwrap() = Some(Ok(accounts));
        self
    }

    pub fn with_accounts_error(self, err: SyncError) -> Self {
        *self.accounts.lock().unwrap() = Some(Err(err));
        self
    }

    pub fn with_transactions(self, transactions: Vec<Transaction>) -> Self {
        *self.transactions.lock().unwrap() = transactions;
        self
    }

    pub fn with_balance(self, refresh: BalanceRefresh) -> Self {
        *self.balance.lock().unwrap() = Some(Ok(refresh));
        self
    }

    pub fn with_balance_error(self, err: SyncError) -> Self {
        *self.balance.lock().unwrap() = Some(Err(err));
        self
    }

    pub fn with_start(self, connection_id: &str, start: FetchStart) -> Self {
        self.starts
            .lock()
            .unwrap()
            .insert(connection_id.to_string(), Ok(start));
        self
    }

    pub fn with_start_error(self, connection_id: &str, err: SyncError) -> Self {
        self.starts
            .lock()
            .unwrap()
            .insert(connection_id.to_string(), Err(err));
        self
    }

    /// Status reads for `connection_id` return these in order; the last one repeats.
    pub fn with_statuses(self, connection_id: &str, statuses: Vec<FetchStatus>) -> Self {
        self.set_statuses(connection_id, statuses);
        self
    }

    pub fn set_statuses(&self, connection_id: &str, statuses: Vec<FetchStatus>) {
        self.statuses.lock().unwrap().insert(
            connection_id.to_string(),
            statuses.into_iter().map(Ok).collect(),
        );
    }

    /// Status reads return these results in order; the last one repeats.
    pub fn with_status_results(
        self,
        connection_id: &str,
        results: Vec<Result<FetchStatus>>,
    ) -> Self {
        self.statuses
            .lock()
            .unwrap()
            .insert(connection_id.to_string(), results.into());
        self
    }

    /// Each status read for `connection_id` takes `delay` before answering.
    pub fn with_status_delay(self, connection_id: &str, delay: Duration) -> Self {
        self.status_delays
            .lock()
            .unwrap()
            .insert(connection_id.to_string(), delay);
        self
    }

    pub fn start_calls(&self) -> Vec<String> {
        self.start_calls.lock().unwrap().clone()
    }

    pub fn start_calls_for(&self, connection_id: &str) -> usize {
        self.start_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|id| *id == connection_id)
            .count()
    }

    pub fn status_calls_for(&self, connection_id: &str) -> usize {
        self.status_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|id| *id == connection_id)
            .count()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.lock().unwrap().len()
    }

    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }

    pub fn list_accounts_calls(&self) -> usize {
        self.list_accounts_calls.load(Ordering::SeqCst)
    }

    pub fn list_transactions_calls(&self) -> usize {
        self.list_transactions_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccountDataService for MockAccountService {
    async fn refresh_balances(&self) -> Result<BalanceRefresh> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        self.balance
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(Ok(BalanceRefresh::Success { partial: false }))
    }

    async fn start_fetch(&self, connection_id: &str) -> Result<FetchStart> {
        self.start_calls
            .lock()
            .unwrap()
            .push(connection_id.to_string());
        self.starts
            .lock()
            .unwrap()
            .get(connection_id)
            .cloned()
            .unwrap_or(Ok(FetchStart::Accepted))
    }

    async fn get_fetch_status(&self, connection_id: &str) -> Result<FetchStatus> {
        self.status_calls
            .lock()
            .unwrap()
            .push(connection_id.to_string());
        let delay = self.status_delays.lock().unwrap().get(connection_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut statuses = self.statuses.lock().unwrap();
        match statuses.get_mut(connection_id) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap(),
            Some(script) => script.front().cloned().unwrap_or(Ok(FetchStatus::Completed)),
            None => Ok(FetchStatus::Completed),
        }
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        self.list_accounts_calls.fetch_add(1, Ordering::SeqCst);
        self.accounts
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(Ok(Vec::new()))
    }

    async fn list_recent_transactions(&self, _days: u32) -> Result<Vec<Transaction>> {
        self.list_transactions_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.transactions.lock().unwrap().clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sinks
// ─────────────────────────────────────────────────────────────────────────────

/// Collects every notification.
#[derive(Default)]
pub struct RecordingNotificationSink {
    kinds: Mutex<Vec<NotificationKind>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.kinds.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.kinds.lock().unwrap().len()
    }
}

impl NotificationSink for RecordingNotificationSink {
    fn notify(&self, kind: NotificationKind) {
        self.kinds.lock().unwrap().push(kind);
    }
}

/// Collects every reload.
#[derive(Default)]
pub struct RecordingReloadSink {
    reloads: Mutex<Vec<DataReload>>,
}

impl RecordingReloadSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.reloads.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<DataReload> {
        self.reloads.lock().unwrap().last().cloned()
    }
}

impl DataReloadSink for RecordingReloadSink {
    fn reload(&self, data: DataReload) {
        self.reloads.lock().unwrap().push(data);
    }
}

/// Collects progress events.
#[derive(Default)]
pub struct RecordingProgressReporter {
    starts: AtomicUsize,
    progress: Mutex<Vec<JobProgressPayload>>,
    completes: Mutex<Vec<SyncReport>>,
}

impl RecordingProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> Vec<JobProgressPayload> {
        self.progress.lock().unwrap().clone()
    }

    pub fn completes(&self) -> Vec<SyncReport> {
        self.completes.lock().unwrap().clone()
    }
}

impl SyncProgressReporter for RecordingProgressReporter {
    fn report_sync_start(&self, _cycle_id: &str) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn report_job_progress(&self, payload: JobProgressPayload) {
        self.progress.lock().unwrap().push(payload);
    }

    fn report_sync_complete(&self, report: &SyncReport) {
        self.completes.lock().unwrap().push(report.clone());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Profile & local preferences
// ─────────────────────────────────────────────────────────────────────────────

/// Remote profile held in memory. Patches are stored and echoed back.
pub struct MockProfileService {
    profile: Mutex<Profile>,
    patches: Mutex<Vec<PreferenceState>>,
    patch_error: Mutex<Option<SyncError>>,
    get_calls: AtomicUsize,
}

impl MockProfileService {
    pub fn new(preferences: PreferenceState) -> Self {
        Self {
            profile: Mutex::new(Profile {
                id: "user-1".to_string(),
                email: Some("user@example.com".to_string()),
                preferences,
                updated_at: None,
            }),
            patches: Mutex::new(Vec::new()),
            patch_error: Mutex::new(None),
            get_calls: AtomicUsize::new(0),
        }
    }

    /// Simulate an edit made from another session.
    pub fn set_remote_preferences(&self, preferences: PreferenceState) {
        self.profile.lock().unwrap().preferences = preferences;
    }

    pub fn fail_patches_with(&self, err: SyncError) {
        *self.patch_error.lock().unwrap() = Some(err);
    }

    pub fn patches(&self) -> Vec<PreferenceState> {
        self.patches.lock().unwrap().clone()
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileService for MockProfileService {
    async fn get_profile(&self) -> Result<Profile> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.profile.lock().unwrap().clone())
    }

    async fn patch_profile(&self, preferences: &PreferenceState) -> Result<Profile> {
        if let Some(err) = self.patch_error.lock().unwrap().clone() {
            return Err(err);
        }
        self.patches.lock().unwrap().push(preferences.clone());
        let mut profile = self.profile.lock().unwrap();
        profile.preferences = preferences.clone();
        profile.updated_at = Some(chrono::Utc::now());
        Ok(profile.clone())
    }
}

/// Local preference state held in memory.
#[derive(Default)]
pub struct MemoryPreferenceStore {
    state: Mutex<PreferenceState>,
    applied: Mutex<Vec<PreferenceState>>,
}

impl MemoryPreferenceStore {
    pub fn new(state: PreferenceState) -> Self {
        Self {
            state: Mutex::new(state),
            applied: Mutex::new(Vec::new()),
        }
    }

    /// Every state written through [`PreferenceStore::apply`].
    pub fn applied(&self) -> Vec<PreferenceState> {
        self.applied.lock().unwrap().clone()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn current(&self) -> PreferenceState {
        self.state.lock().unwrap().clone()
    }

    fn apply(&self, state: &PreferenceState) {
        *self.state.lock().unwrap() = state.clone();
        self.applied.lock().unwrap().push(state.clone());
    }
}
