//! Traits for the collaborators the sync orchestrator depends on.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    Account, BalanceRefresh, DataReload, FetchStart, FetchStatus, NotificationKind,
    PreferenceState, Profile, Transaction,
};

/// Trait for the bank account data API.
///
/// `Err` means the request could not be carried out (transport, decoding).
/// Rate limiting and upstream failures are regular `Ok` answers.
#[async_trait]
pub trait AccountDataService: Send + Sync {
    /// Refresh balances across every linked account (one request, not per connection)
    async fn refresh_balances(&self) -> Result<BalanceRefresh>;

    /// Ask the upstream to start fetching transactions for a connection
    async fn start_fetch(&self, connection_id: &str) -> Result<FetchStart>;

    /// Read the status of the fetch job for a connection
    async fn get_fetch_status(&self, connection_id: &str) -> Result<FetchStatus>;

    /// List every linked account
    async fn list_accounts(&self) -> Result<Vec<Account>>;

    /// List transactions booked within the last `days` days
    async fn list_recent_transactions(&self, days: u32) -> Result<Vec<Transaction>>;
}

/// Trait for the remote user profile.
#[async_trait]
pub trait ProfileService: Send + Sync {
    async fn get_profile(&self) -> Result<Profile>;

    /// Write the preference fields. The response echoes the stored profile.
    async fn patch_profile(&self, preferences: &PreferenceState) -> Result<Profile>;
}

/// Receives the single user-facing outcome of each cycle.
///
/// Fire-and-forget: implementations must not block and are never retried.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, kind: NotificationKind);
}

/// Receives the accounts/transactions reloaded after a cycle.
pub trait DataReloadSink: Send + Sync {
    fn reload(&self, data: DataReload);
}

/// The host's local filter state.
///
/// Hosts that observe their own state forward an `apply` to
/// [`PreferenceSyncGuard::on_local_change`](crate::PreferenceSyncGuard::on_local_change)
/// like any other change; the guard suppresses that persist.
pub trait PreferenceStore: Send + Sync {
    fn current(&self) -> PreferenceState;
    fn apply(&self, state: &PreferenceState);
}
