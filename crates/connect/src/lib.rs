//! Tallyboard Connect - bank connection sync for Tallyboard.
//!
//! This crate drives balance and transaction refresh across every linked
//! bank connection, tracks each connection's upstream fetch job to a
//! terminal state, and reports one aggregate outcome per sync cycle. It also
//! keeps the dashboard filters in step with the remote user profile without
//! echo loops.

pub mod client;
mod error;
mod models;
mod orchestrator;
pub mod outcome;
mod preferences;
mod progress;
mod registry;
pub mod testing;
mod tracker;
mod traits;

pub use client::{BankApiClient, DEFAULT_API_URL};
pub use error::{Result, SyncError};
pub use models::*;
pub use orchestrator::{needs_balance_refresh, SyncConfig, SyncOrchestrator};
pub use outcome::{aggregate, ComponentOutcome};
pub use preferences::{ApplyOutcome, PersistOutcome, PreferenceSyncGuard, Suppression};
pub use progress::{JobProgressPayload, NoOpProgressReporter, SyncProgressReporter};
pub use registry::{group_connections, ConnectionRegistry};
pub use tracker::SyncJobTracker;
pub use traits::*;
