//! Echo suppression between local filter state and the remote profile.
//!
//! Every local change is written to the profile, and every profile payload
//! (direct fetch or write response) may update local state. Without
//! suppression the write response would be applied locally, observed as a
//! new local change, and written again forever.
//!
//! The guard holds one suppression slot, so at most one flag is armed at a
//! time, and the transition it guards always consumes it. A persist skip
//! only matches the exact state that was applied; any other local change
//! clears it and is written. A guard belongs to one user session and is
//! mutated only through `&mut self`.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::models::{PreferenceState, Profile};
use crate::traits::{PreferenceStore, ProfileService};

/// The armed suppression flag, if any.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Suppression {
    #[default]
    None,
    /// Discard the next remote payload (it echoes our own write)
    SkipNextApply,
    /// Skip the next local change if it carries this applied remote value
    SkipNextPersist(PreferenceState),
}

/// What happened to a local change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Persisted,
    Suppressed,
}

/// What happened to a remote payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The payload echoed a local write and was dropped
    Discarded,
    /// The payload matched local state; nothing was applied
    Unchanged,
}

pub struct PreferenceSyncGuard {
    profile_service: Arc<dyn ProfileService>,
    store: Arc<dyn PreferenceStore>,
    suppression: Suppression,
}

impl PreferenceSyncGuard {
    pub fn new(profile_service: Arc<dyn ProfileService>, store: Arc<dyn PreferenceStore>) -> Self {
        Self {
            profile_service,
            store,
            suppression: Suppression::None,
        }
    }

    pub fn suppression(&self) -> &Suppression {
        &self.suppression
    }

    /// Local → remote. Call after every local filter change.
    ///
    /// On a successful write the response is routed through
    /// [`on_remote_payload`](Self::on_remote_payload) with the echo
    /// suppressed. A failed write leaves no flag armed and local state as is.
    pub async fn on_local_change(&mut self, state: &PreferenceState) -> Result<PersistOutcome> {
        if let Suppression::SkipNextPersist(applied) = std::mem::take(&mut self.suppression) {
            if applied == *state {
                debug!("[PreferenceSync] Skipping persist of remotely applied preferences");
                return Ok(PersistOutcome::Suppressed);
            }
            debug!("[PreferenceSync] Local change differs from applied preferences, persisting");
        }

        let echo = self
            .profile_service
            .patch_profile(state)
            .await
            .map_err(|e| {
                warn!("[PreferenceSync] Failed to persist preferences: {}", e);
                SyncError::Profile(e.to_string())
            })?;
        debug!("[PreferenceSync] Preferences persisted");

        self.suppression = Suppression::SkipNextApply;
        self.on_remote_payload(echo);
        Ok(PersistOutcome::Persisted)
    }

    /// Remote → local. Call with every profile payload that arrives.
    pub fn on_remote_payload(&mut self, profile: Profile) -> ApplyOutcome {
        if self.suppression == Suppression::SkipNextApply {
            self.suppression = Suppression::None;
            debug!("[PreferenceSync] Discarding echoed preferences");
            return ApplyOutcome::Discarded;
        }

        // Equal state is not applied: a store that ignores no-op writes would
        // otherwise leave SkipNextPersist armed for the next genuine change.
        if self.store.current() == profile.preferences {
            return ApplyOutcome::Unchanged;
        }

        info!("[PreferenceSync] Applying preferences from remote profile");
        self.store.apply(&profile.preferences);
        self.suppression = Suppression::SkipNextPersist(profile.preferences);
        ApplyOutcome::Applied
    }

    /// Fetch the profile and route it through [`on_remote_payload`](Self::on_remote_payload).
    pub async fn refresh_from_remote(&mut self) -> Result<ApplyOutcome> {
        let profile = self
            .profile_service
            .get_profile()
            .await
            .map_err(|e| SyncError::Profile(e.to_string()))?;
        Ok(self.on_remote_payload(profile))
    }
}
