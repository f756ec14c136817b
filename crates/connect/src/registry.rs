//! Read-only view of the linked bank connections.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::{debug, warn};

use crate::error::{Result, SyncError};
use crate::models::{Account, Connection};
use crate::traits::AccountDataService;

/// Groups listed accounts into their connections.
///
/// Every call is a fresh snapshot; nothing is cached between cycles.
#[derive(Clone)]
pub struct ConnectionRegistry {
    service: Arc<dyn AccountDataService>,
}

impl ConnectionRegistry {
    pub fn new(service: Arc<dyn AccountDataService>) -> Self {
        Self { service }
    }

    /// Snapshot the currently linked connections, ordered by id.
    ///
    /// A listing failure is returned as [`SyncError::RegistryUnavailable`] so
    /// callers never confuse it with an empty connection set.
    pub async fn list_active_connections(&self) -> Result<Vec<Connection>> {
        let accounts = self.service.list_accounts().await.map_err(|e| {
            warn!("[Registry] Failed to list accounts: {}", e);
            SyncError::RegistryUnavailable(e.to_string())
        })?;

        let connections = group_connections(&accounts);
        debug!(
            "[Registry] {} accounts grouped into {} connections",
            accounts.len(),
            connections.len()
        );
        Ok(connections)
    }
}

/// Group accounts by connection id. Accounts with a blank connection id are skipped.
pub fn group_connections(accounts: &[Account]) -> Vec<Connection> {
    let mut grouped: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
    for account in accounts {
        let connection_id = account.connection_id.trim();
        if connection_id.is_empty() {
            debug!("[Registry] Account {} has no connection, skipping", account.id);
            continue;
        }
        grouped
            .entry(connection_id)
            .or_default()
            .insert(account.id.clone());
    }

    grouped
        .into_iter()
        .map(|(id, account_ids)| Connection {
            id: id.to_string(),
            account_ids,
        })
        .collect()
}
