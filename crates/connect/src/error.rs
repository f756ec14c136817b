//! Error types for the connect crate.
//!
//! Payloads are kept as strings so a single cycle result can be cloned out to
//! every caller attached to that cycle.

use thiserror::Error;

use crate::models::JobState;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while syncing bank connections.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// The connection registry could not be read this cycle.
    /// This is not the same as "the user has no connections".
    #[error("Connection registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// Neither the balance refresh nor any fetch start could be dispatched.
    #[error("Sync dispatch unavailable: {0}")]
    DispatchUnavailable(String),

    /// Network-level failure talking to an upstream service.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Error response from an upstream service.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Response body could not be decoded.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// No job is tracked for the connection.
    #[error("No sync job tracked for connection {0}")]
    UnknownJob(String),

    /// A transition was attempted on a job that already reached a terminal state.
    #[error("Sync job for connection {connection_id} is already {state}")]
    TerminalJob {
        connection_id: String,
        state: JobState,
    },

    /// Profile read or write failed.
    #[error("Profile sync failed: {0}")]
    Profile(String),

    /// The orchestrator was shut down.
    #[error("Sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Whether the error came from the network layer rather than an upstream answer.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
