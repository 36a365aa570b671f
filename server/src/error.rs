use common::ProtocolError;
use thiserror::Error;

use crate::player_connections::ConnectionId;

/// Failures reported by a score store adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backing medium could not be reached. Callers retry these.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The request reached the store and failed for good (validation,
    /// missing table, permissions). Never retried.
    #[error("store request failed: {0}")]
    Failed(String),

    #[error("store rejected update for player {player_id}: {reason}")]
    Rejected { player_id: String, reason: String },

    #[error("corrupt record for player {player_id}: {reason}")]
    Corrupt { player_id: String, reason: String },
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// A score update that could not be applied and broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateError {
    #[error("store unavailable after {attempts} attempts: {source}")]
    StoreUnavailable {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(StoreError),
}

impl UpdateError {
    pub fn attempts(&self) -> u32 {
        match self {
            UpdateError::StoreUnavailable { attempts, .. } => *attempts,
            UpdateError::Store(_) => 1,
        }
    }
}

/// The target connection is gone; it has been removed from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("connection {0} lost")]
pub struct ConnectionLost(pub ConnectionId);

/// Outcome of handling one live-channel message that did not succeed.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed message: {0}")]
    Malformed(#[from] ProtocolError),

    #[error("update failed: {0}")]
    UpdateFailed(#[from] UpdateError),

    #[error(transparent)]
    ConnectionLost(#[from] ConnectionLost),
}
