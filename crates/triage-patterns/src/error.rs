//! Error types for pattern storage and classification

use triage_model::PatternId;

/// Failure reported by a [`crate::PatternBackend`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Backing service unreachable or refusing requests
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Backing service did not answer in time
    #[error("backend timed out")]
    Timeout,

    /// Stored value is unreadable
    #[error("corrupt value at {key}: {reason}")]
    Corrupt {
        /// Key holding the value
        key: String,
        /// Why it could not be read
        reason: String,
    },
}

impl BackendError {
    /// Whether the failure says something about the connection
    #[inline]
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, BackendError::Unavailable(_) | BackendError::Timeout)
    }
}

/// Pattern store failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Store is disconnected or could not reconnect
    #[error("pattern store connectivity: {0}")]
    Connectivity(String),

    /// `update` on a pattern that does not exist
    #[error("pattern {0} not found")]
    NotFound(PatternId),

    /// Value could not be encoded or decoded
    #[error("pattern serialization: {0}")]
    Serialization(String),

    /// Non-transport backend failure
    #[error("pattern backend: {0}")]
    Backend(BackendError),
}

impl StoreError {
    /// Whether this is a connectivity failure
    #[inline]
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(self, StoreError::Connectivity(_))
    }
}

impl From<BackendError> for StoreError {
    fn from(err: BackendError) -> Self {
        if err.is_transport() {
            StoreError::Connectivity(err.to_string())
        } else {
            StoreError::Backend(err)
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Classification could not consult the pattern store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassificationError {
    /// Store query failed
    #[error("pattern lookup failed: {0}")]
    Store(#[from] StoreError),
}
