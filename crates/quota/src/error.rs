use std::time::Duration;

use thiserror::Error;

use crate::UsageSnapshot;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Failures reported by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached.
    #[error("Storage connection error: {0}")]
    Connection(String),

    /// The backend rejected or failed a command.
    #[error("Storage query error: {0}")]
    Query(String),

    /// Local file I/O failed.
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The call did not finish within the configured timeout.
    #[error("Storage operation timed out after {0:?}")]
    Timeout(Duration),

    /// A conditional write lost a race against a concurrent writer.
    #[error("Concurrent modification: {0}")]
    Conflict(String),

    /// Stored data could not be decoded, or another unrecoverable error.
    #[error("Internal storage error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Whether repeating the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Io(_) | Self::Timeout(_) | Self::Conflict(_)
        )
    }

    /// Short machine-readable kind, used in logs and spans.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection_error",
            Self::Query(_) => "query_error",
            Self::Io(_) => "io_error",
            Self::Timeout(_) => "timeout",
            Self::Conflict(_) => "conflict",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("malformed stored data: {err}"))
    }
}

impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
            Self::Connection(err.to_string())
        } else {
            Self::Query(err.to_string())
        }
    }
}

/// Errors surfaced to callers of the quota API.
#[derive(Debug, Error)]
pub enum QuotaError {
    /// The client id failed validation. Raised before any storage access.
    #[error("Invalid client identity: {0:?}")]
    InvalidIdentity(String),

    /// Recording usage kept failing until the retry budget ran out. The
    /// snapshot is the state before the attempted increment, unchanged.
    #[error("Usage could not be recorded after {attempts} attempts: {source}")]
    StorageContention {
        attempts: u32,
        snapshot: UsageSnapshot,
        #[source]
        source: StorageError,
    },

    /// A non-retryable storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl QuotaError {
    /// Whether the error is caused by the caller rather than the backend.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidIdentity(_))
    }
}
