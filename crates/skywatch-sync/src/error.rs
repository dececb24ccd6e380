//! Error types for the sync engine and session driver.

use std::time::Duration;

use thiserror::Error;

use skywatch_core::ProtoError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("transport closed: {0}")]
    TransportClosed(String),

    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),

    #[error("gave up after losing {0} connections")]
    RetryExhausted(u32),

    #[error("sync session is no longer running")]
    SessionClosed,

    #[error(transparent)]
    Protocol(#[from] ProtoError),
}
