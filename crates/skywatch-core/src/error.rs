//! Error types for the skywatch wire protocol.

use thiserror::Error;

/// Result type alias for protocol operations.
pub type ProtoResult<T> = Result<T, ProtoError>;

/// Errors raised while decoding notifications or encoding commands.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The frame is not a notification envelope at all.
    #[error("undecodable frame: {0}")]
    Decode(String),

    /// A single row of a notification is missing required fields.
    #[error("malformed notification row {key}: {reason}")]
    Malformed { key: String, reason: String },

    #[error("encode error: {0}")]
    Encode(String),

    #[error("unknown filter value: {0}")]
    UnknownFilter(String),
}
