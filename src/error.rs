//! Crate-level error taxonomy.
//!
//! Local subsystems keep their own small error enums (`BufferError`,
//! `ConfigError`, `TimeError`); this type is the boundary the channels,
//! correlator, and service facade speak.  End-of-stream is NOT an error;
//! consumers see it as `Ok(None)` from `MessageBuffer::take`.  A frame
//! rejection is data, carried on the frame status.

use crate::buffer::BufferError;
use crate::config::ConfigError;
use crate::models::time::TimeError;

#[derive(Debug, thiserror::Error)]
pub enum DpError {
    /// Empty source set, inverted range, or an otherwise unusable request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Operation on a component in the wrong lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A producer hit a buffer that is draining or closed.
    #[error("buffer is shutting down")]
    ShuttingDown,

    /// A per-operation or per-stream deadline expired.
    #[error("deadline expired: {0}")]
    Timeout(String),

    /// Cooperative cancellation was observed.
    #[error("operation cancelled")]
    Cancelled,

    /// RPC-level failure; fatal to its stream.
    #[error("transport: {0}")]
    Transport(#[from] tonic::Status),

    /// A bucket whose value count disagrees with its timestamp count.
    #[error("invalid bucket: {0}")]
    InvalidBucket(String),

    /// Two buckets for one source landed in the same correlated block
    /// while domain collisions are disallowed.
    #[error("duplicate source {src} in correlated block")]
    DuplicateSourceInBlock { src: String },

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Time(#[from] TimeError),
}

impl From<BufferError> for DpError {
    fn from(e: BufferError) -> Self {
        match e {
            BufferError::ShuttingDown => DpError::ShuttingDown,
            BufferError::InvalidState(state) => {
                DpError::InvalidState(format!("buffer is {state:?}"))
            }
            BufferError::Full => {
                DpError::InvalidState("buffer is full and blocking is disabled".to_owned())
            }
        }
    }
}
