//! Error types for the palaver-core crate

use thiserror::Error;

use palaver_api::{ApiError, DecodeError, TransferError};

/// Result type alias for palaver-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for palaver-core
#[derive(Error, Debug)]
pub enum Error {
    /// Imperative backend call failed
    #[error("api error: {0}")]
    Api(#[from] ApiError),

    /// Byte transfer failed during an upload
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Wire event could not be decoded
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Event processing errors
    #[error("event processing error: {0}")]
    EventProcessing(String),

    /// Local persistence errors (callers normally never see these; the cache
    /// absorbs them)
    #[error("persistence error: {0}")]
    Persistence(#[from] crate::persist::PersistenceError),
}
