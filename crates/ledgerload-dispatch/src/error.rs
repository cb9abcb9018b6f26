//! Error types for channel dispatch

use thiserror::Error;

use ledgerload_core::LoadError;

/// Errors surfaced to the delivery channel. A raised error tells the
/// channel to retry the batch (or item) under its own policy.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// A record body could not be decoded at all
    #[error("failed to decode record: {0}")]
    Decode(String),

    /// One item failed and the channel raises on first failure
    #[error("item {item_id} failed: {message}")]
    ItemFailed { item_id: String, message: String },

    /// The batch was fully processed but some items failed
    #[error("{failed} of {total} items failed; first failure: {first}")]
    BatchFailed {
        failed: usize,
        total: usize,
        first: String,
    },

    /// Apply-core failure outside any single item's validation
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Result type for dispatch operations
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;
