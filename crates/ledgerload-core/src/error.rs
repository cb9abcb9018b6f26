//! Error types for the apply core

use thiserror::Error;

/// Errors surfaced by a ledger driver
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Connection to the ledger failed
    #[error("ledger connection failed: {0}")]
    Connection(String),

    /// Optimistic-concurrency conflict detected at commit
    #[error("optimistic concurrency conflict: {0}")]
    Conflict(String),

    /// A mutation referenced a table the ledger does not know
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// Backend I/O or query error
    #[error("ledger backend error: {0}")]
    Backend(String),

    /// Serialization/deserialization error at the driver boundary
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for ledger driver operations
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Errors surfaced by the writer while applying events
#[derive(Error, Debug)]
pub enum LoadError {
    /// Ledger driver failure (including exhausted OCC retries)
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// An event passed validation but could not be planned as a mutation
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// A batch transaction was aborted because one event did not pass
    #[error("batch rejected at event {index}: {message}")]
    BatchRejected { index: usize, message: String },
}

/// Fatal misconfiguration detected at startup
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required variable is not set
    #[error("missing required configuration: {name}")]
    MissingVar { name: &'static str },

    /// A variable is set but cannot be interpreted
    #[error("invalid configuration {name}: {reason}")]
    InvalidVar { name: &'static str, reason: String },

    /// The table mapping file could not be read
    #[error("failed to read mapping file {path}: {reason}")]
    MappingFile { path: String, reason: String },

    /// The table mapping file could not be interpreted
    #[error("malformed mapping definition: {0}")]
    MappingParse(String),
}
