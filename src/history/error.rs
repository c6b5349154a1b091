//! History storage error types
//!
//! Defines all errors that can occur in the history layer.

use thiserror::Error;

/// Errors that can occur while building or querying a state history
#[derive(Error, Debug)]
pub enum HistoryError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Data corruption detected (bad magic, bad type tag, overflowing counts)
    #[error("Corrupt history data: {0}")]
    Corruption(String),

    /// A node block could not be read back; caller may rebuild
    #[error("Node #{0} missing or unreadable")]
    NodeMissing(u32),

    /// On-disk file was produced by an incompatible writer
    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    /// The history file was never properly closed
    #[error("History file is incomplete; it must be rebuilt before querying")]
    IncompleteHistory,

    /// Timestamp outside the range covered by the tree
    #[error("Timestamp {t} outside of history range [{start}, {end}]")]
    TimeOutOfRange { t: i64, start: i64, end: i64 },

    /// Caller handed us an interval that violates the insertion contract
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    /// Mutation attempted after the tree was closed
    #[error("History tree is already closed")]
    AlreadyClosed,

    /// Construction pipeline fault
    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

/// Result type alias for history operations
pub type HistoryResult<T> = Result<T, HistoryError>;
