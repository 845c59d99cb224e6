//! Error types for the logpi indexing pipeline.
use std::fmt;

/// Result type alias for indexer operations.
pub type Result<T> = std::result::Result<T, IndexError>;

/// Main error type for the indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// I/O errors (file open/read failures).
    Io(String),

    /// The output index file could not be opened or written.
    OutputFailed(String),

    /// Malformed index output (used by readers of the `.lpi` format).
    Format(String),

    /// A resource cap was exceeded: too many entries, too many buckets.
    ResourceLimitExceeded(String),

    /// Allocation failure on a worker slot, index insert, or queue grow.
    AllocationFailed(String),

    /// General errors not covered by the above.
    Other(String),
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexError::Io(msg) => write!(f, "I/O error: {msg}"),
            IndexError::OutputFailed(msg) => write!(f, "output write failed: {msg}"),
            IndexError::Format(msg) => write!(f, "format error: {msg}"),
            IndexError::ResourceLimitExceeded(msg) => write!(f, "resource limit exceeded: {msg}"),
            IndexError::AllocationFailed(msg) => write!(f, "allocation failed: {msg}"),
            IndexError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for IndexError {}

impl From<std::io::Error> for IndexError {
    fn from(err: std::io::Error) -> Self {
        IndexError::Io(err.to_string())
    }
}

impl From<String> for IndexError {
    fn from(msg: String) -> Self {
        IndexError::Other(msg)
    }
}

impl From<&str> for IndexError {
    fn from(msg: &str) -> Self {
        IndexError::Other(msg.to_string())
    }
}
