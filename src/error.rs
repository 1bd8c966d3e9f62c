use std::result;

/// Error type for core operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The configuration handed to `Raft::new` violates a constraint.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// An index lies beyond the last index of the log.
    #[error("index out of bound")]
    OutOfBound,

    /// An index lies below the log's first index; the entries there have
    /// been compacted into a snapshot and can no longer be served.
    #[error("log compacted")]
    LogCompacted,
}

pub type Result<T> = result::Result<T, Error>;
