use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors surfaced by the list storage engine.
///
/// None of these are retried at this layer; callers decide whether to abort
/// the surrounding transaction or report a query failure.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying page read/write failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// An on-disk structure decoded to an out-of-range field.
    #[error("format error: {0}")]
    Format(String),
    /// Index or offset beyond the declared element count.
    #[error("{what} index {index} out of bounds (len {len})")]
    OutOfBounds {
        /// Structure that rejected the access.
        what: &'static str,
        /// Requested index.
        index: u64,
        /// Declared element count.
        len: u64,
    },
    /// Bulk population called out of its required increasing order.
    #[error("{what} populated out of order: got {got} after {last:?}")]
    OrderingViolation {
        /// Kind of id being populated.
        what: &'static str,
        /// Last id accepted so far.
        last: Option<u64>,
        /// Rejected id.
        got: u64,
    },
    /// A small-list field width would overflow.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(&'static str),
    /// Log or recovery data failed validation.
    #[error("corruption detected: {0}")]
    Corruption(String),
    /// API misuse, such as writing through a read-only transaction.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
}

impl StorageError {
    pub(crate) fn out_of_bounds(what: &'static str, index: u64, len: u64) -> Self {
        StorageError::OutOfBounds { what, index, len }
    }

    pub(crate) fn format(msg: impl Into<String>) -> Self {
        StorageError::Format(msg.into())
    }
}
