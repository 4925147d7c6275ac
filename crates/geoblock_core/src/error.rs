//! Error types for geoblock core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in geoblock core operations.
///
/// Nothing in the core retries. Every error aborts the bulk load or
/// query that raised it.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] geoblock_storage::StorageError),

    /// Block codec error, including `CompressionOverflow`.
    #[error("codec error: {0}")]
    Codec(#[from] geoblock_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Index header does not match this build or the opening configuration.
    #[error("incompatible format: {message}")]
    IncompatibleFormat {
        /// Description of the mismatch.
        message: String,
    },

    /// A persisted file is damaged.
    #[error("corrupted store: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// A block would exceed its configured capacity.
    #[error("block {block} overflows: {needed} exceeds capacity {capacity}")]
    BlockOverflow {
        /// The block being written.
        block: u32,
        /// Units or bytes the block would need.
        needed: usize,
        /// Configured limit.
        capacity: usize,
    },

    /// A numbering space ran out.
    #[error("{what} exhausted at {limit}")]
    AllocationExhausted {
        /// What ran out (block numbers, table slots).
        what: &'static str,
        /// The ceiling that was hit.
        limit: u64,
    },

    /// A single record is heavier than a whole block.
    #[error("record {id} with weight {weight} exceeds block capacity {capacity}")]
    RecordTooLarge {
        /// Id of the offending record.
        id: u64,
        /// Weight of the record in capacity units.
        weight: usize,
        /// Configured block capacity.
        capacity: usize,
    },

    /// Record contents violate a precondition.
    #[error("invalid record: {message}")]
    InvalidRecord {
        /// Description of the problem.
        message: String,
    },

    /// Configuration values are inconsistent.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Another process holds the store directory lock.
    #[error("store locked: another process has write access")]
    StoreLocked,
}

impl CoreError {
    /// Creates an incompatible format error.
    pub fn incompatible_format(message: impl Into<String>) -> Self {
        Self::IncompatibleFormat {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates an invalid record error.
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for errors that signal a mismatch between configured
    /// capacity and actual payload size.
    #[must_use]
    pub fn is_capacity_violation(&self) -> bool {
        matches!(
            self,
            Self::BlockOverflow { .. }
                | Self::RecordTooLarge { .. }
                | Self::Codec(geoblock_codec::CodecError::CompressionOverflow { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoblock_codec::CodecError;

    #[test]
    fn capacity_violations_are_classified() {
        let overflow = CoreError::from(CodecError::CompressionOverflow {
            len: 10,
            capacity: 4,
        });
        assert!(overflow.is_capacity_violation());
        assert!(!CoreError::corrupted("x").is_capacity_violation());
    }

    #[test]
    fn io_error_keeps_os_code() {
        let err = CoreError::from(io::Error::from_raw_os_error(2));
        match err {
            CoreError::Io(inner) => assert_eq!(inner.raw_os_error(), Some(2)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
