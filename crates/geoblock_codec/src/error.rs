//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while framing or unframing a block.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The raw block does not fit the destination slot, even stored raw.
    ///
    /// The caller has to reorganize the data into smaller blocks.
    #[error("compression overflow: {len} raw bytes do not fit a {capacity} byte slot")]
    CompressionOverflow {
        /// Length of the raw input.
        len: usize,
        /// Size of the destination slot, header included.
        capacity: usize,
    },

    /// The decoded block is larger than the output buffer.
    #[error("decoded block needs {needed} bytes, output buffer holds {capacity}")]
    OutputTooSmall {
        /// Bytes the frame claims or produced.
        needed: usize,
        /// Size of the output buffer.
        capacity: usize,
    },

    /// The frame header or body is malformed.
    #[error("corrupted frame: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// The underlying decompressor rejected the stream.
    #[error("decompression failed: {message}")]
    Decompress {
        /// Message from the decompressor.
        message: String,
    },

    /// The compression id is not known to this build.
    #[error("unknown compression id: {0}")]
    UnknownCompression(u16),
}

impl CodecError {
    /// Creates a corrupted frame error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a decompression error.
    pub fn decompress(message: impl Into<String>) -> Self {
        Self::Decompress {
            message: message.into(),
        }
    }
}
