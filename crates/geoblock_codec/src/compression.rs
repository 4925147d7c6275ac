//! Compression method identifiers.

use crate::error::{CodecError, CodecResult};
use std::fmt;

/// Compression method applied to each block.
///
/// The discriminant is persisted in the index file header, so values
/// must never be renumbered.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Compression {
    /// Blocks are stored raw.
    None = 0,
    /// Zlib (deflate with zlib header).
    Zlib = 1,
    /// LZ4 block format.
    #[default]
    Lz4 = 2,
}

impl Compression {
    /// Returns the persisted id.
    #[must_use]
    pub const fn id(self) -> u16 {
        self as u16
    }

    /// Parses a persisted id.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCompression` for ids this build does not know.
    pub fn from_id(id: u16) -> CodecResult<Self> {
        match id {
            0 => Ok(Self::None),
            1 => Ok(Self::Zlib),
            2 => Ok(Self::Lz4),
            other => Err(CodecError::UnknownCompression(other)),
        }
    }

    /// Inputs shorter than this are always stored raw.
    #[must_use]
    pub const fn min_input_len(self) -> usize {
        match self {
            Self::None => usize::MAX,
            Self::Zlib => 64,
            Self::Lz4 => 16,
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Zlib => "zlib",
            Self::Lz4 => "lz4",
        };
        f.write_str(name)
    }
}
