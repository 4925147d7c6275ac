//! # geoblock codec
//!
//! Pluggable block compression for geoblock data files.
//!
//! Every block slot starts with a 4-byte little-endian signed header:
//!
//! ```text
//! | header: i32 (4) | payload (|header| bytes) | zero padding |
//! ```
//!
//! - `header > 0`: payload is compressed, `header` is its length
//! - `header <= 0`: payload is stored raw, `-header` is its length
//!
//! Input that does not shrink, or is too small to bother with, is stored
//! raw. [`Compression::None`] always stores raw.
//!
//! ## Usage
//!
//! ```
//! use geoblock_codec::{BlockCodec, Compression};
//!
//! let mut codec = BlockCodec::new(Compression::Lz4);
//! let raw = vec![7u8; 1000];
//! let mut slot = vec![0u8; 1024];
//! let written = codec.compress(&raw, &mut slot).unwrap();
//! assert!(written < raw.len());
//!
//! let mut out = vec![0u8; 1000];
//! let len = codec.decompress(&slot, &mut out).unwrap();
//! assert_eq!(&out[..len], &raw[..]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod compression;
mod error;
mod frame;

pub use codec::BlockCodec;
pub use compression::Compression;
pub use error::{CodecError, CodecResult};
pub use frame::{FrameHeader, FRAME_HEADER_SIZE};
