//! # geoblock storage
//!
//! Byte store backends for the geoblock block files.
//!
//! Backends are **opaque byte stores**: they know nothing about blocks,
//! index entries or codecs. Writes are random-access overwrites, since the
//! block store rewrites fixed-stride slots in place.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral stores
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use geoblock_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.write_at(8, b"block").unwrap();
//! assert_eq!(backend.size().unwrap(), 13);
//! assert_eq!(backend.read_at(8, 5).unwrap(), b"block");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
