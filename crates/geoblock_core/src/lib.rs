//! # geoblock core
//!
//! Block-indexed sorted key-value store for very large geospatial record
//! sets.
//!
//! This crate provides:
//! - A spatial sort key ([`GeoKey`]) from fixed-point coordinates
//! - Fixed-stride, optionally compressed block files ([`BlockStore`])
//! - The index file partitioning key space over blocks ([`IndexFile`])
//! - Bulk flush and merge of sorted runs ([`flush_run`])
//! - Range and point lookups ([`Reader`])
//! - Id and spatial lookup tables built after ingest ([`secondary`])
//! - Bulk ingest sessions ([`IngestSession`])
//!
//! ## Example
//!
//! ```rust
//! use geoblock_core::{GeoKey, IngestSession, NodeRecord, StoreConfig};
//!
//! let config = StoreConfig::new().block_size(4096).capacity(100).flush_interval(500);
//! let mut session = IngestSession::<NodeRecord>::in_memory(config).unwrap();
//! for id in 1..=1000u64 {
//!     session.push(NodeRecord::new(id, GeoKey::new(id * 7).coordinate())).unwrap();
//! }
//! let (store, summary) = session.finish().unwrap();
//! assert_eq!(summary.flushes, 2);
//!
//! let hits = store
//!     .reader()
//!     .lookup_range(GeoKey::new(70), GeoKey::new(140))
//!     .collect_vec()
//!     .unwrap();
//! assert_eq!(hits.len(), 10);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod block;
mod config;
mod dir;
mod error;
mod geo;
mod index;
mod merge;
mod reader;
mod record;
pub mod secondary;
mod session;
#[cfg(test)]
mod testing;

pub use block::BlockStore;
pub use config::{StoreConfig, BLOCK_COUNT_PREFIX, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
pub use dir::{StoreDir, StorePaths};
pub use error::{CoreError, CoreResult};
pub use geo::{Coordinate, GeoKey, COORD_SCALE, LAT_LIMIT, LON_LIMIT};
pub use geoblock_codec::{CodecError, Compression};
pub use index::{IndexEntry, IndexFile, IndexHeader, FORMAT_VERSION, INDEX_ENTRY_SIZE, INDEX_HEADER_SIZE};
pub use merge::{flush_run, split_size, FlushStats};
pub use reader::{BlockIter, RangeIter, RangeScan, Reader};
pub use record::{BlockRecord, NodeRecord, WayRecord};
pub use session::{IngestSession, IngestSummary, Store};
