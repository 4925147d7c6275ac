//! Auxiliary lookup structures built after a store is fully ingested.
//!
//! - [`IdBlockTable`]: id to block number, one `u16` per possible id
//! - [`SpatialBucketIndex`]: coarse bucket to block membership
//! - [`NodeKeyChunk`]: a bounded window of node keys by id, used to key
//!   and bucket ways

mod id_table;
mod node_keys;
mod spatial;

pub use id_table::{IdBlockTable, ABSENT_BLOCK};
pub use node_keys::{
    chunk_windows, resolve_way_keys, NodeKeyChunk, RawWay, WayResolution, DEFAULT_CHUNK_LEN,
};
pub use spatial::{SpatialBucketIndex, SPATIAL_ENTRY_SIZE};
