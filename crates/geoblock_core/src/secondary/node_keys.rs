//! Node keys by id, one bounded id window at a time.
//!
//! Keying ways by their first node, and bucketing ways by every node they
//! reference, both need node keys looked up by node id. A full table for
//! every id would not fit memory at planet scale, so the lookup is split
//! into windows of `count` ids, each built by one pass over the node store.

use crate::error::{CoreError, CoreResult};
use crate::geo::GeoKey;
use crate::reader::Reader;
use crate::record::{BlockRecord, NodeRecord, WayRecord};
use tracing::{debug, info};

/// Default number of node ids held in memory at once.
pub const DEFAULT_CHUNK_LEN: usize = 200_000_000;

// Node keys come from clamped coordinates and never reach u64::MAX.
const UNKNOWN: u64 = u64::MAX;

/// Keys of the nodes with ids in `[offset, offset + count)`.
#[derive(Debug, Clone)]
pub struct NodeKeyChunk {
    offset: u64,
    keys: Vec<u64>,
}

impl NodeKeyChunk {
    /// Builds the chunk in one pass over the node store.
    ///
    /// # Errors
    ///
    /// Returns storage or codec errors from the scan.
    pub fn build(nodes: &Reader<'_, NodeRecord>, offset: u64, count: usize) -> CoreResult<Self> {
        let mut keys = vec![UNKNOWN; count];
        for item in nodes.scan_block_order() {
            let (_, records) = item?;
            for node in records {
                if let Some(slot) = node
                    .id
                    .checked_sub(offset)
                    .and_then(|i| usize::try_from(i).ok())
                    .and_then(|i| keys.get_mut(i))
                {
                    *slot = node.key().as_u64();
                }
            }
        }
        debug!(offset, count, "built node key chunk");
        Ok(Self { offset, keys })
    }

    /// First id covered.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// One past the last id covered.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.keys.len() as u64
    }

    /// True if `id` falls inside this chunk's window.
    #[must_use]
    pub fn covers(&self, id: u64) -> bool {
        (self.offset..self.end()).contains(&id)
    }

    /// Key of node `id`, if the window covers it and the node exists.
    #[must_use]
    pub fn key_of(&self, id: u64) -> Option<GeoKey> {
        let index = usize::try_from(id.checked_sub(self.offset)?).ok()?;
        match self.keys.get(index) {
            Some(&UNKNOWN) | None => None,
            Some(&key) => Some(GeoKey::new(key)),
        }
    }
}

/// Windows `(offset, count)` covering node ids `1..=max_id`.
///
/// # Errors
///
/// Returns `InvalidConfig` for a zero `chunk_len`.
pub fn chunk_windows(max_id: u64, chunk_len: usize) -> CoreResult<Vec<(u64, usize)>> {
    if chunk_len == 0 {
        return Err(CoreError::invalid_config("node chunk length must be positive"));
    }
    let step = chunk_len as u64;
    let mut windows = Vec::new();
    let mut offset = 1;
    while offset <= max_id {
        let count = (max_id - offset + 1).min(step) as usize;
        windows.push((offset, count));
        offset += step;
    }
    Ok(windows)
}

/// A way as parsed: id and node references, not yet keyed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawWay {
    /// Way id.
    pub id: u64,
    /// Referenced node ids, in order.
    pub refs: Vec<u64>,
}

impl RawWay {
    /// Creates a parsed way.
    #[must_use]
    pub fn new(id: u64, refs: Vec<u64>) -> Self {
        Self { id, refs }
    }
}

/// Ways keyed by their first node.
#[derive(Debug, Clone, Default)]
pub struct WayResolution {
    /// Keyed ways, in input order.
    pub ways: Vec<WayRecord>,
    /// Ways dropped because their first node is unknown or they have none.
    pub skipped: usize,
}

/// Keys each way by the key of its first node.
///
/// Node keys are loaded `chunk_len` ids at a time for ids up to
/// `max_node_id`.
///
/// # Errors
///
/// Returns `InvalidConfig` for a zero `chunk_len` and storage or codec
/// errors from the node scans.
pub fn resolve_way_keys(
    nodes: &Reader<'_, NodeRecord>,
    ways: Vec<RawWay>,
    max_node_id: u64,
    chunk_len: usize,
) -> CoreResult<WayResolution> {
    let mut keys: Vec<Option<GeoKey>> = vec![None; ways.len()];

    for (offset, count) in chunk_windows(max_node_id, chunk_len)? {
        let chunk = NodeKeyChunk::build(nodes, offset, count)?;
        for (way, key) in ways.iter().zip(keys.iter_mut()) {
            if let Some(&first) = way.refs.first() {
                if chunk.covers(first) {
                    *key = chunk.key_of(first);
                }
            }
        }
    }

    let mut resolution = WayResolution::default();
    for (way, key) in ways.into_iter().zip(keys) {
        match key {
            Some(key) => resolution.ways.push(WayRecord::new(way.id, key, way.refs)),
            None => resolution.skipped += 1,
        }
    }

    info!(
        kind = WayRecord::KIND,
        keyed = resolution.ways.len(),
        skipped = resolution.skipped,
        "resolved way keys"
    );
    Ok(resolution)
}
