//! Payload records held in blocks.
//!
//! A block holds records of one kind. Fixed-size kinds weigh one unit
//! each, so the block capacity is a record count. Variable-size kinds
//! weigh their size in words, so the capacity is a word budget.

use crate::error::{CoreError, CoreResult};
use crate::geo::{Coordinate, GeoKey};
use std::fmt;

/// A record that can be stored in a block.
pub trait BlockRecord: Clone + fmt::Debug + Send + Sync + 'static {
    /// Short name used in file names and logs.
    const KIND: &'static str;

    /// Upper bound on encoded bytes per capacity unit.
    const UNIT_BYTES: usize;

    /// Entity id. Ids are positive.
    fn id(&self) -> u64;

    /// Sort key.
    fn key(&self) -> GeoKey;

    /// Size in capacity units. At least 1.
    fn weight(&self) -> usize;

    /// Appends the encoded record to `buf`.
    fn encode_into(&self, buf: &mut Vec<u8>);

    /// Decodes one record from the front of `buf`, returning it and the
    /// number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns `Corrupted` if `buf` is truncated.
    fn decode_from(buf: &[u8]) -> CoreResult<(Self, usize)>;
}

/// A point entity: id and coordinate.
///
/// ```text
/// | id: u64 (8) | lat: i32 (4) | lon: i32 (4) |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRecord {
    /// Node id.
    pub id: u64,
    /// Position.
    pub coord: Coordinate,
}

impl NodeRecord {
    /// Encoded size in bytes.
    pub const ENCODED_SIZE: usize = 16;

    /// Creates a node record.
    #[must_use]
    pub const fn new(id: u64, coord: Coordinate) -> Self {
        Self { id, coord }
    }
}

impl BlockRecord for NodeRecord {
    const KIND: &'static str = "nodes";
    const UNIT_BYTES: usize = Self::ENCODED_SIZE;

    fn id(&self) -> u64 {
        self.id
    }

    fn key(&self) -> GeoKey {
        self.coord.key()
    }

    fn weight(&self) -> usize {
        1
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.coord.lat.to_le_bytes());
        buf.extend_from_slice(&self.coord.lon.to_le_bytes());
    }

    fn decode_from(buf: &[u8]) -> CoreResult<(Self, usize)> {
        let bytes = buf
            .get(..Self::ENCODED_SIZE)
            .ok_or_else(|| CoreError::corrupted("truncated node record"))?;
        let id = read_u64(bytes, 0)?;
        let lat = read_u32(bytes, 8)? as i32;
        let lon = read_u32(bytes, 12)? as i32;
        Ok((Self::new(id, Coordinate::new(lat, lon)), Self::ENCODED_SIZE))
    }
}

/// A compound entity: id, the key of its first node, and its node list.
///
/// ```text
/// | id: u64 (8) | key: u64 (8) | count: u32 (4) | refs: u64 * count |
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WayRecord {
    /// Way id.
    pub id: u64,
    /// Key of the first referenced node.
    pub key: GeoKey,
    /// Referenced node ids, in order.
    pub refs: Vec<u64>,
}

impl WayRecord {
    /// Words charged for the fixed header (id, key, count).
    pub const HEADER_WORDS: usize = 3;

    const HEADER_BYTES: usize = 20;

    /// Creates a way record.
    #[must_use]
    pub fn new(id: u64, key: GeoKey, refs: Vec<u64>) -> Self {
        Self { id, key, refs }
    }
}

impl BlockRecord for WayRecord {
    const KIND: &'static str = "ways";
    const UNIT_BYTES: usize = 8;

    fn id(&self) -> u64 {
        self.id
    }

    fn key(&self) -> GeoKey {
        self.key
    }

    fn weight(&self) -> usize {
        Self::HEADER_WORDS + self.refs.len()
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.key.as_u64().to_le_bytes());
        buf.extend_from_slice(&(self.refs.len() as u32).to_le_bytes());
        for node in &self.refs {
            buf.extend_from_slice(&node.to_le_bytes());
        }
    }

    fn decode_from(buf: &[u8]) -> CoreResult<(Self, usize)> {
        if buf.len() < Self::HEADER_BYTES {
            return Err(CoreError::corrupted("truncated way header"));
        }
        let id = read_u64(buf, 0)?;
        let key = GeoKey::new(read_u64(buf, 8)?);
        let count = read_u32(buf, 16)? as usize;

        let end = Self::HEADER_BYTES + count * 8;
        if buf.len() < end {
            return Err(CoreError::corrupted(format!(
                "way {id} claims {count} refs beyond block end"
            )));
        }

        let refs = (0..count)
            .map(|i| read_u64(buf, Self::HEADER_BYTES + i * 8))
            .collect::<CoreResult<Vec<_>>>()?;

        Ok((Self { id, key, refs }, end))
    }
}

pub(crate) fn read_u32(buf: &[u8], at: usize) -> CoreResult<u32> {
    buf.get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| CoreError::corrupted(format!("truncated u32 at offset {at}")))
}

pub(crate) fn read_u64(buf: &[u8], at: usize) -> CoreResult<u64> {
    buf.get(at..at + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| CoreError::corrupted(format!("truncated u64 at offset {at}")))
}
