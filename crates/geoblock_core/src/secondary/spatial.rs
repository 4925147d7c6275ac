//! Coarse spatial bucket to block membership.
//!
//! ## File Format
//!
//! ```text
//! | bucket: u64 (8) | block: u32 (4) |  * pair count, sorted, distinct
//! ```

use crate::dir::atomic_write;
use crate::error::{CoreError, CoreResult};
use crate::geo::GeoKey;
use crate::reader::Reader;
use crate::record::{read_u32, read_u64, BlockRecord, NodeRecord, WayRecord};
use crate::secondary::node_keys::{chunk_windows, NodeKeyChunk};
use std::path::Path;
use tracing::info;

/// Size of one persisted pair.
pub const SPATIAL_ENTRY_SIZE: usize = 12;

/// Sorted, deduplicated `(bucket, block)` pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpatialBucketIndex {
    shift: u32,
    pairs: Vec<(u64, u32)>,
}

impl SpatialBucketIndex {
    /// Creates an index from arbitrary pairs.
    #[must_use]
    pub fn from_pairs(shift: u32, mut pairs: Vec<(u64, u32)>) -> Self {
        pairs.sort_unstable();
        pairs.dedup();
        Self { shift, pairs }
    }

    /// Buckets a store of point-like records by each record's own key,
    /// at the bucket shift of the store's configuration.
    ///
    /// # Errors
    ///
    /// Returns storage or codec errors from the scan.
    pub fn build_points<R: BlockRecord>(reader: &Reader<'_, R>) -> CoreResult<Self> {
        let shift = reader.config().bucket_shift;
        let mut pairs = Vec::new();
        for item in reader.blocks_key_order() {
            let (entry, records) = item?;
            pairs.extend(records.iter().map(|r| (r.key().bucket(shift), entry.block)));
            pairs.dedup();
        }
        let index = Self::from_pairs(shift, pairs);
        info!(kind = R::KIND, pairs = index.len(), "built spatial index");
        Ok(index)
    }

    /// Buckets a way store by the key of every node each way references.
    ///
    /// Node keys are loaded `chunk_len` ids at a time for ids up to
    /// `max_node_id`, with one pass over the way store per chunk. Buckets use
    /// the shift of the way store's configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a zero `chunk_len` and storage or codec
    /// errors from the scans.
    pub fn build_ways(
        ways: &Reader<'_, WayRecord>,
        nodes: &Reader<'_, NodeRecord>,
        max_node_id: u64,
        chunk_len: usize,
    ) -> CoreResult<Self> {
        let shift = ways.config().bucket_shift;
        let mut pairs = Vec::new();
        for (offset, count) in chunk_windows(max_node_id, chunk_len)? {
            let chunk = NodeKeyChunk::build(nodes, offset, count)?;
            for item in ways.scan_block_order() {
                let (entry, records) = item?;
                for way in &records {
                    pairs.extend(
                        way.refs
                            .iter()
                            .filter_map(|&node| chunk.key_of(node))
                            .map(|key| (key.bucket(shift), entry.block)),
                    );
                }
            }
            // Keep memory proportional to distinct pairs between chunks.
            pairs.sort_unstable();
            pairs.dedup();
        }
        let index = Self::from_pairs(shift, pairs);
        info!(kind = WayRecord::KIND, pairs = index.len(), "built spatial index");
        Ok(index)
    }

    /// Bucket shift the pairs were built with.
    #[must_use]
    pub fn shift(&self) -> u32 {
        self.shift
    }

    /// All pairs in order.
    #[must_use]
    pub fn pairs(&self) -> &[(u64, u32)] {
        &self.pairs
    }

    /// Number of pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// True if no pairs are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Distinct blocks touching any bucket in `lo..=hi`, in ascending order.
    #[must_use]
    pub fn blocks_for_bucket_range(&self, lo: u64, hi: u64) -> Vec<u32> {
        if lo > hi {
            return Vec::new();
        }
        let start = self.pairs.partition_point(|&(bucket, _)| bucket < lo);
        let mut blocks: Vec<u32> = self.pairs[start..]
            .iter()
            .take_while(|&&(bucket, _)| bucket <= hi)
            .map(|&(_, block)| block)
            .collect();
        blocks.sort_unstable();
        blocks.dedup();
        blocks
    }

    /// Distinct blocks touching the buckets of keys in `[lo, hi)`.
    #[must_use]
    pub fn blocks_for_key_range(&self, lo: GeoKey, hi: GeoKey) -> Vec<u32> {
        if lo >= hi {
            return Vec::new();
        }
        let last = GeoKey::new(hi.as_u64() - 1);
        self.blocks_for_bucket_range(lo.bucket(self.shift), last.bucket(self.shift))
    }

    /// Encodes the pairs as flat 12-byte entries.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.pairs.len() * SPATIAL_ENTRY_SIZE);
        for &(bucket, block) in &self.pairs {
            data.extend_from_slice(&bucket.to_le_bytes());
            data.extend_from_slice(&block.to_le_bytes());
        }
        data
    }

    /// Decodes pairs written by [`SpatialBucketIndex::encode`].
    ///
    /// # Errors
    ///
    /// Returns `Corrupted` for a partial entry or unsorted pairs.
    pub fn decode(shift: u32, data: &[u8]) -> CoreResult<Self> {
        if data.len() % SPATIAL_ENTRY_SIZE != 0 {
            return Err(CoreError::corrupted(format!(
                "spatial index of {} bytes is not a whole number of pairs",
                data.len()
            )));
        }
        let pairs = data
            .chunks_exact(SPATIAL_ENTRY_SIZE)
            .map(|chunk| Ok((read_u64(chunk, 0)?, read_u32(chunk, 8)?)))
            .collect::<CoreResult<Vec<_>>>()?;
        if pairs.windows(2).any(|w| w[0] >= w[1]) {
            return Err(CoreError::corrupted("spatial index pairs not sorted"));
        }
        Ok(Self { shift, pairs })
    }

    /// Writes the pairs atomically to `path`.
    ///
    /// # Errors
    ///
    /// Returns I/O errors from the write.
    pub fn persist(&self, path: &Path) -> CoreResult<()> {
        atomic_write(path, &self.encode())
    }

    /// Reads pairs from `path`.
    ///
    /// # Errors
    ///
    /// Returns I/O errors and `Corrupted` for a damaged file.
    pub fn load(path: &Path, shift: u32) -> CoreResult<Self> {
        Self::decode(shift, &std::fs::read(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockStore;
    use crate::config::StoreConfig;
    use crate::index::IndexFile;
    use crate::merge::flush_run;
    use tempfile::tempdir;

    #[test]
    fn pairs_are_sorted_and_distinct() {
        let index = SpatialBucketIndex::from_pairs(4, vec![(3, 1), (1, 2), (3, 1), (1, 0)]);
        assert_eq!(index.pairs(), &[(1, 0), (1, 2), (3, 1)]);
    }

    #[test]
    fn bucket_range_query() {
        let index = SpatialBucketIndex::from_pairs(4, vec![(1, 5), (2, 3), (2, 5), (4, 1), (7, 0)]);
        assert_eq!(index.blocks_for_bucket_range(2, 4), vec![1, 3, 5]);
        assert_eq!(index.blocks_for_bucket_range(0, 1), vec![5]);
        assert!(index.blocks_for_bucket_range(5, 6).is_empty());
        assert!(index.blocks_for_bucket_range(4, 2).is_empty());
        // Keys 32..48 have bucket 2 at shift 4.
        assert_eq!(index.blocks_for_key_range(GeoKey::new(32), GeoKey::new(48)), vec![3, 5]);
    }

    #[test]
    fn point_store_buckets() {
        let config = StoreConfig::new().block_size(1024).capacity(4).bucket_shift(6);
        let mut index = IndexFile::new(&config);
        let mut store = BlockStore::<NodeRecord>::in_memory(config).unwrap();
        let run = (0..8u64)
            .map(|k| NodeRecord::new(k + 1, GeoKey::new(k * 16).coordinate()))
            .collect();
        flush_run(&mut index, &mut store, run).unwrap();

        let spatial = SpatialBucketIndex::build_points(&Reader::new(&index, &store)).unwrap();
        assert_eq!(spatial.shift(), 6);
        // Keys 0,16,32,48 | 64,80,96,112 fall in buckets 0 | 1 at shift 6.
        assert_eq!(spatial.pairs(), &[(0, 0), (1, 1)]);
    }

    #[test]
    fn way_store_buckets_follow_referenced_nodes() {
        let node_config = StoreConfig::new().block_size(1024).capacity(4);
        let mut node_index = IndexFile::new(&node_config);
        let mut node_store = BlockStore::<NodeRecord>::in_memory(node_config).unwrap();
        let nodes = (1..=6u64)
            .map(|id| NodeRecord::new(id, GeoKey::new(id * 100).coordinate()))
            .collect();
        flush_run(&mut node_index, &mut node_store, nodes).unwrap();

        let way_config = StoreConfig::new().block_size(1024).capacity(8).bucket_shift(8);
        let mut way_index = IndexFile::new(&way_config);
        let mut way_store = BlockStore::<WayRecord>::in_memory(way_config).unwrap();
        let ways = vec![
            WayRecord::new(1, GeoKey::new(100), vec![1, 6]),
            WayRecord::new(2, GeoKey::new(300), vec![3, 77]),
        ];
        flush_run(&mut way_index, &mut way_store, ways).unwrap();
        assert_eq!(way_index.len(), 2);

        let spatial = SpatialBucketIndex::build_ways(
            &Reader::new(&way_index, &way_store),
            &Reader::new(&node_index, &node_store),
            6,
            4,
        )
        .unwrap();
        // Node keys 100, 600, 300 give buckets 0, 2, 1. Node 77 is unknown.
        assert_eq!(spatial.pairs(), &[(0, 0), (1, 1), (2, 0)]);
    }

    #[test]
    fn persist_and_load() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("ways.spatial");
        let index = SpatialBucketIndex::from_pairs(36, vec![(9, 2), (1, 1)]);
        index.persist(&path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 24);
        assert_eq!(SpatialBucketIndex::load(&path, 36).unwrap(), index);
    }

    #[test]
    fn unsorted_file_is_corrupted() {
        let mut data = SpatialBucketIndex::from_pairs(0, vec![(1, 0)]).encode();
        data.extend(SpatialBucketIndex::from_pairs(0, vec![(0, 0)]).encode());
        assert!(matches!(
            SpatialBucketIndex::decode(0, &data),
            Err(CoreError::Corrupted { .. })
        ));
    }
}
