//! Property-based test generators using proptest.
//!
//! Runs come out sorted by key and carry ids that are unique within one
//! generated value, so they can be handed straight to `flush_run`.

use geoblock_core::{
    BlockRecord, Compression, Coordinate, GeoKey, NodeRecord, StoreConfig, WayRecord, LAT_LIMIT,
    LON_LIMIT,
};
use proptest::prelude::*;
use std::ops::Range;

/// Largest span of raw keys that still maps back to a valid coordinate.
pub const VALID_KEY_SPAN: u64 = 1 << 60;

/// Strategy for generating valid coordinates.
pub fn coordinate_strategy() -> impl Strategy<Value = Coordinate> {
    (-LAT_LIMIT..=LAT_LIMIT, -LON_LIMIT..=LON_LIMIT).prop_map(|(lat, lon)| Coordinate::new(lat, lon))
}

/// Strategy for generating keys in `0..span`.
///
/// Small spans make equal keys likely.
pub fn key_strategy(span: u64) -> impl Strategy<Value = GeoKey> {
    (0..span.clamp(1, VALID_KEY_SPAN)).prop_map(GeoKey::new)
}

/// Strategy for all block codecs.
pub fn compression_strategy() -> impl Strategy<Value = Compression> {
    prop_oneof![
        Just(Compression::None),
        Just(Compression::Zlib),
        Just(Compression::Lz4),
    ]
}

/// Strategy for small but valid configurations for record kind `R`.
///
/// The block size is the smallest that fits a full block stored raw, so
/// incompressible blocks exercise the raw fallback.
pub fn config_strategy<R: BlockRecord>(
    capacity: Range<usize>,
) -> impl Strategy<Value = StoreConfig> {
    (capacity, compression_strategy()).prop_map(|(capacity, compression)| {
        let config = StoreConfig::new().capacity(capacity).compression(compression);
        let block_size = config.min_block_size_for::<R>();
        config.block_size(block_size)
    })
}

/// Builds nodes from keys with ids `first_id..`, stably sorted by key.
#[must_use]
pub fn nodes_from_keys(first_id: u64, keys: &[u64]) -> Vec<NodeRecord> {
    let mut run: Vec<NodeRecord> = keys
        .iter()
        .zip(first_id..)
        .map(|(&key, id)| NodeRecord::new(id, GeoKey::new(key).coordinate()))
        .collect();
    run.sort_by_key(BlockRecord::key);
    run
}

/// Strategy for one sorted node run with keys in `0..key_span`.
pub fn node_run_strategy(
    first_id: u64,
    key_span: u64,
    len: Range<usize>,
) -> impl Strategy<Value = Vec<NodeRecord>> {
    prop::collection::vec(0..key_span.clamp(1, VALID_KEY_SPAN), len)
        .prop_map(move |keys| nodes_from_keys(first_id, &keys))
}

/// Strategy for one sorted node run whose keys are pairwise distinct.
pub fn distinct_node_run_strategy(
    key_span: u64,
    len: Range<usize>,
) -> impl Strategy<Value = Vec<NodeRecord>> {
    prop::collection::btree_set(0..key_span.clamp(1, VALID_KEY_SPAN), len).prop_map(|keys| {
        let keys: Vec<u64> = keys.into_iter().collect();
        nodes_from_keys(1, &keys)
    })
}

/// Strategy for several sorted node runs with ids unique across all runs.
pub fn node_runs_strategy(
    runs: Range<usize>,
    key_span: u64,
    len: Range<usize>,
) -> impl Strategy<Value = Vec<Vec<NodeRecord>>> {
    let span = key_span.clamp(1, VALID_KEY_SPAN);
    prop::collection::vec(prop::collection::vec(0..span, len), runs).prop_map(|runs| {
        let mut next_id = 1;
        runs.iter()
            .map(|keys| {
                let run = nodes_from_keys(next_id, keys);
                next_id += keys.len() as u64;
                run
            })
            .collect()
    })
}

/// Strategy for one sorted way run with up to `max_refs` references each.
pub fn way_run_strategy(
    key_span: u64,
    max_refs: usize,
    len: Range<usize>,
) -> impl Strategy<Value = Vec<WayRecord>> {
    let span = key_span.clamp(1, VALID_KEY_SPAN);
    prop::collection::vec(
        (0..span, prop::collection::vec(any::<u64>(), 0..=max_refs)),
        len,
    )
    .prop_map(|ways| {
        let mut run: Vec<WayRecord> = ways
            .into_iter()
            .zip(1u64..)
            .map(|((key, refs), id)| WayRecord::new(id, GeoKey::new(key), refs))
            .collect();
        run.sort_by_key(BlockRecord::key);
        run
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
