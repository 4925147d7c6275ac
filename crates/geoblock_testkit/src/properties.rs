//! Store-wide properties over generated runs.

use crate::fixtures::{memory_store, nodes_at, small_config, TempStore};
use crate::generators::*;
use crate::invariants::{check_store, key_id_multiset};
use geoblock_core::secondary::{resolve_way_keys, IdBlockTable, RawWay, SpatialBucketIndex};
use geoblock_core::{
    flush_run, split_size, BlockRecord, BlockStore, CoreError, GeoKey, NodeRecord, Store,
    StoreConfig, WayRecord,
};
use proptest::prelude::*;

fn way_multiset(ways: &[WayRecord]) -> Vec<(u64, u64, Vec<u64>)> {
    let mut all: Vec<_> = ways
        .iter()
        .map(|w| (w.key.as_u64(), w.id, w.refs.clone()))
        .collect();
    all.sort_unstable();
    all
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn split_size_never_exceeds_capacity(total in 1usize..100_000, cap in 1usize..10_000) {
        let size = split_size(total, cap);
        prop_assert!(size >= 1);
        if total > cap {
            prop_assert!(size <= cap);
            prop_assert!(size * (total / cap + 1) <= total);
        }
    }

    #[test]
    fn merge_keeps_every_record(
        config in config_strategy::<NodeRecord>(1..32),
        runs in node_runs_strategy(1..5, 200, 0..120),
    ) {
        let expected = key_id_multiset(runs.iter().flatten());
        let store = memory_store(config, runs);

        let report = check_store(&store).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(report.records, expected.len());
        prop_assert_eq!(report.unreachable_blocks, 0);

        let all = store.reader().scan_key_order().collect_vec().unwrap();
        prop_assert!(all.windows(2).all(|w| w[0].key() <= w[1].key()));
        prop_assert_eq!(key_id_multiset(&all), expected);
    }

    #[test]
    fn distinct_keys_never_straddle_blocks(
        config in config_strategy::<NodeRecord>(1..16),
        run in distinct_node_run_strategy(100_000, 1..300),
    ) {
        // Alternate records between two runs, both still sorted.
        let (first, second): (Vec<_>, Vec<_>) =
            run.into_iter().enumerate().partition(|(i, _)| i % 2 == 0);
        let first: Vec<NodeRecord> = first.into_iter().map(|(_, n)| n).collect();
        let second: Vec<NodeRecord> = second.into_iter().map(|(_, n)| n).collect();

        let store = memory_store(config, vec![first, second]);
        let report = check_store(&store).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(report.shared_boundaries, 0);
    }

    #[test]
    fn variable_weight_blocks_stay_within_capacity(
        config in config_strategy::<WayRecord>(8..64),
        runs in prop::collection::vec(way_run_strategy(500, 5, 0..60), 1..4),
    ) {
        let mut expected: Vec<WayRecord> = runs.iter().flatten().cloned().collect();
        let capacity = config.capacity;
        let store = memory_store(config, runs);

        let report = check_store(&store).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert!(report.fullest_block <= capacity);

        let all = store.reader().scan_key_order().collect_vec().unwrap();
        expected.sort_by_key(BlockRecord::key);
        prop_assert_eq!(way_multiset(&all), way_multiset(&expected));
    }

    #[test]
    fn blocks_round_trip_under_every_codec(
        config in config_strategy::<NodeRecord>(1..64),
        coords in prop::collection::vec(coordinate_strategy(), 0..64),
        block in 0u32..8,
    ) {
        let records: Vec<NodeRecord> = coords
            .into_iter()
            .take(config.capacity)
            .zip(1u64..)
            .map(|(coord, id)| NodeRecord::new(id, coord))
            .collect();

        let mut store = BlockStore::<NodeRecord>::in_memory(config).unwrap();
        let written = store.write_block(block, &records).unwrap();
        prop_assert!(written <= config.block_size);
        prop_assert_eq!(store.read_block(block).unwrap(), records);
    }

    #[test]
    fn range_lookup_matches_filter(
        runs in node_runs_strategy(1..4, 2_000, 0..150),
        lo in 0u64..2_100,
        len in 0u64..600,
    ) {
        let all: Vec<NodeRecord> = runs.iter().flatten().copied().collect();
        let store = memory_store(small_config(), runs);
        let (lo, hi) = (GeoKey::new(lo), GeoKey::new(lo + len));

        let hits = store.reader().lookup_range(lo, hi).collect_vec().unwrap();
        prop_assert!(hits.windows(2).all(|w| w[0].key() <= w[1].key()));
        let expected = key_id_multiset(all.iter().filter(|n| n.key() >= lo && n.key() < hi));
        prop_assert_eq!(key_id_multiset(&hits), expected);
    }

    #[test]
    fn every_key_is_found(runs in node_runs_strategy(1..4, 300, 1..100)) {
        let all: Vec<NodeRecord> = runs.iter().flatten().copied().collect();
        let store = memory_store(small_config(), runs);
        let reader = store.reader();

        for node in &all {
            let hits = reader.lookup_key(node.key()).unwrap();
            prop_assert!(hits.iter().any(|n| n.id == node.id));
            prop_assert!(hits.iter().all(|n| n.key() == node.key()));
        }
    }

    #[test]
    fn unsorted_run_is_rejected_without_change(
        base in node_run_strategy(1, 1_000, 1..100),
        keys in prop::collection::btree_set(0u64..1_000, 2..20),
    ) {
        let (mut index, mut blocks) = memory_store(small_config(), vec![base]).into_parts();
        let before = index.entries().to_vec();
        let slots = blocks.slot_count().unwrap();

        let mut run = nodes_from_keys(10_000, &keys.into_iter().collect::<Vec<_>>());
        run.reverse();
        let result = flush_run(&mut index, &mut blocks, run);

        let is_invalid_op = matches!(result, Err(CoreError::InvalidOperation { .. }));
        prop_assert!(is_invalid_op);
        prop_assert_eq!(index.entries(), before.as_slice());
        prop_assert_eq!(blocks.slot_count().unwrap(), slots);
    }
}

proptest! {
    #![proptest_config(PropTestConfig { cases: 8, max_shrink_iters: 50 }.to_proptest_config())]

    #[test]
    fn reopen_is_idempotent(runs in node_runs_strategy(1..4, 5_000, 0..200)) {
        let temp = TempStore::new();
        let config = small_config();
        let mut merged = Vec::new();

        for run in runs {
            merged.extend(run.iter().copied());
            let (store, _) = temp.ingest(config, run);
            drop(store);
        }

        let first = temp.open::<NodeRecord>(config);
        let second = temp.open::<NodeRecord>(config);
        prop_assert_eq!(first.index().entries(), second.index().entries());
        prop_assert_eq!(first.index().void_blocks(), second.index().void_blocks());
        prop_assert_eq!(first.index().block_count(), second.index().block_count());

        check_store(&first).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let all = first.reader().scan_key_order().collect_vec().unwrap();
        prop_assert_eq!(key_id_multiset(&all), key_id_multiset(&merged));
    }

    #[test]
    fn secondary_indexes_cover_every_way(
        node_keys in prop::collection::vec(0u64..1 << 40, 1..200),
        way_refs in prop::collection::vec(prop::collection::vec(1u64..220, 1..6), 0..80),
    ) {
        let max_node_id = node_keys.len() as u64;
        let node_store = memory_store(small_config(), vec![nodes_at(&node_keys)]);
        let nodes = node_store.reader();

        let raw = way_refs
            .into_iter()
            .zip(1u64..)
            .map(|(refs, id)| RawWay::new(id, refs))
            .collect::<Vec<_>>();
        let known_first = raw.iter().filter(|w| w.refs[0] <= max_node_id).count();
        let mut resolved = resolve_way_keys(&nodes, raw, max_node_id, 64).unwrap();
        prop_assert_eq!(resolved.ways.len(), known_first);

        resolved.ways.sort_by_key(BlockRecord::key);
        let shift = 30;
        let way_config = StoreConfig::new().block_size(1024).capacity(32).bucket_shift(shift);
        let way_store: Store<WayRecord> = memory_store(way_config, vec![resolved.ways.clone()]);
        let ways = way_store.reader();

        let max_way_id = resolved.ways.iter().map(|w| w.id).max().unwrap_or(0);
        let ids = IdBlockTable::build(&ways, max_way_id).unwrap();
        let spatial = SpatialBucketIndex::build_ways(&ways, &nodes, max_node_id, 64).unwrap();

        for way in &resolved.ways {
            let looked_up = ids.lookup(&ways, way.id).unwrap();
            prop_assert_eq!(looked_up.as_ref(), Some(way));
            let block = ids.block_of(way.id).unwrap();
            for &node in way.refs.iter().filter(|&&n| n <= max_node_id) {
                let bucket = GeoKey::new(node_keys[node as usize - 1]).bucket(shift);
                prop_assert!(spatial.blocks_for_bucket_range(bucket, bucket).contains(&block));
            }
        }
    }
}

#[test]
fn compression_overflow_leaves_data_file_untouched() {
    let temp = TempStore::new();
    let config = small_config();
    let paths = temp.dir().paths(NodeRecord::KIND);
    let mut blocks = BlockStore::<NodeRecord>::open(&paths, config).unwrap();
    blocks.write_block(0, &nodes_at(&[1, 2, 3])).unwrap();
    blocks.sync().unwrap();
    let before = std::fs::read(paths.data()).unwrap();

    let oversized = vec![7u8; config.block_size];
    let result = blocks.write_raw(1, &oversized);
    assert!(matches!(
        result,
        Err(CoreError::Codec(geoblock_core::CodecError::CompressionOverflow { .. }))
    ));
    blocks.sync().unwrap();
    assert_eq!(std::fs::read(paths.data()).unwrap(), before);
}
