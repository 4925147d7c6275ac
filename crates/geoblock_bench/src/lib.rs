//! Benchmark utilities.

use geoblock_core::{BlockRecord, Coordinate, NodeRecord, LAT_LIMIT, LON_LIMIT};
use rand::Rng;

/// Generate nodes with ids `first_id..` at uniformly random coordinates.
pub fn random_nodes(first_id: u64, count: usize) -> Vec<NodeRecord> {
    let mut rng = rand::thread_rng();
    (first_id..first_id + count as u64)
        .map(|id| {
            let coord = Coordinate::new(
                rng.gen_range(-LAT_LIMIT..=LAT_LIMIT),
                rng.gen_range(-LON_LIMIT..=LON_LIMIT),
            );
            NodeRecord::new(id, coord)
        })
        .collect()
}

/// Generate nodes clustered in a small area, as in a regional extract.
pub fn clustered_nodes(first_id: u64, count: usize) -> Vec<NodeRecord> {
    let mut rng = rand::thread_rng();
    (first_id..first_id + count as u64)
        .map(|id| {
            let coord = Coordinate::new(
                525_000_000 + rng.gen_range(0..1_000_000),
                134_000_000 + rng.gen_range(0..1_000_000),
            );
            NodeRecord::new(id, coord)
        })
        .collect()
}

/// Sort a run by key, as the ingest session does before a flush.
pub fn sorted<R: BlockRecord>(mut run: Vec<R>) -> Vec<R> {
    run.sort_by_key(BlockRecord::key);
    run
}

/// Raw block payload for `records`, as the block store lays it out.
pub fn raw_payload<R: BlockRecord>(records: &[R]) -> Vec<u8> {
    let mut raw = (records.len() as u32).to_le_bytes().to_vec();
    for record in records {
        record.encode_into(&mut raw);
    }
    raw
}
