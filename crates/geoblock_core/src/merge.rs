//! Flush and merge of sorted runs into a block store.
//!
//! A flush folds one key-sorted run of records into the blocks of a store.
//! With an empty index the run is packed into full blocks. Otherwise the
//! run and the index are walked together with one forward cursor each:
//! every existing block whose key interval receives new records is read,
//! merged with them, and written back, split into several blocks if the
//! merged weight exceeds the capacity.
//!
//! ## Invariants
//!
//! - Index entries stay sorted by minimum key
//! - No block holds more than `capacity` units
//! - Every block holds keys in `[its minimum, next minimum)`, except that
//!   records equal to the next minimum may stay behind in the block before
//!   it, which is why `IndexFile::candidate_range` steps back one entry
//! - The first chunk of a split reuses the original block number and is
//!   written last, after every other chunk is on its new block
//! - Merging never returns block numbers to the void list

use crate::block::BlockStore;
use crate::error::{CoreError, CoreResult};
use crate::index::{IndexEntry, IndexFile};
use crate::record::BlockRecord;
use std::iter::Peekable;
use std::vec;
use tracing::{debug, info};

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Records folded into the store.
    pub records: usize,
    /// Capacity units folded into the store.
    pub weight: usize,
    /// Existing blocks that were read and rewritten.
    pub blocks_rewritten: usize,
    /// Block numbers consumed for new blocks.
    pub blocks_allocated: usize,
    /// True if the run was packed into an empty store.
    pub initial_load: bool,
}

/// Target chunk weight when `total` units overflow a block of `capacity`.
///
/// Splits into the fewest roughly equal parts that each fit, so a slightly
/// overfull block becomes two half-full blocks instead of one full block
/// and one nearly empty one.
#[must_use]
pub fn split_size(total: usize, capacity: usize) -> usize {
    (total / (total / capacity.max(1) + 1)).max(1)
}

/// Folds `run` into the store described by `index` and `store`.
///
/// `run` must be sorted by key. Records with equal keys keep their order,
/// and existing records precede new records with the same key.
///
/// On error the index keeps every entry completed so far followed by the
/// untouched tail of the old index. A block whose split failed keeps its
/// old contents, and block numbers allocated for it are leaked.
///
/// # Errors
///
/// Returns `RecordTooLarge` if a record outweighs a block and
/// `InvalidOperation` if `run` is not sorted, both before anything is
/// written. Storage, codec and allocation errors abort the flush.
pub fn flush_run<R: BlockRecord>(
    index: &mut IndexFile,
    store: &mut BlockStore<R>,
    run: Vec<R>,
) -> CoreResult<FlushStats> {
    let capacity = store.config().capacity;
    check_run(&run, capacity)?;

    let mut stats = FlushStats {
        records: run.len(),
        weight: run.iter().map(BlockRecord::weight).sum(),
        initial_load: index.is_empty(),
        ..FlushStats::default()
    };
    if run.is_empty() {
        return Ok(stats);
    }

    let mut merger = Merger {
        index,
        store,
        capacity,
        stats: &mut stats,
    };
    if merger.index.is_empty() {
        merger.pack(run)?;
    } else {
        merger.merge(run)?;
    }

    info!(
        kind = R::KIND,
        records = stats.records,
        rewritten = stats.blocks_rewritten,
        allocated = stats.blocks_allocated,
        entries = index.len(),
        initial = stats.initial_load,
        "flushed run"
    );
    Ok(stats)
}

fn check_run<R: BlockRecord>(run: &[R], capacity: usize) -> CoreResult<()> {
    if let Some(record) = run.iter().find(|r| r.weight() > capacity) {
        return Err(CoreError::RecordTooLarge {
            id: record.id(),
            weight: record.weight(),
            capacity,
        });
    }
    if let Some(pos) = run.windows(2).position(|pair| pair[1].key() < pair[0].key()) {
        return Err(CoreError::invalid_operation(format!(
            "run is not sorted by key at position {}",
            pos + 1
        )));
    }
    Ok(())
}

struct Merger<'a, R: BlockRecord> {
    index: &'a mut IndexFile,
    store: &'a mut BlockStore<R>,
    capacity: usize,
    stats: &'a mut FlushStats,
}

impl<R: BlockRecord> Merger<'_, R> {
    /// Packs a run into successive full blocks of an empty store.
    fn pack(&mut self, run: Vec<R>) -> CoreResult<()> {
        let mut chunk: Vec<R> = Vec::new();
        let mut filled = 0;
        for record in run {
            if filled + record.weight() > self.capacity {
                self.append_block(&chunk)?;
                chunk.clear();
                filled = 0;
            }
            filled += record.weight();
            chunk.push(record);
        }
        self.append_block(&chunk)
    }

    fn append_block(&mut self, chunk: &[R]) -> CoreResult<()> {
        let Some(first) = chunk.first() else {
            return Ok(());
        };
        let block = self.index.allocate_block()?;
        self.store.write_block(block, chunk)?;
        self.index.append_entry(first.key(), block);
        self.stats.blocks_allocated += 1;
        Ok(())
    }

    /// Merges a run into a non-empty store.
    fn merge(&mut self, run: Vec<R>) -> CoreResult<()> {
        let old = self.index.take_entries();
        let lowered = match (run.first(), old.first()) {
            (Some(record), Some(first)) if record.key() < first.min_key => Some(record.key()),
            _ => None,
        };
        let mut rebuilt = Vec::with_capacity(old.len());
        let mut cover = 0;

        let result = self.merge_into(&old, run.into_iter().peekable(), &mut rebuilt, &mut cover);

        rebuilt.extend_from_slice(&old[cover..]);
        self.index.set_entries(rebuilt);
        result?;

        // The first block also takes keys below its registered minimum.
        if let Some(key) = lowered {
            self.index.update_min_key(0, key)?;
        }
        Ok(())
    }

    fn merge_into(
        &mut self,
        old: &[IndexEntry],
        mut run: Peekable<vec::IntoIter<R>>,
        rebuilt: &mut Vec<IndexEntry>,
        cover: &mut usize,
    ) -> CoreResult<()> {
        while *cover < old.len() {
            let entry = old[*cover];
            let upper = old.get(*cover + 1).map(|next| next.min_key);

            let mut incoming = Vec::new();
            while let Some(record) = run.next_if(|r| upper.map_or(true, |u| r.key() < u)) {
                incoming.push(record);
            }

            if incoming.is_empty() {
                rebuilt.push(entry);
            } else {
                let existing = self.store.read_block(entry.block)?;
                let merged = merge_sorted(existing, incoming);
                let produced = self.write_chunks(entry, &merged)?;
                rebuilt.extend(produced);
            }
            *cover += 1;

            if run.peek().is_none() {
                break;
            }
        }
        Ok(())
    }

    /// Writes the merged contents of one block interval, splitting as needed.
    ///
    /// Chunks after the first go to freshly allocated blocks before the
    /// original block is overwritten with the first chunk.
    fn write_chunks(&mut self, entry: IndexEntry, merged: &[R]) -> CoreResult<Vec<IndexEntry>> {
        let bounds = self.chunk_bounds(merged);
        let Some((&(first_start, first_end), rest)) = bounds.split_first() else {
            return Ok(Vec::new());
        };
        self.stats.blocks_rewritten += 1;

        let mut produced = Vec::with_capacity(bounds.len());
        produced.push(IndexEntry::new(entry.min_key, entry.block));
        for &(start, end) in rest {
            let block = self.index.allocate_block()?;
            self.stats.blocks_allocated += 1;
            self.store.write_block(block, &merged[start..end])?;
            produced.push(IndexEntry::new(merged[start].key(), block));

            debug!(
                kind = R::KIND,
                from = entry.block,
                to = block,
                records = end - start,
                "split block"
            );
        }

        self.store.write_block(entry.block, &merged[first_start..first_end])?;
        Ok(produced)
    }

    /// Cuts `merged` into `(start, end)` ranges that each fit one block.
    fn chunk_bounds(&self, merged: &[R]) -> Vec<(usize, usize)> {
        let mut bounds = Vec::with_capacity(1);
        let mut remaining: usize = merged.iter().map(BlockRecord::weight).sum();
        let mut pos = 0;

        while remaining > self.capacity {
            let target = split_size(remaining, self.capacity);
            let start = pos;
            let mut filled = 0;
            while pos < merged.len()
                && filled < target
                && filled + merged[pos].weight() <= self.capacity
            {
                filled += merged[pos].weight();
                pos += 1;
            }
            bounds.push((start, pos));
            remaining -= filled;
        }

        bounds.push((pos, merged.len()));
        bounds
    }
}

/// Merges two key-sorted sequences. On equal keys `existing` comes first.
fn merge_sorted<R: BlockRecord>(existing: Vec<R>, incoming: Vec<R>) -> Vec<R> {
    let mut out = Vec::with_capacity(existing.len() + incoming.len());
    let mut old = existing.into_iter().peekable();
    let mut new = incoming.into_iter().peekable();

    loop {
        let take_new = match (old.peek(), new.peek()) {
            (Some(a), Some(b)) => b.key() < a.key(),
            (None, Some(_)) => true,
            (Some(_), None) => false,
            (None, None) => break,
        };
        let next = if take_new { new.next() } else { old.next() };
        out.extend(next);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::geo::GeoKey;
    use crate::record::{NodeRecord, WayRecord};
    use crate::testing::FailingBackend;

    fn node(id: u64, key: u64) -> NodeRecord {
        NodeRecord::new(id, GeoKey::new(key).coordinate())
    }

    fn small_store(capacity: usize) -> (IndexFile, BlockStore<NodeRecord>) {
        let config = StoreConfig::new().block_size(4096).capacity(capacity);
        (
            IndexFile::new(&config),
            BlockStore::in_memory(config).unwrap(),
        )
    }

    fn block_keys(store: &BlockStore<NodeRecord>, block: u32) -> Vec<u64> {
        store
            .read_block(block)
            .unwrap()
            .iter()
            .map(|r| r.key().as_u64())
            .collect()
    }

    #[test]
    fn split_sizes() {
        assert_eq!(split_size(150, 100), 75);
        assert_eq!(split_size(201, 100), 67);
        assert_eq!(split_size(101, 100), 50);
        assert_eq!(split_size(2, 1), 1);
    }

    #[test]
    fn initial_load_packs_full_blocks() {
        let config = StoreConfig::new().capacity(8192);
        let mut index = IndexFile::new(&config);
        let mut store = BlockStore::<NodeRecord>::in_memory(config).unwrap();
        let run: Vec<_> = (0..100_000).map(|k| node(k + 1, k)).collect();

        let stats = flush_run(&mut index, &mut store, run).unwrap();
        assert!(stats.initial_load);
        assert_eq!(index.len(), 13);
        assert_eq!(stats.blocks_allocated, 13);

        for (i, entry) in index.entries().iter().enumerate() {
            let keys = block_keys(&store, entry.block);
            assert_eq!(entry.min_key.as_u64(), keys[0]);
            let expected = if i == 12 { 100_000 - 12 * 8192 } else { 8192 };
            assert_eq!(keys.len(), expected);
        }
    }

    #[test]
    fn overfull_block_splits_evenly() {
        let (mut index, mut store) = small_store(100);
        flush_run(&mut index, &mut store, (0..100).map(|k| node(k + 1, k)).collect()).unwrap();
        assert_eq!(index.len(), 1);
        let original = index.entries()[0].block;

        let run: Vec<_> = (0..50).map(|i| node(1000 + i, i * 2)).collect();
        let stats = flush_run(&mut index, &mut store, run).unwrap();

        assert_eq!(stats.blocks_rewritten, 1);
        assert_eq!(stats.blocks_allocated, 1);
        assert_eq!(index.len(), 2);
        assert_eq!(index.entries()[0].block, original);

        let first = block_keys(&store, index.entries()[0].block);
        let second = block_keys(&store, index.entries()[1].block);
        assert_eq!(first.len(), 75);
        assert_eq!(second.len(), 75);
        assert_eq!(index.entries()[1].min_key.as_u64(), second[0]);
        assert!(first.last() <= second.first());
    }

    fn failing_store(writes: usize) -> (IndexFile, BlockStore<NodeRecord>) {
        let config = StoreConfig::new().block_size(4096).capacity(10);
        let backend = FailingBackend::failing_writes_after(writes);
        (
            IndexFile::new(&config),
            BlockStore::new(Box::new(backend), config).unwrap(),
        )
    }

    #[test]
    fn failed_split_keeps_original_block() {
        let (mut index, mut store) = failing_store(1);
        flush_run(&mut index, &mut store, (0..10).map(|k| node(k + 1, k * 2)).collect()).unwrap();

        let run: Vec<_> = (0..10).map(|k| node(100 + k, k * 2 + 1)).collect();
        let result = flush_run(&mut index, &mut store, run);

        assert!(matches!(result, Err(CoreError::Storage(_))));
        assert_eq!(index.len(), 1);
        assert_eq!(index.entries()[0].block, 0);
        let expected: Vec<u64> = (0..10).map(|k| k * 2).collect();
        assert_eq!(block_keys(&store, 0), expected);
    }

    #[test]
    fn failed_overwrite_of_original_leaks_split_blocks_only() {
        // Pack, then both split chunks; the original block rewrite fails.
        let (mut index, mut store) = failing_store(3);
        flush_run(&mut index, &mut store, (0..10).map(|k| node(k + 1, k * 2)).collect()).unwrap();

        let run: Vec<_> = (0..10).map(|k| node(100 + k, k * 2 + 1)).collect();
        assert!(flush_run(&mut index, &mut store, run).is_err());

        assert_eq!(index.len(), 1);
        assert_eq!(index.block_count(), 3);
        assert_eq!(block_keys(&store, index.entries()[0].block).len(), 10);
    }

    #[test]
    fn split_chunks_are_written_before_the_original() {
        let (mut index, mut store) = small_store(10);
        flush_run(&mut index, &mut store, (0..10).map(|k| node(k + 1, k * 2)).collect()).unwrap();
        flush_run(&mut index, &mut store, (0..10).map(|k| node(100 + k, k * 2 + 1)).collect())
            .unwrap();

        let blocks: Vec<u32> = index.entries().iter().map(|e| e.block).collect();
        assert_eq!(blocks, vec![0, 1, 2]);
        let sizes: Vec<usize> = blocks.iter().map(|&b| block_keys(&store, b).len()).collect();
        assert_eq!(sizes, vec![6, 7, 7]);
        assert_eq!(block_keys(&store, 0), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn equal_keys_keep_existing_first() {
        let (mut index, mut store) = small_store(100);
        flush_run(&mut index, &mut store, vec![node(1, 5), node(2, 9)]).unwrap();
        flush_run(&mut index, &mut store, vec![node(3, 5), node(4, 7)]).unwrap();

        let ids: Vec<u64> = store.read_block(0).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3, 4, 2]);
    }

    #[test]
    fn keys_below_first_entry_lower_its_minimum() {
        let (mut index, mut store) = small_store(100);
        flush_run(&mut index, &mut store, (50..60).map(|k| node(k, k)).collect()).unwrap();
        flush_run(&mut index, &mut store, vec![node(1, 3)]).unwrap();

        assert_eq!(index.entries()[0].min_key, GeoKey::new(3));
        assert_eq!(block_keys(&store, 0)[0], 3);
    }

    #[test]
    fn lowered_minimum_survives_a_split_of_the_first_block() {
        let (mut index, mut store) = small_store(10);
        flush_run(&mut index, &mut store, (50..60).map(|k| node(k, k)).collect()).unwrap();
        flush_run(&mut index, &mut store, (0..5).map(|k| node(100 + k, k)).collect()).unwrap();

        let entries = index.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].min_key, GeoKey::new(0));
        assert_eq!(entries[1].min_key.as_u64(), block_keys(&store, entries[1].block)[0]);
    }

    #[test]
    fn run_past_last_entry_appends_at_tail() {
        let (mut index, mut store) = small_store(10);
        flush_run(&mut index, &mut store, (0..20).map(|k| node(k + 1, k)).collect()).unwrap();
        assert_eq!(index.len(), 2);

        let run: Vec<_> = (100..130).map(|k| node(k, k)).collect();
        flush_run(&mut index, &mut store, run).unwrap();

        let entries = index.entries();
        assert_eq!(entries[0].block, 0);
        assert_eq!(entries[1].block, 1);
        for pair in entries.windows(2) {
            assert!(pair[0].min_key <= pair[1].min_key);
        }
        let blocks: Vec<u32> = entries.iter().map(|e| e.block).collect();
        assert!(blocks[1..].windows(2).all(|w| w[0] < w[1]));
        let total: usize = entries.iter().map(|e| block_keys(&store, e.block).len()).sum();
        assert_eq!(total, 50);
    }

    #[test]
    fn untouched_blocks_are_not_rewritten() {
        let (mut index, mut store) = small_store(10);
        flush_run(&mut index, &mut store, (0..40).map(|k| node(k + 1, k * 10)).collect()).unwrap();
        assert_eq!(index.len(), 4);

        let stats = flush_run(&mut index, &mut store, vec![node(100, 215)]).unwrap();
        assert_eq!(stats.blocks_rewritten, 1);
        assert_eq!(index.len(), 5);
    }

    #[test]
    fn merge_consumes_void_blocks_but_never_returns_them() {
        let (mut index, mut store) = small_store(10);
        flush_run(&mut index, &mut store, (0..10).map(|k| node(k + 1, k * 10)).collect()).unwrap();
        let spare_a = index.allocate_block().unwrap();
        let spare_b = index.allocate_block().unwrap();
        index.release_block(spare_a).unwrap();
        index.release_block(spare_b).unwrap();
        assert_eq!(index.void_blocks(), &[spare_a, spare_b]);

        let stats = flush_run(&mut index, &mut store, (0..5).map(|k| node(100 + k, k * 10 + 1)).collect())
            .unwrap();
        assert_eq!(stats.blocks_allocated, 1);
        assert_eq!(index.void_blocks(), &[spare_a]);
        assert_eq!(index.entries()[1].block, spare_b);
        assert_eq!(index.block_count(), 3);
    }

    #[test]
    fn oversized_record_rejected_before_writing() {
        let config = StoreConfig::new().block_size(1024).capacity(16);
        let mut index = IndexFile::new(&config);
        let mut store = BlockStore::<WayRecord>::in_memory(config).unwrap();

        let run = vec![
            WayRecord::new(1, GeoKey::new(1), vec![1, 2]),
            WayRecord::new(2, GeoKey::new(2), (0..14).collect()),
        ];
        assert!(matches!(
            flush_run(&mut index, &mut store, run),
            Err(CoreError::RecordTooLarge { id: 2, weight: 17, capacity: 16 })
        ));
        assert!(index.is_empty());
        assert_eq!(store.slot_count().unwrap(), 0);
    }

    #[test]
    fn unsorted_run_rejected() {
        let (mut index, mut store) = small_store(10);
        let result = flush_run(&mut index, &mut store, vec![node(1, 9), node(2, 3)]);
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
        assert!(index.is_empty());
    }

    #[test]
    fn variable_chunks_never_exceed_capacity() {
        let config = StoreConfig::new().block_size(1024).capacity(40);
        let mut index = IndexFile::new(&config);
        let mut store = BlockStore::<WayRecord>::in_memory(config).unwrap();

        let ways = |base: u64| -> Vec<WayRecord> {
            (0..12)
                .map(|i| WayRecord::new(base + i, GeoKey::new(i * 4 + base % 2), (0..(i % 5)).collect()))
                .collect()
        };
        flush_run(&mut index, &mut store, ways(100)).unwrap();
        flush_run(&mut index, &mut store, ways(201)).unwrap();

        let mut count = 0;
        for entry in index.entries() {
            let block = store.read_block(entry.block).unwrap();
            let weight: usize = block.iter().map(BlockRecord::weight).sum();
            assert!(weight <= 40);
            assert!(!block.is_empty());
            count += block.len();
        }
        assert_eq!(count, 24);
    }

    #[test]
    fn empty_run_is_noop() {
        let (mut index, mut store) = small_store(10);
        let stats = flush_run(&mut index, &mut store, Vec::new()).unwrap();
        assert_eq!(stats.records, 0);
        assert!(index.is_empty());
    }
}
