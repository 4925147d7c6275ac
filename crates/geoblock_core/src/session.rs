//! Bulk ingest of one record kind.
//!
//! An [`IngestSession`] buffers records in parse order, sorts and flushes
//! them whenever the buffered weight reaches the flush interval, and hands
//! back a finished [`Store`] at the end.
//!
//! ## Example
//!
//! ```rust
//! use geoblock_core::{Coordinate, IngestSession, NodeRecord, StoreConfig};
//!
//! let config = StoreConfig::new().block_size(4096).capacity(100);
//! let mut session = IngestSession::<NodeRecord>::in_memory(config).unwrap();
//! session.push(NodeRecord::new(1, Coordinate::from_degrees(52.5, 13.4))).unwrap();
//! session.push(NodeRecord::new(2, Coordinate::from_degrees(48.1, 11.6))).unwrap();
//!
//! let (store, summary) = session.finish().unwrap();
//! assert_eq!(summary.records, 2);
//! assert_eq!(summary.max_id, 2);
//! let key = Coordinate::from_degrees(48.1, 11.6).key();
//! assert_eq!(store.reader().lookup_point(key).unwrap().unwrap().id, 2);
//! ```

use crate::block::BlockStore;
use crate::config::StoreConfig;
use crate::dir::{StoreDir, StorePaths};
use crate::error::{CoreError, CoreResult};
use crate::index::IndexFile;
use crate::merge::{flush_run, FlushStats};
use crate::reader::Reader;
use crate::record::{BlockRecord, NodeRecord, WayRecord};
use crate::secondary::{IdBlockTable, SpatialBucketIndex};
use tracing::info;

/// Totals over the lifetime of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Records pushed.
    pub records: u64,
    /// Flushes run.
    pub flushes: usize,
    /// Existing blocks rewritten by merges.
    pub blocks_rewritten: usize,
    /// Block numbers consumed.
    pub blocks_allocated: usize,
    /// Live blocks at the end.
    pub live_blocks: usize,
    /// Largest id pushed.
    pub max_id: u64,
}

/// A store: its index and blocks.
#[derive(Debug)]
pub struct Store<R: BlockRecord> {
    index: IndexFile,
    blocks: BlockStore<R>,
}

impl<R: BlockRecord> Store<R> {
    /// Opens the `R` store inside a locked directory.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig`, `IncompatibleFormat`, `Corrupted` or I/O
    /// errors from opening the files.
    pub fn open(dir: &StoreDir, config: StoreConfig) -> CoreResult<Self> {
        config.validate_for::<R>()?;
        let paths = dir.paths(R::KIND);
        let index = IndexFile::load(&paths, &config)?;
        let blocks = BlockStore::open(&paths, config)?;
        Ok(Self { index, blocks })
    }

    /// Assembles a store from its parts.
    #[must_use]
    pub fn from_parts(index: IndexFile, blocks: BlockStore<R>) -> Self {
        Self { index, blocks }
    }

    /// Splits the store into its parts.
    #[must_use]
    pub fn into_parts(self) -> (IndexFile, BlockStore<R>) {
        (self.index, self.blocks)
    }

    /// Returns the index.
    #[must_use]
    pub fn index(&self) -> &IndexFile {
        &self.index
    }

    /// Returns the block store.
    #[must_use]
    pub fn blocks(&self) -> &BlockStore<R> {
        &self.blocks
    }

    /// Returns a reader over the store.
    #[must_use]
    pub fn reader(&self) -> Reader<'_, R> {
        Reader::new(&self.index, &self.blocks)
    }

    /// Largest id stored, found by a full scan.
    ///
    /// # Errors
    ///
    /// Returns storage or codec errors from the scan.
    pub fn scan_max_id(&self) -> CoreResult<u64> {
        let mut max_id = 0;
        for item in self.reader().scan_block_order() {
            let (_, records) = item?;
            max_id = records.iter().map(BlockRecord::id).fold(max_id, u64::max);
        }
        Ok(max_id)
    }

    /// Builds the id table for ids `1..=max_id`, writing it next to the
    /// index when the store is file-backed.
    ///
    /// # Errors
    ///
    /// Returns errors from [`IdBlockTable::build`] and the write.
    pub fn build_id_table(&self, max_id: u64) -> CoreResult<IdBlockTable> {
        let table = IdBlockTable::build(&self.reader(), max_id)?;
        if let Some(paths) = self.index.paths() {
            table.persist(&paths.id_table())?;
        }
        Ok(table)
    }

    /// Loads the id table written by [`Store::build_id_table`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for an in-memory store, and I/O or
    /// `Corrupted` errors from the read.
    pub fn load_id_table(&self) -> CoreResult<IdBlockTable> {
        IdBlockTable::load(&self.persistent_paths("id table")?.id_table())
    }

    /// Loads the spatial index, at the configured bucket shift.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for an in-memory store, and I/O or
    /// `Corrupted` errors from the read.
    pub fn load_spatial_index(&self) -> CoreResult<SpatialBucketIndex> {
        let path = self.persistent_paths("spatial index")?.spatial();
        SpatialBucketIndex::load(&path, self.blocks.config().bucket_shift)
    }

    fn persistent_paths(&self, what: &str) -> CoreResult<&StorePaths> {
        self.index.paths().ok_or_else(|| {
            CoreError::invalid_operation(format!("in-memory {} store has no {what} file", R::KIND))
        })
    }

    fn keep_spatial_index(&self, spatial: SpatialBucketIndex) -> CoreResult<SpatialBucketIndex> {
        if let Some(paths) = self.index.paths() {
            spatial.persist(&paths.spatial())?;
        }
        Ok(spatial)
    }
}

impl Store<NodeRecord> {
    /// Buckets every node by its own key, writing the result next to the
    /// index when the store is file-backed.
    ///
    /// # Errors
    ///
    /// Returns storage or codec errors from the scan and I/O errors from
    /// the write.
    pub fn build_spatial_index(&self) -> CoreResult<SpatialBucketIndex> {
        self.keep_spatial_index(SpatialBucketIndex::build_points(&self.reader())?)
    }
}

impl Store<WayRecord> {
    /// Buckets every way by the keys of the nodes it references, writing
    /// the result next to the index when the store is file-backed.
    ///
    /// # Errors
    ///
    /// Returns errors from [`SpatialBucketIndex::build_ways`] and I/O
    /// errors from the write.
    pub fn build_spatial_index(
        &self,
        nodes: &Store<NodeRecord>,
        max_node_id: u64,
        chunk_len: usize,
    ) -> CoreResult<SpatialBucketIndex> {
        let spatial =
            SpatialBucketIndex::build_ways(&self.reader(), &nodes.reader(), max_node_id, chunk_len)?;
        self.keep_spatial_index(spatial)
    }
}

/// Owns the in-memory run, the index and the block store during a bulk load.
#[derive(Debug)]
pub struct IngestSession<R: BlockRecord> {
    store: Store<R>,
    run: Vec<R>,
    buffered: usize,
    flush_interval: usize,
    summary: IngestSummary,
}

impl<R: BlockRecord> IngestSession<R> {
    /// Starts a session on the `R` store inside a locked directory.
    ///
    /// Existing blocks are merged with, not replaced. The caller keeps
    /// `dir` alive, and with it the lock, until the session is finished.
    ///
    /// # Errors
    ///
    /// Returns errors from [`Store::open`].
    pub fn open(dir: &StoreDir, config: StoreConfig) -> CoreResult<Self> {
        let flush_interval = config.flush_interval;
        Ok(Self::with_store(Store::open(dir, config)?, flush_interval))
    }

    /// Starts a session on a store held in memory.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` cannot hold blocks of `R`.
    pub fn in_memory(config: StoreConfig) -> CoreResult<Self> {
        let index = IndexFile::new(&config);
        let flush_interval = config.flush_interval;
        let blocks = BlockStore::in_memory(config)?;
        Ok(Self::with_store(Store::from_parts(index, blocks), flush_interval))
    }

    fn with_store(store: Store<R>, flush_interval: usize) -> Self {
        Self {
            store,
            run: Vec::new(),
            buffered: 0,
            flush_interval,
            summary: IngestSummary::default(),
        }
    }

    /// Buffers a record, flushing if the buffer reached the flush interval.
    ///
    /// # Errors
    ///
    /// Returns `RecordTooLarge` for a record heavier than a block, leaving
    /// the buffer unchanged, and any error of the triggered flush.
    pub fn push(&mut self, record: R) -> CoreResult<Option<FlushStats>> {
        let capacity = self.store.blocks.config().capacity;
        if record.weight() > capacity {
            return Err(CoreError::RecordTooLarge {
                id: record.id(),
                weight: record.weight(),
                capacity,
            });
        }

        self.summary.records += 1;
        self.summary.max_id = self.summary.max_id.max(record.id());
        self.buffered += record.weight();
        self.run.push(record);

        if self.buffered >= self.flush_interval {
            self.flush().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Sorts the buffered run by key and folds it into the store.
    ///
    /// # Errors
    ///
    /// Returns any error of the merge. The buffered run is dropped either way.
    pub fn flush(&mut self) -> CoreResult<FlushStats> {
        let mut run = std::mem::take(&mut self.run);
        self.buffered = 0;
        if run.is_empty() {
            return Ok(FlushStats::default());
        }

        // Stable, so records with equal keys keep parse order.
        run.sort_by_key(BlockRecord::key);
        let stats = flush_run(&mut self.store.index, &mut self.store.blocks, run)?;

        self.summary.flushes += 1;
        self.summary.blocks_rewritten += stats.blocks_rewritten;
        self.summary.blocks_allocated += stats.blocks_allocated;
        Ok(stats)
    }

    /// Units currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    /// Largest id pushed so far.
    #[must_use]
    pub fn max_id(&self) -> u64 {
        self.summary.max_id
    }

    /// Reader over the flushed part of the store.
    #[must_use]
    pub fn reader(&self) -> Reader<'_, R> {
        self.store.reader()
    }

    /// Flushes, syncs the data file, persists the index when file-backed,
    /// and returns the finished store.
    ///
    /// The index only reaches disk once every block it names is durable.
    ///
    /// # Errors
    ///
    /// Returns errors from the final flush, the sync or the persist.
    pub fn finish(mut self) -> CoreResult<(Store<R>, IngestSummary)> {
        self.flush()?;
        self.store.blocks.sync()?;
        if self.store.index.is_persistent() {
            self.store.index.persist()?;
        }
        self.summary.live_blocks = self.store.index.len();

        info!(
            kind = R::KIND,
            records = self.summary.records,
            flushes = self.summary.flushes,
            blocks = self.summary.live_blocks,
            max_id = self.summary.max_id,
            "finished ingest"
        );
        Ok((self.store, self.summary))
    }
}
