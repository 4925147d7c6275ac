//! Test fixtures and store helpers.
//!
//! Provides in-memory stores built from sorted runs and file-backed stores
//! inside temporary directories.

use crate::generators::nodes_from_keys;
use geoblock_core::{
    flush_run, BlockRecord, BlockStore, Compression, IndexFile, IngestSession, IngestSummary,
    NodeRecord, Store, StoreConfig, StoreDir,
};
use std::path::Path;
use tempfile::TempDir;

/// A small configuration: 1 KiB blocks of 16 units, flushing every 64.
#[must_use]
pub fn small_config() -> StoreConfig {
    StoreConfig::new()
        .block_size(1024)
        .capacity(16)
        .compression(Compression::Lz4)
        .flush_interval(64)
}

/// Sorted nodes with ids `1..` at the given raw keys.
#[must_use]
pub fn nodes_at(keys: &[u64]) -> Vec<NodeRecord> {
    nodes_from_keys(1, keys)
}

/// Builds an in-memory store by flushing each sorted run in turn.
///
/// # Panics
///
/// Panics if the configuration is invalid or a flush fails.
pub fn memory_store<R: BlockRecord>(config: StoreConfig, runs: Vec<Vec<R>>) -> Store<R> {
    let mut index = IndexFile::new(&config);
    let mut blocks = BlockStore::in_memory(config).expect("Failed to create in-memory store");
    for run in runs {
        flush_run(&mut index, &mut blocks, run).expect("Flush failed");
    }
    Store::from_parts(index, blocks)
}

/// A store directory with automatic cleanup.
pub struct TempStore {
    /// The locked store directory.
    dir: StoreDir,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl TempStore {
    /// Creates and locks a fresh store directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dir = StoreDir::open(&temp_dir.path().join("store"), true)
            .expect("Failed to open store directory");
        Self {
            dir,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the store directory.
    pub fn dir(&self) -> &StoreDir {
        &self.dir
    }

    /// Returns the store directory path.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Starts an ingest session on the `R` store.
    pub fn session<R: BlockRecord>(&self, config: StoreConfig) -> IngestSession<R> {
        IngestSession::open(&self.dir, config).expect("Failed to start session")
    }

    /// Opens the `R` store for reading.
    pub fn open<R: BlockRecord>(&self, config: StoreConfig) -> Store<R> {
        Store::open(&self.dir, config).expect("Failed to open store")
    }

    /// Pushes every record through one session and finishes it.
    pub fn ingest<R: BlockRecord>(
        &self,
        config: StoreConfig,
        records: impl IntoIterator<Item = R>,
    ) -> (Store<R>, IngestSummary) {
        let mut session = self.session(config);
        for record in records {
            session.push(record).expect("Push failed");
        }
        session.finish().expect("Finish failed")
    }
}

impl Default for TempStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a test with a temporary store directory.
///
/// # Example
///
/// ```rust,ignore
/// use geoblock_testkit::{small_config, with_temp_store};
/// use geoblock_core::NodeRecord;
///
/// #[test]
/// fn my_test() {
///     with_temp_store(|store| {
///         let (nodes, _) = store.ingest::<NodeRecord>(small_config(), vec![]);
///         assert!(nodes.index().is_empty());
///     });
/// }
/// ```
pub fn with_temp_store<F, T>(f: F) -> T
where
    F: FnOnce(&TempStore) -> T,
{
    let store = TempStore::new();
    f(&store)
}
