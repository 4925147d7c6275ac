//! Index file: the sorted (min key, block) partition of the key space.
//!
//! ## File Format
//!
//! ```text
//! | version: u32 (4) | log2 block: u8 | log2 capacity: u8 | codec: u16 (2) |
//! | min_key: u64 (8) | block: u32 (4) |  * entry count
//! ```
//!
//! The void list lives in a companion file as a flat `u32` array. All
//! integers are little-endian.

use crate::config::StoreConfig;
use crate::dir::{atomic_write, read_optional, StorePaths};
use crate::error::{CoreError, CoreResult};
use crate::geo::GeoKey;
use crate::record::{read_u32, read_u64};
use std::ops::Range;
use tracing::{info, warn};

/// Format tag stored in the first four bytes of every index file.
pub const FORMAT_VERSION: u32 = 7512;

/// Size of the index file header.
pub const INDEX_HEADER_SIZE: usize = 8;

/// Size of one persisted index entry.
pub const INDEX_ENTRY_SIZE: usize = 12;

/// Header of an index file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    /// Format tag. Must equal [`FORMAT_VERSION`].
    pub version: u32,
    /// log2 of the block slot size.
    pub block_size_log2: u8,
    /// log2 of the capacity class.
    pub capacity_log2: u8,
    /// Codec id.
    pub compression_id: u16,
}

impl IndexHeader {
    /// Builds the header describing `config`.
    #[must_use]
    pub fn for_config(config: &StoreConfig) -> Self {
        Self {
            version: FORMAT_VERSION,
            block_size_log2: config.block_size_log2(),
            capacity_log2: config.capacity_class_log2(),
            compression_id: config.compression.id(),
        }
    }

    /// Encodes the header.
    #[must_use]
    pub fn encode(&self) -> [u8; INDEX_HEADER_SIZE] {
        let mut buf = [0u8; INDEX_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.version.to_le_bytes());
        buf[4] = self.block_size_log2;
        buf[5] = self.capacity_log2;
        buf[6..8].copy_from_slice(&self.compression_id.to_le_bytes());
        buf
    }

    /// Decodes and checks the header against the opening configuration.
    ///
    /// # Errors
    ///
    /// Returns `Corrupted` for a short buffer and `IncompatibleFormat` for
    /// any mismatch.
    pub fn decode_checked(data: &[u8], expected: &Self) -> CoreResult<Self> {
        if data.len() < INDEX_HEADER_SIZE {
            return Err(CoreError::corrupted(format!(
                "index header truncated: {} bytes",
                data.len()
            )));
        }
        let header = Self {
            version: read_u32(data, 0)?,
            block_size_log2: data[4],
            capacity_log2: data[5],
            compression_id: u16::from_le_bytes([data[6], data[7]]),
        };

        if header.version != FORMAT_VERSION {
            return Err(CoreError::incompatible_format(format!(
                "index version {} (expected {FORMAT_VERSION})",
                header.version
            )));
        }
        if header.block_size_log2 != expected.block_size_log2 {
            return Err(CoreError::incompatible_format(format!(
                "block size 2^{} (configured 2^{})",
                header.block_size_log2, expected.block_size_log2
            )));
        }
        if header.capacity_log2 != expected.capacity_log2 {
            return Err(CoreError::incompatible_format(format!(
                "capacity class 2^{} (configured 2^{})",
                header.capacity_log2, expected.capacity_log2
            )));
        }
        if header.compression_id != expected.compression_id {
            return Err(CoreError::incompatible_format(format!(
                "codec id {} (configured {})",
                header.compression_id, expected.compression_id
            )));
        }
        Ok(header)
    }
}

/// One index slot: the smallest key of a block and its number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Registered minimum key of the block.
    pub min_key: GeoKey,
    /// Block number in the data file.
    pub block: u32,
}

impl IndexEntry {
    /// Creates an index entry.
    #[must_use]
    pub const fn new(min_key: GeoKey, block: u32) -> Self {
        Self { min_key, block }
    }
}

/// In-memory index and void list of one store.
#[derive(Debug, Clone)]
pub struct IndexFile {
    paths: Option<StorePaths>,
    header: IndexHeader,
    entries: Vec<IndexEntry>,
    void_blocks: Vec<u32>,
    block_count: u32,
}

impl IndexFile {
    /// Creates an empty index that is never persisted.
    #[must_use]
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            paths: None,
            header: IndexHeader::for_config(config),
            entries: Vec::new(),
            void_blocks: Vec::new(),
            block_count: 0,
        }
    }

    /// Loads the index of the store at `paths`.
    ///
    /// An absent index file yields an empty index. The block count is
    /// derived from the data file size. An absent void file is rebuilt from
    /// the block numbers no entry references.
    ///
    /// # Errors
    ///
    /// Returns `IncompatibleFormat` on header mismatch, and `Corrupted`
    /// for truncated files, unsorted entries, and dangling or duplicated
    /// block numbers.
    pub fn load(paths: &StorePaths, config: &StoreConfig) -> CoreResult<Self> {
        let header = IndexHeader::for_config(config);

        let data_len = match std::fs::metadata(paths.data()) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        let block_count = u32::try_from(data_len / config.block_size as u64).map_err(|_| {
            CoreError::corrupted(format!("data file of {data_len} bytes has too many blocks"))
        })?;

        let entries = match read_optional(&paths.index())? {
            Some(data) => {
                IndexHeader::decode_checked(&data, &header)?;
                decode_entries(&data[INDEX_HEADER_SIZE..])?
            }
            None => Vec::new(),
        };

        let mut index = Self {
            paths: Some(paths.clone()),
            header,
            entries,
            void_blocks: Vec::new(),
            block_count,
        };

        let footprint = index.checked_footprint()?;

        index.void_blocks = match read_optional(&paths.void())? {
            Some(data) => decode_void(&data, &footprint)?,
            None => {
                let rebuilt = unreferenced_blocks(&footprint);
                if !rebuilt.is_empty() {
                    warn!(
                        kind = paths.kind(),
                        void = rebuilt.len(),
                        "void list missing, rebuilt from unreferenced blocks"
                    );
                }
                rebuilt
            }
        };

        info!(
            kind = paths.kind(),
            entries = index.entries.len(),
            blocks = index.block_count,
            void = index.void_blocks.len(),
            "loaded index"
        );
        Ok(index)
    }

    /// True if the index has files to persist to.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.paths.is_some()
    }

    /// Files of the store this index was loaded from.
    #[must_use]
    pub fn paths(&self) -> Option<&StorePaths> {
        self.paths.as_ref()
    }

    /// Returns the header written on persist.
    #[must_use]
    pub fn header(&self) -> IndexHeader {
        self.header
    }

    /// Returns the sorted index entries.
    #[must_use]
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Number of index entries (live blocks).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no block has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of block numbers handed out so far (live plus void).
    #[must_use]
    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    /// Reusable block numbers. [`IndexFile::allocate_block`] takes from the end.
    #[must_use]
    pub fn void_blocks(&self) -> &[u32] {
        &self.void_blocks
    }

    /// Appends an entry. Callers append in non-decreasing key order.
    pub fn append_entry(&mut self, min_key: GeoKey, block: u32) {
        debug_assert!(
            self.entries.last().map_or(true, |last| last.min_key <= min_key),
            "index entries appended out of order"
        );
        self.entries.push(IndexEntry::new(min_key, block));
    }

    /// Lowers the registered key of the entry at `pos`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if `pos` is out of range or raising the
    /// key would break the entry order.
    pub fn update_min_key(&mut self, pos: usize, key: GeoKey) -> CoreResult<()> {
        let prev = pos.checked_sub(1).and_then(|p| self.entries.get(p)).map(|e| e.min_key);
        let next = self.entries.get(pos + 1).map(|e| e.min_key);
        let entry = self.entries.get_mut(pos).ok_or_else(|| {
            CoreError::invalid_operation(format!("no index entry at position {pos}"))
        })?;
        if prev.is_some_and(|p| key < p) || next.is_some_and(|n| key > n) {
            return Err(CoreError::invalid_operation(format!(
                "{key} does not fit between neighbouring entries at position {pos}"
            )));
        }
        entry.min_key = key;
        Ok(())
    }

    /// Hands out a block number, reusing void blocks first.
    ///
    /// # Errors
    ///
    /// Returns `AllocationExhausted` when block numbers run out.
    pub fn allocate_block(&mut self) -> CoreResult<u32> {
        if let Some(block) = self.void_blocks.pop() {
            return Ok(block);
        }
        if self.block_count == u32::MAX {
            return Err(CoreError::AllocationExhausted {
                what: "block numbers",
                limit: u64::from(u32::MAX),
            });
        }
        let block = self.block_count;
        self.block_count += 1;
        Ok(block)
    }

    /// Returns an unreferenced block number to the void list.
    ///
    /// The merge engine never calls this; it is the hook for compaction.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the block is live, already void, or
    /// was never allocated.
    pub fn release_block(&mut self, block: u32) -> CoreResult<()> {
        if block >= self.block_count
            || self.entries.iter().any(|e| e.block == block)
            || self.void_blocks.contains(&block)
        {
            return Err(CoreError::invalid_operation(format!(
                "block {block} cannot be released"
            )));
        }
        self.void_blocks.push(block);
        Ok(())
    }

    /// One flag per block number: true if an entry references it.
    #[must_use]
    pub fn footprint(&self) -> Vec<bool> {
        let mut live = vec![false; self.block_count as usize];
        for entry in &self.entries {
            if let Some(slot) = live.get_mut(entry.block as usize) {
                *slot = true;
            }
        }
        live
    }

    /// Positions of the entries whose blocks may hold keys in `[lo, hi)`.
    /// `None` for `hi` leaves the range open above.
    ///
    /// The first block covers keys below its registered minimum. Equal keys
    /// may straddle a block boundary, so the scan starts at the last entry
    /// whose minimum is strictly below `lo`.
    #[must_use]
    pub fn candidate_range(&self, lo: GeoKey, hi: Option<GeoKey>) -> Range<usize> {
        if self.entries.is_empty() || hi.is_some_and(|hi| lo >= hi) {
            return 0..0;
        }
        let start = self.entries.partition_point(|e| e.min_key < lo).saturating_sub(1);
        let end = match hi {
            Some(hi) => self.entries.partition_point(|e| e.min_key < hi),
            None => self.entries.len(),
        };
        start..end.max(start + 1).min(self.entries.len())
    }

    /// Writes the index and void files atomically.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for an in-memory index and I/O errors
    /// from the writes.
    pub fn persist(&self) -> CoreResult<()> {
        let paths = self
            .paths
            .as_ref()
            .ok_or_else(|| CoreError::invalid_operation("in-memory index cannot be persisted"))?;

        let mut data = Vec::with_capacity(INDEX_HEADER_SIZE + self.entries.len() * INDEX_ENTRY_SIZE);
        data.extend_from_slice(&self.header.encode());
        for entry in &self.entries {
            data.extend_from_slice(&entry.min_key.as_u64().to_le_bytes());
            data.extend_from_slice(&entry.block.to_le_bytes());
        }
        atomic_write(&paths.index(), &data)?;

        let void: Vec<u8> = self
            .void_blocks
            .iter()
            .flat_map(|block| block.to_le_bytes())
            .collect();
        atomic_write(&paths.void(), &void)?;

        info!(
            kind = paths.kind(),
            entries = self.entries.len(),
            void = self.void_blocks.len(),
            "persisted index"
        );
        Ok(())
    }

    pub(crate) fn take_entries(&mut self) -> Vec<IndexEntry> {
        std::mem::take(&mut self.entries)
    }

    pub(crate) fn set_entries(&mut self, entries: Vec<IndexEntry>) {
        self.entries = entries;
    }

    fn checked_footprint(&self) -> CoreResult<Vec<bool>> {
        let mut live = vec![false; self.block_count as usize];
        for pair in self.entries.windows(2) {
            if pair[1].min_key < pair[0].min_key {
                return Err(CoreError::corrupted(format!(
                    "index entries out of order at block {}",
                    pair[1].block
                )));
            }
        }
        for entry in &self.entries {
            match live.get_mut(entry.block as usize) {
                Some(slot) if !*slot => *slot = true,
                Some(_) => {
                    return Err(CoreError::corrupted(format!(
                        "block {} referenced twice",
                        entry.block
                    )))
                }
                None => {
                    return Err(CoreError::corrupted(format!(
                        "entry references block {} beyond {} blocks",
                        entry.block, self.block_count
                    )))
                }
            }
        }
        Ok(live)
    }
}

fn decode_entries(data: &[u8]) -> CoreResult<Vec<IndexEntry>> {
    if data.len() % INDEX_ENTRY_SIZE != 0 {
        return Err(CoreError::corrupted(format!(
            "index body of {} bytes is not a whole number of entries",
            data.len()
        )));
    }
    data.chunks_exact(INDEX_ENTRY_SIZE)
        .map(|chunk| {
            Ok(IndexEntry::new(
                GeoKey::new(read_u64(chunk, 0)?),
                read_u32(chunk, 8)?,
            ))
        })
        .collect()
}

fn decode_void(data: &[u8], footprint: &[bool]) -> CoreResult<Vec<u32>> {
    if data.len() % 4 != 0 {
        return Err(CoreError::corrupted("void list truncated"));
    }
    let mut seen = footprint.to_vec();
    let mut void = Vec::with_capacity(data.len() / 4);
    for chunk in data.chunks_exact(4) {
        let block = read_u32(chunk, 0)?;
        match seen.get_mut(block as usize) {
            Some(slot) if !*slot => *slot = true,
            _ => {
                return Err(CoreError::corrupted(format!(
                    "void list holds bad block position {block}"
                )))
            }
        }
        void.push(block);
    }
    Ok(void)
}

/// Unreferenced blocks, highest first so allocation reuses low numbers first.
fn unreferenced_blocks(footprint: &[bool]) -> Vec<u32> {
    footprint
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, live)| !**live)
        .map(|(block, _)| block as u32)
        .collect()
}
