//! Fixed-stride block file.
//!
//! Block `n` lives at byte offset `n * block_size`. Each slot holds one
//! codec frame whose decoded payload is:
//!
//! ```text
//! | count: u32 (4) | record * count |
//! ```
//!
//! A slot past the end of the file, or one that is all zeroes, reads as
//! an empty block.

use crate::config::{StoreConfig, BLOCK_COUNT_PREFIX};
use crate::dir::StorePaths;
use crate::error::{CoreError, CoreResult};
use crate::record::{read_u32, BlockRecord};
use geoblock_codec::BlockCodec;
use geoblock_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::Mutex;
use std::fmt;
use std::marker::PhantomData;

/// Reusable per-store working memory.
struct BlockBuffers {
    codec: BlockCodec,
    /// Decoded block payload, sized to the largest raw block.
    raw: Vec<u8>,
    /// One block slot.
    slot: Vec<u8>,
}

/// Block storage for records of kind `R`.
///
/// Reads take `&self` and share the scratch buffers through a mutex.
/// Writes take `&mut self`.
pub struct BlockStore<R: BlockRecord> {
    backend: Box<dyn StorageBackend>,
    config: StoreConfig,
    buffers: Mutex<BlockBuffers>,
    _kind: PhantomData<fn() -> R>,
}

impl<R: BlockRecord> BlockStore<R> {
    /// Creates a block store over `backend`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` cannot hold blocks of `R`.
    pub fn new(backend: Box<dyn StorageBackend>, config: StoreConfig) -> CoreResult<Self> {
        config.validate_for::<R>()?;
        let buffers = BlockBuffers {
            codec: BlockCodec::new(config.compression),
            raw: Vec::with_capacity(config.max_raw_len::<R>()),
            slot: vec![0u8; config.block_size],
        };
        Ok(Self {
            backend,
            config,
            buffers: Mutex::new(buffers),
            _kind: PhantomData,
        })
    }

    /// Opens the data file of the store at `paths`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or `config` is invalid.
    pub fn open(paths: &StorePaths, config: StoreConfig) -> CoreResult<Self> {
        let backend = FileBackend::open_with_create_dirs(&paths.data())?;
        Self::new(Box::new(backend), config)
    }

    /// Creates a store held entirely in memory.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` cannot hold blocks of `R`.
    pub fn in_memory(config: StoreConfig) -> CoreResult<Self> {
        Self::new(Box::new(InMemoryBackend::new()), config)
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Byte offset of a block slot.
    #[must_use]
    pub fn block_offset(&self, block: u32) -> u64 {
        u64::from(block) * self.config.block_size as u64
    }

    /// Number of whole slots in the data file.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the size cannot be read.
    pub fn slot_count(&self) -> CoreResult<u64> {
        Ok(self.backend.size()? / self.config.block_size as u64)
    }

    /// Reads and decodes all records of a block, in stored order.
    ///
    /// # Errors
    ///
    /// Returns codec errors for a damaged frame and `Corrupted` if the
    /// payload does not decode into exactly `count` records within capacity.
    pub fn read_block(&self, block: u32) -> CoreResult<Vec<R>> {
        let offset = self.block_offset(block);
        let size = self.backend.size()?;
        if offset >= size {
            return Ok(Vec::new());
        }
        let len = (size - offset).min(self.config.block_size as u64) as usize;
        let frame = self.backend.read_at(offset, len)?;

        let mut guard = self.buffers.lock();
        let buffers = &mut *guard;
        buffers.raw.resize(self.config.max_raw_len::<R>(), 0);
        let raw_len = buffers.codec.decompress(&frame, &mut buffers.raw)?;

        decode_payload(&buffers.raw[..raw_len], block, self.config.capacity)
    }

    /// Encodes `records` and writes them into block `block`.
    ///
    /// Returns the number of slot bytes used, frame header included.
    ///
    /// # Errors
    ///
    /// Returns `BlockOverflow` before writing anything if the records
    /// outweigh the block capacity.
    pub fn write_block(&mut self, block: u32, records: &[R]) -> CoreResult<usize> {
        let weight: usize = records.iter().map(BlockRecord::weight).sum();
        if weight > self.config.capacity {
            return Err(CoreError::BlockOverflow {
                block,
                needed: weight,
                capacity: self.config.capacity,
            });
        }

        let count = u32::try_from(records.len()).map_err(|_| CoreError::BlockOverflow {
            block,
            needed: records.len(),
            capacity: self.config.capacity,
        })?;

        let mut raw = std::mem::take(&mut self.buffers.get_mut().raw);
        raw.clear();
        raw.extend_from_slice(&count.to_le_bytes());
        for record in records {
            record.encode_into(&mut raw);
        }
        let result = self.write_raw(block, &raw);
        self.buffers.get_mut().raw = raw;
        result
    }

    /// Frames an already encoded payload into block `block`.
    ///
    /// # Errors
    ///
    /// Returns `CompressionOverflow` without touching the data file if
    /// `raw` cannot fit the slot.
    pub fn write_raw(&mut self, block: u32, raw: &[u8]) -> CoreResult<usize> {
        let offset = self.block_offset(block);
        let buffers = self.buffers.get_mut();
        let used = buffers.codec.compress(raw, &mut buffers.slot)?;
        self.backend.write_at(offset, &buffers.slot)?;
        Ok(used)
    }

    /// Flushes buffered writes to the OS.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the flush fails.
    pub fn flush(&mut self) -> CoreResult<()> {
        self.backend.flush()?;
        Ok(())
    }

    /// Syncs the data file to disk.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the sync fails.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.backend.sync()?;
        Ok(())
    }
}

impl<R: BlockRecord> fmt::Debug for BlockStore<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockStore")
            .field("kind", &R::KIND)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn decode_payload<R: BlockRecord>(raw: &[u8], block: u32, capacity: usize) -> CoreResult<Vec<R>> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let count = read_u32(raw, 0)? as usize;
    if count > capacity {
        return Err(CoreError::corrupted(format!(
            "block {block} claims {count} records, capacity is {capacity}"
        )));
    }

    let mut records = Vec::with_capacity(count);
    let mut pos = BLOCK_COUNT_PREFIX;
    let mut weight = 0;
    for _ in 0..count {
        let (record, used) = R::decode_from(&raw[pos..])?;
        weight += record.weight();
        pos += used;
        records.push(record);
    }

    if weight > capacity {
        return Err(CoreError::corrupted(format!(
            "block {block} holds weight {weight} above capacity {capacity}"
        )));
    }
    if pos != raw.len() {
        return Err(CoreError::corrupted(format!(
            "block {block} has {} trailing bytes",
            raw.len() - pos
        )));
    }
    Ok(records)
}
