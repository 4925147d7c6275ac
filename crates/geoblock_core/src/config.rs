//! Store configuration.

use crate::error::{CoreError, CoreResult};
use crate::record::BlockRecord;
use geoblock_codec::{Compression, FRAME_HEADER_SIZE};

/// Bytes of the record count that prefixes every block payload.
pub const BLOCK_COUNT_PREFIX: usize = 4;

/// Smallest supported block slot.
pub const MIN_BLOCK_SIZE: usize = 64;

/// Largest supported block slot.
pub const MAX_BLOCK_SIZE: usize = 1 << 30;

/// Configuration for one store (one entity kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Size of one block slot in the data file, in bytes. A power of two.
    pub block_size: usize,

    /// Block capacity in record units (records for fixed-size kinds,
    /// words for variable-size kinds).
    pub capacity: usize,

    /// Codec applied to each block.
    pub compression: Compression,

    /// Units buffered in memory before a flush.
    pub flush_interval: usize,

    /// Right shift that turns a key into its coarse spatial bucket.
    pub bucket_shift: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            block_size: 256 * 1024,
            capacity: 8192,
            compression: Compression::Lz4,
            flush_interval: 32 * 1024 * 1024,
            bucket_shift: 36,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the block slot size in bytes.
    #[must_use]
    pub const fn block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes;
        self
    }

    /// Sets the block capacity in record units.
    #[must_use]
    pub const fn capacity(mut self, units: usize) -> Self {
        self.capacity = units;
        self
    }

    /// Sets the block codec.
    #[must_use]
    pub const fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Sets the flush threshold in record units.
    #[must_use]
    pub const fn flush_interval(mut self, units: usize) -> Self {
        self.flush_interval = units;
        self
    }

    /// Sets the coarse bucket shift.
    #[must_use]
    pub const fn bucket_shift(mut self, shift: u32) -> Self {
        self.bucket_shift = shift;
        self
    }

    /// Largest raw (uncompressed) block payload for record kind `R`.
    #[must_use]
    pub fn max_raw_len<R: BlockRecord>(&self) -> usize {
        BLOCK_COUNT_PREFIX + self.capacity * R::UNIT_BYTES
    }

    /// Smallest block size that fits a full block of `R` stored raw.
    #[must_use]
    pub fn min_block_size_for<R: BlockRecord>(&self) -> usize {
        (FRAME_HEADER_SIZE + self.max_raw_len::<R>())
            .next_power_of_two()
            .max(MIN_BLOCK_SIZE)
    }

    /// Checks that the configuration can hold records of kind `R`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` describing the first violated constraint.
    pub fn validate_for<R: BlockRecord>(&self) -> CoreResult<()> {
        if !self.block_size.is_power_of_two()
            || !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size)
        {
            return Err(CoreError::invalid_config(format!(
                "block size {} must be a power of two in {MIN_BLOCK_SIZE}..={MAX_BLOCK_SIZE}",
                self.block_size
            )));
        }

        if self.capacity == 0 || self.capacity > (u32::MAX >> 1) as usize {
            return Err(CoreError::invalid_config(format!(
                "capacity {} out of range",
                self.capacity
            )));
        }

        let needed = FRAME_HEADER_SIZE + self.max_raw_len::<R>();
        if needed > self.block_size {
            return Err(CoreError::invalid_config(format!(
                "{} blocks of capacity {} need {needed} bytes, block size is {}",
                R::KIND,
                self.capacity,
                self.block_size
            )));
        }

        if self.flush_interval == 0 {
            return Err(CoreError::invalid_config("flush interval must be positive"));
        }

        if self.bucket_shift >= 64 {
            return Err(CoreError::invalid_config(format!(
                "bucket shift {} must be below 64",
                self.bucket_shift
            )));
        }

        Ok(())
    }

    /// log2 of the block size, as stored in the index header.
    #[must_use]
    pub fn block_size_log2(&self) -> u8 {
        self.block_size.trailing_zeros() as u8
    }

    /// log2 of the capacity rounded up to a power of two.
    #[must_use]
    pub fn capacity_class_log2(&self) -> u8 {
        self.capacity.next_power_of_two().trailing_zeros() as u8
    }
}
