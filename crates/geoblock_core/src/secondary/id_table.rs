//! Flat id to block table.
//!
//! Slot `id - 1` holds the number of the block storing that id, as a
//! little-endian `u16`. [`ABSENT_BLOCK`] marks ids with no record.

use crate::dir::atomic_write;
use crate::error::{CoreError, CoreResult};
use crate::reader::Reader;
use crate::record::BlockRecord;
use std::path::Path;
use tracing::info;

/// Slot value of an id that is not stored.
pub const ABSENT_BLOCK: u16 = u16::MAX;

/// Dense id to block lookup, valid once a store is fully ingested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdBlockTable {
    slots: Vec<u16>,
}

impl IdBlockTable {
    /// Builds the table for ids `1..=max_id` in one pass over the store.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRecord` for id 0 or an id above `max_id`, and
    /// `AllocationExhausted` if a block number does not fit 16 bits.
    pub fn build<R: BlockRecord>(reader: &Reader<'_, R>, max_id: u64) -> CoreResult<Self> {
        let len = usize::try_from(max_id).map_err(|_| CoreError::AllocationExhausted {
            what: "id table slots",
            limit: usize::MAX as u64,
        })?;
        let mut slots = vec![ABSENT_BLOCK; len];

        for item in reader.scan_block_order() {
            let (entry, records) = item?;
            let block = u16::try_from(entry.block)
                .ok()
                .filter(|&b| b != ABSENT_BLOCK)
                .ok_or(CoreError::AllocationExhausted {
                    what: "16-bit block numbers",
                    limit: u64::from(ABSENT_BLOCK) - 1,
                })?;

            for record in records {
                let id = record.id();
                let slot = id
                    .checked_sub(1)
                    .and_then(|i| usize::try_from(i).ok())
                    .and_then(|i| slots.get_mut(i))
                    .ok_or_else(|| {
                        CoreError::invalid_record(format!(
                            "{} id {id} outside 1..={max_id}",
                            R::KIND
                        ))
                    })?;
                *slot = block;
            }
        }

        info!(kind = R::KIND, max_id, "built id table");
        Ok(Self { slots })
    }

    /// Largest id the table covers.
    #[must_use]
    pub fn max_id(&self) -> u64 {
        self.slots.len() as u64
    }

    /// Block holding `id`, if stored.
    #[must_use]
    pub fn block_of(&self, id: u64) -> Option<u32> {
        let index = usize::try_from(id.checked_sub(1)?).ok()?;
        match self.slots.get(index) {
            Some(&ABSENT_BLOCK) | None => None,
            Some(&block) => Some(u32::from(block)),
        }
    }

    /// True if `id` is stored.
    #[must_use]
    pub fn contains(&self, id: u64) -> bool {
        self.block_of(id).is_some()
    }

    /// Reads the record with `id` through its block.
    ///
    /// # Errors
    ///
    /// Returns storage or codec errors from reading the block.
    pub fn lookup<R: BlockRecord>(&self, reader: &Reader<'_, R>, id: u64) -> CoreResult<Option<R>> {
        let Some(block) = self.block_of(id) else {
            return Ok(None);
        };
        let records = reader.read_block(block)?;
        Ok(records.into_iter().find(|r| r.id() == id))
    }

    /// Encodes the table as a flat `u16` array.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        self.slots.iter().flat_map(|slot| slot.to_le_bytes()).collect()
    }

    /// Decodes a table written by [`IdBlockTable::encode`].
    ///
    /// # Errors
    ///
    /// Returns `Corrupted` for an odd byte count.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() % 2 != 0 {
            return Err(CoreError::corrupted("id table has odd length"));
        }
        let slots = data
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Self { slots })
    }

    /// Writes the table atomically to `path`.
    ///
    /// # Errors
    ///
    /// Returns I/O errors from the write.
    pub fn persist(&self, path: &Path) -> CoreResult<()> {
        atomic_write(path, &self.encode())
    }

    /// Reads a table from `path`.
    ///
    /// # Errors
    ///
    /// Returns I/O errors and `Corrupted` for a damaged file.
    pub fn load(path: &Path) -> CoreResult<Self> {
        Self::decode(&std::fs::read(path)?)
    }
}
