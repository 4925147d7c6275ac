//! Range and point lookups over a finished store.

use crate::block::BlockStore;
use crate::config::StoreConfig;
use crate::error::CoreResult;
use crate::geo::GeoKey;
use crate::index::{IndexEntry, IndexFile};
use crate::record::BlockRecord;
use std::collections::HashSet;
use std::vec;

/// Read access to one store.
pub struct Reader<'a, R: BlockRecord> {
    index: &'a IndexFile,
    store: &'a BlockStore<R>,
}

impl<R: BlockRecord> Clone for Reader<'_, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R: BlockRecord> Copy for Reader<'_, R> {}

impl<'a, R: BlockRecord> Reader<'a, R> {
    /// Creates a reader over an index and its block store.
    #[must_use]
    pub fn new(index: &'a IndexFile, store: &'a BlockStore<R>) -> Self {
        Self { index, store }
    }

    /// Returns the index being read.
    #[must_use]
    pub fn index(&self) -> &'a IndexFile {
        self.index
    }

    /// Returns the configuration of the store being read.
    #[must_use]
    pub fn config(&self) -> &'a StoreConfig {
        self.store.config()
    }

    /// Reads one block directly, bypassing the index.
    ///
    /// # Errors
    ///
    /// Returns storage or codec errors from the read.
    pub fn read_block(&self, block: u32) -> CoreResult<Vec<R>> {
        self.store.read_block(block)
    }

    /// Records with keys in `[lo, hi)`, in key order.
    #[must_use]
    pub fn lookup_range(&self, lo: GeoKey, hi: GeoKey) -> RangeScan<'a, R> {
        RangeScan {
            reader: *self,
            lo,
            hi: Some(hi),
        }
    }

    /// Returns a record stored under `key`, if any.
    ///
    /// When several records share the key, the first in key order is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns storage or codec errors from reading candidate blocks.
    pub fn lookup_point(&self, key: GeoKey) -> CoreResult<Option<R>> {
        let hi = (key < GeoKey::MAX).then(|| key.successor());
        let scan = RangeScan {
            reader: *self,
            lo: key,
            hi,
        };
        scan.iter().next().transpose()
    }

    /// All records stored under `key`, one per id.
    ///
    /// # Errors
    ///
    /// Returns storage or codec errors from reading candidate blocks.
    pub fn lookup_key(&self, key: GeoKey) -> CoreResult<Vec<R>> {
        let hi = (key < GeoKey::MAX).then(|| key.successor());
        let scan = RangeScan {
            reader: *self,
            lo: key,
            hi,
        };
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for record in scan.iter() {
            let record = record?;
            if record.key() == key && seen.insert(record.id()) {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Records whose key is any of `keys`, visiting each block once.
    ///
    /// # Errors
    ///
    /// Returns storage or codec errors from reading candidate blocks.
    pub fn lookup_discrete(&self, keys: &[GeoKey]) -> CoreResult<Vec<R>> {
        let mut keys = keys.to_vec();
        keys.sort_unstable();
        keys.dedup();

        let mut positions = Vec::new();
        for &key in &keys {
            let hi = (key < GeoKey::MAX).then(|| key.successor());
            for pos in self.index.candidate_range(key, hi) {
                if positions.last().map_or(true, |&last| pos > last) {
                    positions.push(pos);
                }
            }
        }

        let mut out = Vec::new();
        for pos in positions {
            let entry = self.index.entries()[pos];
            for record in self.store.read_block(entry.block)? {
                if keys.binary_search(&record.key()).is_ok() {
                    out.push(record);
                }
            }
        }
        Ok(out)
    }

    /// Every record of the store, in key order.
    #[must_use]
    pub fn scan_key_order(&self) -> RangeScan<'a, R> {
        RangeScan {
            reader: *self,
            lo: GeoKey::MIN,
            hi: None,
        }
    }

    /// Live blocks in key order, with their index entries.
    #[must_use]
    pub fn blocks_key_order(&self) -> BlockIter<'a, R> {
        BlockIter {
            store: self.store,
            entries: self.index.entries().to_vec().into_iter(),
        }
    }

    /// Live blocks in block number order (file order), with their index
    /// entries.
    #[must_use]
    pub fn scan_block_order(&self) -> BlockIter<'a, R> {
        let mut entries = self.index.entries().to_vec();
        entries.sort_unstable_by_key(|e| e.block);
        BlockIter {
            store: self.store,
            entries: entries.into_iter(),
        }
    }
}

/// A lazy, restartable key range scan.
pub struct RangeScan<'a, R: BlockRecord> {
    reader: Reader<'a, R>,
    lo: GeoKey,
    hi: Option<GeoKey>,
}

impl<'a, R: BlockRecord> RangeScan<'a, R> {
    /// Starts a pass over the range. Each call starts from the beginning.
    #[must_use]
    pub fn iter(&self) -> RangeIter<'a, R> {
        let positions = self.reader.index.candidate_range(self.lo, self.hi);
        RangeIter {
            reader: self.reader,
            lo: self.lo,
            hi: self.hi,
            next: positions.start,
            end: positions.end,
            current: Vec::new().into_iter(),
        }
    }

    /// Number of blocks a pass reads.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.reader.index.candidate_range(self.lo, self.hi).len()
    }

    /// Collects one pass into a vector.
    ///
    /// # Errors
    ///
    /// Returns the first error of the pass.
    pub fn collect_vec(&self) -> CoreResult<Vec<R>> {
        self.iter().collect()
    }
}

/// Iterator over one pass of a [`RangeScan`].
pub struct RangeIter<'a, R: BlockRecord> {
    reader: Reader<'a, R>,
    lo: GeoKey,
    hi: Option<GeoKey>,
    next: usize,
    end: usize,
    current: vec::IntoIter<R>,
}

impl<R: BlockRecord> Iterator for RangeIter<'_, R> {
    type Item = CoreResult<R>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            for record in self.current.by_ref() {
                let key = record.key();
                if key >= self.lo && self.hi.map_or(true, |hi| key < hi) {
                    return Some(Ok(record));
                }
            }
            if self.next >= self.end {
                return None;
            }
            let entry = self.reader.index.entries()[self.next];
            self.next += 1;
            match self.reader.store.read_block(entry.block) {
                Ok(records) => self.current = records.into_iter(),
                Err(e) => {
                    self.next = self.end;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Iterator over whole blocks.
pub struct BlockIter<'a, R: BlockRecord> {
    store: &'a BlockStore<R>,
    entries: vec::IntoIter<IndexEntry>,
}

impl<R: BlockRecord> Iterator for BlockIter<'_, R> {
    type Item = CoreResult<(IndexEntry, Vec<R>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entries.next()?;
        Some(self.store.read_block(entry.block).map(|records| (entry, records)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}
