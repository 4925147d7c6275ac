//! Structural checks for a finished store.
//!
//! [`check_store`] reads every live block and verifies:
//! - index entries sorted by minimum key, each naming a distinct block
//! - every block below the block count, void blocks disjoint from live ones
//! - records inside a block sorted, the first at the entry's minimum key
//! - no record in a block above the minimum key of the next entry
//! - block weight within the configured capacity

use geoblock_core::{BlockRecord, GeoKey, Store};
use std::fmt;

/// Summary of a store that passed [`check_store`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreReport {
    /// Live blocks.
    pub blocks: usize,
    /// Records across all live blocks.
    pub records: usize,
    /// Units across all live blocks.
    pub units: usize,
    /// Units in the fullest block.
    pub fullest_block: usize,
    /// Block numbers neither live nor void.
    pub unreachable_blocks: usize,
    /// Boundaries where a block ends on the next block's minimum key.
    pub shared_boundaries: usize,
}

/// A broken store invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    /// Position of the offending index entry, if any.
    pub entry: Option<usize>,
    /// What is wrong.
    pub message: String,
}

impl InvariantViolation {
    fn at(entry: usize, message: impl Into<String>) -> Self {
        Self {
            entry: Some(entry),
            message: message.into(),
        }
    }

    fn global(message: impl Into<String>) -> Self {
        Self {
            entry: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entry {
            Some(entry) => write!(f, "entry {entry}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for InvariantViolation {}

/// Verifies the structural invariants of `store`.
///
/// # Errors
///
/// Returns the first violation found. Read errors are reported as
/// violations of the entry being read.
pub fn check_store<R: BlockRecord>(store: &Store<R>) -> Result<StoreReport, InvariantViolation> {
    let index = store.index();
    let entries = index.entries();
    let block_count = index.block_count();
    let capacity = store.blocks().config().capacity;

    let mut seen = vec![false; block_count as usize];
    for (pos, entry) in entries.iter().enumerate() {
        let slot = seen.get_mut(entry.block as usize).ok_or_else(|| {
            InvariantViolation::at(pos, format!("block {} beyond count {block_count}", entry.block))
        })?;
        if std::mem::replace(slot, true) {
            return Err(InvariantViolation::at(pos, format!("block {} listed twice", entry.block)));
        }
    }
    for &block in index.void_blocks() {
        let slot = seen.get_mut(block as usize).ok_or_else(|| {
            InvariantViolation::global(format!("void block {block} beyond count {block_count}"))
        })?;
        if std::mem::replace(slot, true) {
            return Err(InvariantViolation::global(format!(
                "void block {block} is live or listed twice"
            )));
        }
    }

    let mut report = StoreReport {
        blocks: entries.len(),
        unreachable_blocks: seen.iter().filter(|&&used| !used).count(),
        ..StoreReport::default()
    };

    for (pos, entry) in entries.iter().enumerate() {
        let next_min: Option<GeoKey> = entries.get(pos + 1).map(|next| next.min_key);
        if next_min.is_some_and(|next| next < entry.min_key) {
            return Err(InvariantViolation::at(pos, "entries not sorted by minimum key"));
        }

        let records = store
            .blocks()
            .read_block(entry.block)
            .map_err(|e| InvariantViolation::at(pos, format!("read failed: {e}")))?;
        let (first, last) = match (records.first(), records.last()) {
            (Some(first), Some(last)) => (first.key(), last.key()),
            _ => return Err(InvariantViolation::at(pos, format!("block {} is empty", entry.block))),
        };

        if records.windows(2).any(|w| w[0].key() > w[1].key()) {
            return Err(InvariantViolation::at(pos, "records not sorted"));
        }
        if first != entry.min_key {
            return Err(InvariantViolation::at(
                pos,
                format!("first key {first} differs from minimum {}", entry.min_key),
            ));
        }
        if let Some(next) = next_min {
            if last > next {
                return Err(InvariantViolation::at(
                    pos,
                    format!("last key {last} above next minimum {next}"),
                ));
            }
            if last == next {
                report.shared_boundaries += 1;
            }
        }

        let units: usize = records.iter().map(BlockRecord::weight).sum();
        if units > capacity {
            return Err(InvariantViolation::at(
                pos,
                format!("{units} units exceed capacity {capacity}"),
            ));
        }

        report.records += records.len();
        report.units += units;
        report.fullest_block = report.fullest_block.max(units);
    }

    Ok(report)
}

/// Records reduced to `(key, id)` pairs in sorted order, for comparing
/// contents regardless of how equal keys were ordered.
#[must_use]
pub fn key_id_multiset<'a, R: BlockRecord>(records: impl IntoIterator<Item = &'a R>) -> Vec<(u64, u64)> {
    let mut pairs: Vec<(u64, u64)> = records
        .into_iter()
        .map(|r| (r.key().as_u64(), r.id()))
        .collect();
    pairs.sort_unstable();
    pairs
}
