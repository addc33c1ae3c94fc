//! MemTable implementation
//!
//! Copy-on-write ordered map with a frozen, read-only counterpart.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::record::{bound_as_slice, is_empty_range, KeyRange, Record};

type Map = BTreeMap<Bytes, Record>;

/// In-memory table for recent writes
pub struct MemTable {
    data: RwLock<Arc<Map>>,
    /// Approximate size in bytes
    size: AtomicUsize,
    max_seq: AtomicU64,
    flush_threshold: usize,
}

impl MemTable {
    /// Create a new empty MemTable that asks to be flushed past `flush_threshold` bytes
    pub fn new(flush_threshold: usize) -> Self {
        Self {
            data: RwLock::new(Arc::new(BTreeMap::new())),
            size: AtomicUsize::new(0),
            max_seq: AtomicU64::new(0),
            flush_threshold,
        }
    }

    /// Insert a record unless a newer version of the key is already present.
    ///
    /// Returns the approximate size after the insert.
    pub fn put(&self, record: Record) -> usize {
        let added = record.approximate_size();
        let seq = record.seq;

        let mut guard = self.data.write();
        // Clones the map only if a scan or freeze still holds the old Arc
        let map = Arc::make_mut(&mut guard);
        let removed = match map.get(&record.key) {
            Some(existing) if existing.seq > record.seq => return self.size(),
            Some(existing) => existing.approximate_size(),
            None => 0,
        };
        map.insert(record.key.clone(), record);

        // Still under the write lock, so size updates never interleave
        self.max_seq.fetch_max(seq, Ordering::SeqCst);
        let new_size = self.size.load(Ordering::SeqCst) + added - removed;
        self.size.store(new_size, Ordering::SeqCst);
        drop(guard);
        new_size
    }

    /// Highest-sequence record for `key`, tombstones included
    pub fn get(&self, key: &[u8]) -> Option<Record> {
        self.data.read().get(key).cloned()
    }

    /// Lazily iterate `range` over the table as it is right now
    pub fn scan(&self, range: KeyRange) -> MemTableIter {
        MemTableIter::new(self.snapshot(), range)
    }

    /// Immutable view of the current contents
    pub fn snapshot(&self) -> Arc<BTreeMap<Bytes, Record>> {
        Arc::clone(&self.data.read())
    }

    /// Seal the current contents for flushing.
    ///
    /// `next_log_id` is the WAL file that takes over once this table is
    /// retired; logs below it become removable after the flush.
    pub fn freeze(&self, next_log_id: u64) -> FrozenMemTable {
        FrozenMemTable {
            data: self.snapshot(),
            size: self.size(),
            max_seq: self.max_sequence(),
            next_log_id,
        }
    }

    /// Check if the table has outgrown its flush threshold
    pub fn should_flush(&self) -> bool {
        self.size() >= self.flush_threshold
    }

    /// Get approximate size in bytes
    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    pub fn max_sequence(&self) -> u64 {
        self.max_seq.load(Ordering::SeqCst)
    }

    /// Get entry count
    pub fn entry_count(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

/// A sealed memtable waiting to become a level-0 segment
#[derive(Debug, Clone)]
pub struct FrozenMemTable {
    data: Arc<Map>,
    size: usize,
    max_seq: u64,
    next_log_id: u64,
}

impl FrozenMemTable {
    pub fn get(&self, key: &[u8]) -> Option<Record> {
        self.data.get(key).cloned()
    }

    pub fn scan(&self, range: KeyRange) -> MemTableIter {
        MemTableIter::new(Arc::clone(&self.data), range)
    }

    /// Every record in key order, for flushing
    pub fn iter(&self) -> impl Iterator<Item = &Record> + '_ {
        self.data.values()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn max_sequence(&self) -> u64 {
        self.max_seq
    }

    pub fn next_log_id(&self) -> u64 {
        self.next_log_id
    }

    pub fn entry_count(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Iterator over a memtable snapshot
///
/// Owns its snapshot, so it never observes puts made after it was created.
pub struct MemTableIter {
    data: Arc<Map>,
    /// Next lower bound; advances past each yielded key
    cursor: Bound<Bytes>,
    upper: Bound<Bytes>,
}

impl MemTableIter {
    fn new(data: Arc<Map>, range: KeyRange) -> Self {
        Self {
            data,
            cursor: range.lower,
            upper: range.upper,
        }
    }
}

impl Iterator for MemTableIter {
    type Item = Record;

    fn next(&mut self) -> Option<Self::Item> {
        let bounds = (bound_as_slice(&self.cursor), bound_as_slice(&self.upper));
        // BTreeMap::range panics on inverted bounds
        if is_empty_range(bounds.0, bounds.1) {
            return None;
        }
        let record = self
            .data
            .range::<[u8], _>(bounds)
            .next()
            .map(|(_, record)| record.clone())?;
        self.cursor = Bound::Excluded(record.key.clone());
        Some(record)
    }
}
