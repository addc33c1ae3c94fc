//! K-way merge over memtable and segment iterators.
//!
//! Produces records in ascending key order. When a key appears in several
//! sources only the record with the highest sequence number is emitted.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{LogosError, Result};
use crate::memtable::MemTableIter;
use crate::record::Record;
use crate::storage::SegmentIter;

/// One sorted input to the merge
pub enum Source {
    Memtable(MemTableIter),
    Segment(SegmentIter),
}

impl Source {
    fn next_record(&mut self) -> Option<Result<Record>> {
        match self {
            Source::Memtable(iter) => iter.next().map(Ok),
            Source::Segment(iter) => iter.next(),
        }
    }
}

/// The current head of one source
struct HeapEntry {
    record: Record,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: smallest key first, then highest seq,
        // then the source listed first.
        other
            .record
            .key
            .cmp(&self.record.key)
            .then_with(|| self.record.seq.cmp(&other.record.seq))
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Newest-wins merge of several sorted sources
pub struct MergeIterator {
    sources: Vec<Source>,
    heap: BinaryHeap<HeapEntry>,
    hide_tombstones: bool,
    primed: bool,
    pending_error: Option<LogosError>,
    done: bool,
}

impl MergeIterator {
    /// Merge `sources`, listed newest first. Tombstones are emitted.
    pub fn new(sources: Vec<Source>) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            hide_tombstones: false,
            primed: false,
            pending_error: None,
            done: false,
        }
    }

    /// Skip keys whose newest record is a tombstone
    pub fn hide_tombstones(mut self) -> Self {
        self.hide_tombstones = true;
        self
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    fn prime(&mut self) {
        for source in 0..self.sources.len() {
            self.advance(source);
        }
        self.primed = true;
    }

    /// Pull the next record of `source` into the heap
    fn advance(&mut self, source: usize) {
        match self.sources[source].next_record() {
            Some(Ok(record)) => self.heap.push(HeapEntry { record, source }),
            Some(Err(e)) => {
                if self.pending_error.is_none() {
                    self.pending_error = Some(e);
                }
            }
            None => {}
        }
    }

    fn fail(&mut self) -> Option<Result<Record>> {
        let err = self.pending_error.take()?;
        self.done = true;
        self.heap.clear();
        Some(Err(err))
    }
}

impl Iterator for MergeIterator {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if !self.primed {
            self.prime();
        }
        loop {
            if self.pending_error.is_some() {
                return self.fail();
            }
            let top = match self.heap.pop() {
                Some(top) => top,
                None => {
                    self.done = true;
                    return None;
                }
            };
            self.advance(top.source);

            // Older versions of the same key sit right below the winner
            while self
                .heap
                .peek()
                .map_or(false, |next| next.record.key == top.record.key)
            {
                if let Some(shadowed) = self.heap.pop() {
                    self.advance(shadowed.source);
                }
            }

            if self.pending_error.is_some() {
                return self.fail();
            }
            if self.hide_tombstones && top.record.is_tombstone() {
                continue;
            }
            return Some(Ok(top.record));
        }
    }
}
