//! Lazy range iteration over a segment, one block at a time.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::Result;
use crate::record::{KeyRange, Record};

use super::reader::Segment;

/// Iterator over a key range of one segment
///
/// Holds an `Arc<Segment>`, so the file outlives a concurrent compaction
/// that retires it.
pub struct SegmentIter {
    segment: Arc<Segment>,
    range: KeyRange,
    next_block: usize,
    buffered: VecDeque<Record>,
    done: bool,
}

impl SegmentIter {
    pub(crate) fn new(segment: Arc<Segment>, range: KeyRange) -> Self {
        let overlaps = segment.overlaps(&range);
        let first_block = match range.as_slices().0 {
            std::ops::Bound::Included(k) | std::ops::Bound::Excluded(k) => {
                segment.block_for(k).unwrap_or(0)
            }
            std::ops::Bound::Unbounded => 0,
        };
        Self {
            segment,
            range,
            next_block: first_block,
            buffered: VecDeque::new(),
            done: !overlaps,
        }
    }

    fn load_next_block(&mut self) -> Result<bool> {
        if self.next_block >= self.segment.block_count() {
            return Ok(false);
        }
        if self.range.above_upper(self.segment.block_first_key(self.next_block)) {
            return Ok(false);
        }
        let records = self.segment.read_block(self.next_block)?;
        self.next_block += 1;
        self.buffered.extend(records);
        Ok(true)
    }
}

impl Iterator for SegmentIter {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some(record) = self.buffered.pop_front() {
                if self.range.below_lower(&record.key) {
                    continue;
                }
                if self.range.above_upper(&record.key) {
                    self.done = true;
                    self.buffered.clear();
                    return None;
                }
                return Some(Ok(record));
            }
            match self.load_next_block() {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
