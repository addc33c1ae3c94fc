//! Range reads over memtables and segments

use bytes::Bytes;

use crate::error::Result;
use crate::iterator::{MergeIterator, Source};
use crate::record::{KeyRange, Record, Value};

use super::EngineInner;

/// Lazy, ascending iterator of live `(key, value)` pairs
///
/// Holds snapshots of the memtables and `Arc`s of the segments it reads;
/// dropping it early releases them.
pub struct ScanIter {
    merged: MergeIterator,
}

impl ScanIter {
    pub(super) fn empty() -> Self {
        Self {
            merged: MergeIterator::new(Vec::new()),
        }
    }
}

impl Iterator for ScanIter {
    type Item = Result<(Bytes, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.merged.next()? {
                Ok(Record {
                    key,
                    value: Value::Put(value),
                    ..
                }) => return Some(Ok((key, value))),
                Ok(_) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl EngineInner {
    /// One source per memtable and per overlapping segment, newest first
    pub(super) fn range_iter(&self, range: KeyRange) -> ScanIter {
        let tables = self.memtables.read().clone();
        let view = self.manager.current_view();

        let mut sources = Vec::with_capacity(1 + tables.frozen.len() + view.segment_count());
        sources.push(Source::Memtable(tables.active.scan(range.clone())));
        for frozen in tables.frozen.iter().rev() {
            sources.push(Source::Memtable(frozen.scan(range.clone())));
        }
        for segment in view.segments_for_range(&range) {
            sources.push(Source::Segment(segment.range_iter(range.clone())));
        }

        ScanIter {
            merged: MergeIterator::new(sources).hide_tombstones(),
        }
    }
}
