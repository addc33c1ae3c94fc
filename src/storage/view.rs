//! Level View
//!
//! Immutable snapshot of the live segment set. Readers hold an
//! `Arc<LevelView>` for as long as they need it; the manager publishes a new
//! one on every change.

use std::sync::Arc;

use crate::error::Result;
use crate::record::{KeyRange, Record};

use super::segment::Segment;

/// Segments per level
///
/// Level 0 is ordered newest first (by max sequence) and may overlap.
/// Levels 1 and deeper are ordered by min key and never overlap.
#[derive(Debug, Clone)]
pub struct LevelView {
    levels: Vec<Vec<Arc<Segment>>>,
}

impl LevelView {
    pub fn empty(num_levels: usize) -> Self {
        Self {
            levels: vec![Vec::new(); num_levels],
        }
    }

    pub(crate) fn from_segments(num_levels: usize, segments: Vec<Arc<Segment>>) -> Self {
        let mut view = Self::empty(num_levels);
        for segment in segments {
            view.insert(segment);
        }
        view.sort();
        view
    }

    /// Copy of this view with `removed` dropped and `added` inserted
    pub(crate) fn with_changes(&self, removed: &[u64], added: &[Arc<Segment>]) -> Self {
        let mut view = self.clone();
        for level in &mut view.levels {
            level.retain(|s| !removed.contains(&s.id()));
        }
        for segment in added {
            view.insert(Arc::clone(segment));
        }
        view.sort();
        view
    }

    /// Segments deeper than the last level are rejected before a view is built
    fn insert(&mut self, segment: Arc<Segment>) {
        let level = (segment.level() as usize).min(self.levels.len() - 1);
        self.levels[level].push(segment);
    }

    fn sort(&mut self) {
        if let Some(l0) = self.levels.first_mut() {
            l0.sort_by(|a, b| {
                b.meta()
                    .max_seq
                    .cmp(&a.meta().max_seq)
                    .then(b.id().cmp(&a.id()))
            });
        }
        for level in self.levels.iter_mut().skip(1) {
            level.sort_by(|a, b| a.min_key().cmp(b.min_key()));
        }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, level: usize) -> &[Arc<Segment>] {
        self.levels.get(level).map_or(&[], |l| l.as_slice())
    }

    /// Total file bytes in `level`
    pub fn level_bytes(&self, level: usize) -> u64 {
        self.level(level).iter().map(|s| s.file_size()).sum()
    }

    pub fn segment_count(&self) -> usize {
        self.levels.iter().map(|l| l.len()).sum()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.segments().any(|s| s.id() == id)
    }

    /// Every segment, newest level first
    pub fn segments(&self) -> impl Iterator<Item = &Arc<Segment>> + '_ {
        self.levels.iter().flatten()
    }

    /// Newest record for `key` across all levels, tombstones included
    pub fn get(&self, key: &[u8]) -> Result<Option<Record>> {
        for segment in self.level(0) {
            if let Some(record) = segment.get(key)? {
                return Ok(Some(record));
            }
        }
        for level in self.levels.iter().skip(1) {
            let idx = level.partition_point(|s| &s.max_key()[..] < key);
            if let Some(segment) = level.get(idx) {
                if let Some(record) = segment.get(key)? {
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }

    /// Segments of `level` whose key range intersects `range`
    pub fn overlapping(&self, level: usize, range: &KeyRange) -> Vec<Arc<Segment>> {
        self.level(level)
            .iter()
            .filter(|s| s.overlaps(range))
            .cloned()
            .collect()
    }

    /// True if any level deeper than `level` holds data inside `range`
    pub fn deeper_overlaps(&self, level: usize, range: &KeyRange) -> bool {
        self.levels
            .iter()
            .skip(level + 1)
            .flatten()
            .any(|s| s.overlaps(range))
    }

    /// Overlapping segments in read order: L0 newest first, then L1, L2, ...
    pub fn segments_for_range(&self, range: &KeyRange) -> Vec<Arc<Segment>> {
        (0..self.levels.len())
            .flat_map(|level| self.overlapping(level, range))
            .collect()
    }
}
