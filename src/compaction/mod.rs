//! Compaction Module
//!
//! Merges overlapping segments into fewer, larger ones in the next level,
//! dropping shadowed versions and, where safe, tombstones.
//!
//! ## Crash safety
//! Outputs are written as `*.tmp`, fsynced, renamed and reopened before a
//! single manifest edit swaps them in. A crash before that edit leaves
//! unlisted files which the next open deletes.

mod compactor;
mod policy;

use std::sync::Arc;

pub use compactor::{CompactionStats, Compactor};
pub use policy::{CompactionPolicy, LeveledPolicy};

use crate::record::KeyRange;
use crate::storage::Segment;

/// One unit of compaction work
#[derive(Debug, Clone)]
pub struct CompactionTask {
    pub source_level: usize,
    pub target_level: usize,
    /// Segments taken from the source level
    pub inputs: Vec<Arc<Segment>>,
    /// Segments of the target level overlapping the inputs
    pub overlapping: Vec<Arc<Segment>>,
    pub score: f64,
}

impl CompactionTask {
    pub fn new(
        source_level: usize,
        target_level: usize,
        inputs: Vec<Arc<Segment>>,
        overlapping: Vec<Arc<Segment>>,
        score: f64,
    ) -> Self {
        Self {
            source_level,
            target_level,
            inputs,
            overlapping,
            score,
        }
    }

    /// Every segment the task consumes, newest first
    pub fn all_inputs(&self) -> Vec<Arc<Segment>> {
        self.inputs
            .iter()
            .chain(self.overlapping.iter())
            .cloned()
            .collect()
    }

    /// Closed key range covering all inputs
    pub fn key_range(&self) -> Option<KeyRange> {
        policy::key_span(&self.all_inputs())
    }

    pub fn input_bytes(&self) -> u64 {
        self.all_inputs().iter().map(|s| s.file_size()).sum()
    }
}
