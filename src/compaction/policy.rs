//! Compaction policies
//!
//! A policy looks at a [`LevelView`] and decides what, if anything, to
//! compact next.

use std::fmt::Debug;
use std::sync::Arc;

use bytes::Bytes;

use crate::config::Options;
use crate::record::KeyRange;
use crate::storage::{LevelView, Segment};

use super::CompactionTask;

/// Chooses the next compaction
pub trait CompactionPolicy: Send + Sync + Debug {
    /// `None` when nothing needs compacting
    fn pick(&self, view: &LevelView, options: &Options) -> Option<CompactionTask>;
}

/// Leveled compaction with geometric level sizes
///
/// - L0 score = segment count / `level0_compaction_trigger`
/// - Ln score = bytes / (`level1_size_budget` * `level_size_multiplier`^(n-1))
///
/// The level with the highest score >= 1 is compacted into the next one.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeveledPolicy;

impl LeveledPolicy {
    /// Score of every level that may act as a compaction source
    pub fn level_scores(view: &LevelView, options: &Options) -> Vec<f64> {
        let last = view.num_levels().saturating_sub(1);
        (0..last)
            .map(|level| {
                if level == 0 {
                    view.level(0).len() as f64 / options.level0_compaction_trigger.max(1) as f64
                } else {
                    view.level_bytes(level) as f64 / options.level_size_budget(level).max(1) as f64
                }
            })
            .collect()
    }

    fn level0_task(view: &LevelView, score: f64) -> Option<CompactionTask> {
        let inputs: Vec<Arc<Segment>> = view.level(0).to_vec();
        let range = key_span(&inputs)?;
        let overlapping = view.overlapping(1, &range);
        Some(CompactionTask::new(0, 1, inputs, overlapping, score))
    }

    fn leveln_task(view: &LevelView, level: usize, score: f64) -> Option<CompactionTask> {
        // The segment holding the oldest data moves down first
        let victim = view
            .level(level)
            .iter()
            .min_by_key(|s| (s.meta().min_seq, s.id()))?;
        let range = KeyRange::inclusive(victim.min_key().clone(), victim.max_key().clone());
        let overlapping = view.overlapping(level + 1, &range);
        Some(CompactionTask::new(
            level,
            level + 1,
            vec![Arc::clone(victim)],
            overlapping,
            score,
        ))
    }
}

impl CompactionPolicy for LeveledPolicy {
    fn pick(&self, view: &LevelView, options: &Options) -> Option<CompactionTask> {
        let (level, score) = Self::level_scores(view, options)
            .into_iter()
            .enumerate()
            .filter(|(_, score)| *score >= 1.0)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;

        if level == 0 {
            Self::level0_task(view, score)
        } else {
            Self::leveln_task(view, level, score)
        }
    }
}

/// Smallest closed range covering every segment in `segments`
pub(crate) fn key_span(segments: &[Arc<Segment>]) -> Option<KeyRange> {
    let min: &Bytes = segments.iter().map(|s| s.min_key()).min()?;
    let max: &Bytes = segments.iter().map(|s| s.max_key()).max()?;
    Some(KeyRange::inclusive(min.clone(), max.clone()))
}
