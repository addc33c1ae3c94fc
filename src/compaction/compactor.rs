//! Compaction execution

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::iterator::{MergeIterator, Source};
use crate::storage::{Segment, SegmentFileWriter, SegmentManager};

use super::CompactionTask;

/// Outcome of one compaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub input_segments: usize,
    pub output_segments: usize,
    pub records_written: u64,
    pub tombstones_dropped: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Runs compaction tasks against a [`SegmentManager`]
pub struct Compactor {
    manager: Arc<SegmentManager>,
    /// One compaction at a time; inputs of concurrent tasks could overlap
    running: Mutex<()>,
}

impl Compactor {
    pub fn new(manager: Arc<SegmentManager>) -> Self {
        Self {
            manager,
            running: Mutex::new(()),
        }
    }

    /// Pick and run compactions until the policy finds nothing to do.
    ///
    /// Returns the number of compactions performed.
    pub fn compact_all(&self) -> Result<usize> {
        let _guard = self.running.lock();
        let mut runs = 0;
        while let Some(task) = self.manager.pick_compaction_candidate() {
            self.run_locked(&task)?;
            runs += 1;
        }
        Ok(runs)
    }

    /// Build outputs for `task` and install them
    pub fn run(&self, task: &CompactionTask) -> Result<CompactionStats> {
        let _guard = self.running.lock();
        self.run_locked(task)
    }

    fn run_locked(&self, task: &CompactionTask) -> Result<CompactionStats> {
        let started = Instant::now();
        let (outputs, mut stats) = self.build_outputs(task)?;
        stats.bytes_out = outputs.iter().map(|s| s.file_size()).sum();
        stats.output_segments = outputs.len();
        self.install(task, outputs)?;

        info!(
            from = task.source_level,
            to = task.target_level,
            inputs = stats.input_segments,
            outputs = stats.output_segments,
            bytes_in = stats.bytes_in,
            bytes_out = stats.bytes_out,
            tombstones_dropped = stats.tombstones_dropped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "compaction finished"
        );
        Ok(stats)
    }

    /// Merge the task's inputs into new, durable segment files at the
    /// target level. Nothing is visible to readers until [`Self::install`].
    pub fn build_outputs(&self, task: &CompactionTask) -> Result<(Vec<Arc<Segment>>, CompactionStats)> {
        let inputs = task.all_inputs();
        let mut stats = CompactionStats {
            input_segments: inputs.len(),
            bytes_in: task.input_bytes(),
            ..CompactionStats::default()
        };

        let drop_tombstones = match task.key_range() {
            Some(range) => !self
                .manager
                .current_view()
                .deeper_overlaps(task.target_level, &range),
            None => true,
        };
        debug!(
            from = task.source_level,
            to = task.target_level,
            inputs = inputs.len(),
            drop_tombstones,
            "starting compaction"
        );

        let sources = inputs
            .iter()
            .map(|segment| Source::Segment(segment.iter()))
            .collect();
        let merged = MergeIterator::new(sources);

        let mut outputs: Vec<Arc<Segment>> = Vec::new();
        let result = self.write_outputs(task, merged, drop_tombstones, &mut outputs, &mut stats);
        if let Err(e) = result {
            warn!(error = %e, "compaction failed; discarding partial outputs");
            for output in &outputs {
                output.mark_obsolete();
            }
            return Err(e);
        }
        Ok((outputs, stats))
    }

    fn write_outputs(
        &self,
        task: &CompactionTask,
        merged: MergeIterator,
        drop_tombstones: bool,
        outputs: &mut Vec<Arc<Segment>>,
        stats: &mut CompactionStats,
    ) -> Result<()> {
        let options = self.manager.options();
        let level = task.target_level as u32;
        let mut current: Option<(u64, SegmentFileWriter)> = None;

        for record in merged {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    if let Some((_, writer)) = current.take() {
                        writer.abandon();
                    }
                    return Err(e);
                }
            };
            if record.is_tombstone() && drop_tombstones {
                stats.tombstones_dropped += 1;
                continue;
            }

            if current.is_none() {
                let id = self.manager.allocate_segment_id();
                let path = self.manager.segment_path(id, level);
                let writer = SegmentFileWriter::create(
                    &path,
                    level,
                    options.block_size,
                    options.filter_bits_per_key,
                )?;
                current = Some((id, writer));
            }
            if let Some((_, writer)) = current.as_mut() {
                writer.add(&record)?;
                stats.records_written += 1;
                if writer.estimated_size() < options.target_segment_size {
                    continue;
                }
            }
            if let Some((id, writer)) = current.take() {
                outputs.push(self.seal(id, level, writer)?);
            }
        }

        if let Some((id, writer)) = current.take() {
            outputs.push(self.seal(id, level, writer)?);
        }
        Ok(())
    }

    /// Finish an output file and reopen it to validate what hit the disk
    fn seal(&self, id: u64, level: u32, writer: SegmentFileWriter) -> Result<Arc<Segment>> {
        writer.finish()?;
        let segment = Segment::open_file(id, &self.manager.segment_path(id, level))?;
        debug!(segment = id, level, records = segment.record_count(), "wrote compaction output");
        Ok(Arc::new(segment))
    }

    /// Swap the task's inputs for `outputs` in one manifest edit
    pub fn install(&self, task: &CompactionTask, outputs: Vec<Arc<Segment>>) -> Result<()> {
        let staged = outputs.clone();
        self.manager.replace(&task.all_inputs(), outputs).map_err(|e| {
            for output in &staged {
                output.mark_obsolete();
            }
            e
        })
    }
}
