//! Memtable freeze and flush
//!
//! Flush order per frozen memtable:
//! 1. Write a level-0 segment (`*.tmp`, fsync, rename)
//! 2. Register it with a manifest edit that advances the WAL flush point
//! 3. Retire the frozen memtable
//! 4. Delete WAL files the flush point no longer needs

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::error::Result;
use crate::memtable::{FrozenMemTable, MemTable};
use crate::storage::{Segment, SegmentFileWriter};
use crate::wal::{self, WalPosition};

use super::{EngineInner, WriteState};

impl EngineInner {
    /// Swap in an empty memtable and queue the old one for flushing.
    ///
    /// The WAL rotates first so the frozen table's records all live in logs
    /// below the new log id. Caller holds the writer lock.
    pub(super) fn freeze_active(&self, state: &mut WriteState) -> Result<()> {
        if self.memtables.read().active.is_empty() {
            return Ok(());
        }
        let next_log_id = state.wal.rotate()?;

        let mut tables = self.memtables.write();
        let frozen = tables.active.freeze(next_log_id);
        debug!(
            entries = frozen.entry_count(),
            bytes = frozen.size(),
            next_log_id,
            "froze memtable"
        );
        tables.frozen.push(Arc::new(frozen));
        tables.active = Arc::new(MemTable::new(self.options.memtable_size_threshold));
        Ok(())
    }

    /// Flush every frozen memtable, oldest first.
    ///
    /// Returns the number of memtables flushed.
    pub(super) fn flush_pending(&self) -> Result<usize> {
        let _guard = self.flush_lock.lock();
        let mut flushed = 0;
        loop {
            let oldest = self.memtables.read().frozen.first().cloned();
            match oldest {
                Some(frozen) => {
                    self.flush_frozen(&frozen)?;
                    flushed += 1;
                }
                None => return Ok(flushed),
            }
        }
    }

    fn flush_frozen(&self, frozen: &Arc<FrozenMemTable>) -> Result<()> {
        let started = Instant::now();
        let mut segment_id = None;

        if !frozen.is_empty() {
            let id = self.manager.allocate_segment_id();
            let path = self.manager.segment_path(id, 0);
            let mut writer = SegmentFileWriter::create(
                &path,
                0,
                self.options.block_size,
                self.options.filter_bits_per_key,
            )?;
            for record in frozen.iter() {
                if let Err(e) = writer.add(record) {
                    writer.abandon();
                    return Err(e);
                }
            }
            writer.finish()?;

            let segment = Arc::new(Segment::open_file(id, &path)?);
            self.manager
                .register_flush(segment, frozen.next_log_id(), frozen.max_sequence())?;
            segment_id = Some(id);
        }

        // The segment is visible now; readers may stop consulting the table
        self.memtables
            .write()
            .frozen
            .retain(|f| !Arc::ptr_eq(f, frozen));

        let removed = wal::truncate_before(
            &self.wal_dir(),
            WalPosition {
                log_id: frozen.next_log_id(),
                offset: 0,
            },
        )?;

        info!(
            segment = ?segment_id,
            entries = frozen.entry_count(),
            bytes = frozen.size(),
            wal_files_removed = removed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "flushed memtable"
        );
        Ok(())
    }
}
