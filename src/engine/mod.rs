//! Engine Module
//!
//! The storage engine that coordinates WAL, memtables, segments and
//! compaction.
//!
//! ## Responsibilities
//! - Serialize writes: WAL append, then memtable insert
//! - Freeze full memtables and hand them to the flush path
//! - Answer reads from memtables and the current level view
//! - Recover from the manifest and WAL on startup

mod background;
mod flush;
mod read;
mod recovery;

use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::compaction::Compactor;
use crate::config::Options;
use crate::error::{LogosError, Result};
use crate::memtable::{FrozenMemTable, MemTable};
use crate::record::{is_empty_range, KeyRange, Record, Value, MAX_KEY_SIZE, MAX_VALUE_SIZE};
use crate::storage::SegmentManager;
use crate::wal::Wal;

use background::{BackgroundTask, BackgroundWorker};

pub use read::ScanIter;

pub const WAL_DIR: &str = "wal";

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (put/delete): serialized by the `writer` mutex, which owns
///   the WAL and the sequence counter
/// - **Reads** (get/scan): never take the writer lock; they clone the
///   memtable set, then the level view, and work on those snapshots
/// - **Flush/compaction**: on a background thread, or inline when
///   `background_work` is off
pub struct Engine {
    inner: Arc<EngineInner>,
    worker: Option<BackgroundWorker>,
}

/// State shared between the engine handle and the background worker
pub(crate) struct EngineInner {
    dir: PathBuf,
    options: Options,
    writer: Mutex<WriteState>,
    memtables: RwLock<MemTables>,
    manager: Arc<SegmentManager>,
    compactor: Compactor,
    /// Flushes retire frozen memtables strictly oldest first
    flush_lock: Mutex<()>,
}

pub(crate) struct WriteState {
    wal: Wal,
    next_seq: u64,
}

/// The active memtable plus frozen ones awaiting flush (oldest first)
#[derive(Clone)]
pub(crate) struct MemTables {
    active: Arc<MemTable>,
    frozen: Vec<Arc<FrozenMemTable>>,
}

/// Point-in-time counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub active_memtable_bytes: usize,
    pub active_memtable_entries: usize,
    pub frozen_memtables: usize,
    pub segments_per_level: Vec<usize>,
    pub bytes_per_level: Vec<u64>,
    /// Sequence number the next write will get
    pub next_sequence: u64,
    pub wal_log_id: u64,
    pub wal_uncommitted: usize,
    /// WAL files below this id have been flushed
    pub flushed_log_number: u64,
}

impl Engine {
    /// Open or create an engine in `dir`
    ///
    /// On startup:
    /// 1. Load the manifest and open every live segment
    /// 2. Delete orphaned segment files
    /// 3. Replay WAL files written after the last flush
    /// 4. Start a fresh WAL file and the background worker
    pub fn open(dir: impl AsRef<Path>, options: Options) -> Result<Self> {
        options.validate()?;
        let dir = dir.as_ref().to_path_buf();
        let recovered = recovery::recover(&dir, &options)?;

        let manager = Arc::new(recovered.manager);
        let inner = Arc::new(EngineInner {
            compactor: Compactor::new(Arc::clone(&manager)),
            manager,
            writer: Mutex::new(WriteState {
                wal: recovered.wal,
                next_seq: recovered.next_seq,
            }),
            memtables: RwLock::new(recovered.memtables),
            flush_lock: Mutex::new(()),
            options,
            dir,
        });

        // A replayed memtable that was already over the threshold
        inner.flush_pending()?;

        let worker = if inner.options.background_work {
            let worker = BackgroundWorker::spawn(Arc::clone(&inner))?;
            worker.schedule(BackgroundTask::Compact)?;
            Some(worker)
        } else {
            inner.maybe_compact();
            None
        };

        info!(
            dir = %inner.dir.display(),
            next_seq = recovered.next_seq,
            replayed = recovered.stats.entries_recovered,
            segments = inner.manager.segment_count(),
            "engine opened"
        );
        Ok(Self { inner, worker })
    }

    /// Insert or overwrite `key`
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        validate_key(key)?;
        if value.len() > MAX_VALUE_SIZE {
            return Err(LogosError::InvalidInput(format!(
                "value of {} bytes exceeds the {} byte limit",
                value.len(),
                MAX_VALUE_SIZE
            )));
        }
        let froze = self.inner.write(
            Bytes::copy_from_slice(key),
            Value::Put(Bytes::copy_from_slice(value)),
        )?;
        if froze {
            self.after_freeze();
        }
        Ok(())
    }

    /// Delete `key` by writing a tombstone
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        validate_key(key)?;
        let froze = self.inner.write(Bytes::copy_from_slice(key), Value::Tombstone)?;
        if froze {
            self.after_freeze();
        }
        Ok(())
    }

    /// Get the current value of `key`
    ///
    /// Search order:
    /// 1. Active memtable
    /// 2. Frozen memtables, newest first
    /// 3. Level 0, newest first, then levels 1, 2, ...
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.inner.lookup(key)?.and_then(|record| match record.value {
            Value::Put(value) => Some(value),
            Value::Tombstone => None,
        }))
    }

    /// Live pairs with `lower <= key <= upper`, ascending
    pub fn scan(&self, lower: &[u8], upper: &[u8]) -> Result<ScanIter> {
        self.range(Bound::Included(lower), Bound::Included(upper))
    }

    /// Live pairs within arbitrary bounds, ascending
    pub fn range(&self, lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> Result<ScanIter> {
        if is_empty_range(lower, upper) {
            return Ok(ScanIter::empty());
        }
        Ok(self
            .inner
            .range_iter(KeyRange::new(owned_bound(lower), owned_bound(upper))))
    }

    /// Freeze the active memtable and write every pending memtable to level 0
    pub fn flush(&self) -> Result<()> {
        {
            let mut state = self.inner.writer.lock();
            self.inner.freeze_active(&mut state)?;
        }
        self.inner.flush_pending()?;
        match &self.worker {
            Some(worker) => worker.schedule(BackgroundTask::Compact),
            None => {
                self.inner.maybe_compact();
                Ok(())
            }
        }
    }

    /// Run compactions until the policy finds nothing left to do.
    ///
    /// Returns the number of compactions performed.
    pub fn compact(&self) -> Result<usize> {
        self.inner.compactor.compact_all()
    }

    /// Flush everything and stop the background worker
    pub fn close(mut self) -> Result<()> {
        let flushed = self.flush();
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
        flushed?;
        self.inner.writer.lock().wal.sync()?;
        info!(dir = %self.inner.dir.display(), "engine closed");
        Ok(())
    }

    pub fn stats(&self) -> EngineStats {
        let (next_sequence, wal_log_id, wal_uncommitted) = {
            let state = self.inner.writer.lock();
            (
                state.next_seq,
                state.wal.current_log_id(),
                state.wal.uncommitted_count(),
            )
        };
        let tables = self.inner.memtables.read().clone();
        let view = self.inner.manager.current_view();
        EngineStats {
            active_memtable_bytes: tables.active.size(),
            active_memtable_entries: tables.active.entry_count(),
            frozen_memtables: tables.frozen.len(),
            segments_per_level: (0..view.num_levels()).map(|l| view.level(l).len()).collect(),
            bytes_per_level: (0..view.num_levels()).map(|l| view.level_bytes(l)).collect(),
            next_sequence,
            wal_log_id,
            wal_uncommitted,
            flushed_log_number: self.inner.manager.log_number(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    /// The segment set backing this engine
    pub fn segment_manager(&self) -> &Arc<SegmentManager> {
        &self.inner.manager
    }

    /// Hand a freshly frozen memtable to the flush path, stalling the writer
    /// when too many are already waiting.
    ///
    /// The triggering write is already committed, so failures here are
    /// logged and the frozen table stays queued for the next flush.
    fn after_freeze(&self) {
        let stalled = self.inner.frozen_count() > self.inner.options.max_frozen_memtables;
        let result = match &self.worker {
            Some(worker) if !stalled => worker.schedule(BackgroundTask::Flush),
            Some(worker) => {
                warn!(
                    frozen = self.inner.frozen_count(),
                    "write stall: flushing inline"
                );
                self.inner
                    .flush_pending()
                    .and_then(|_| worker.schedule(BackgroundTask::Compact))
            }
            None => self.inner.flush_pending().map(|_| self.inner.maybe_compact()),
        };
        if let Err(e) = result {
            warn!(
                error = %e,
                frozen = self.inner.frozen_count(),
                "flush after write failed; will retry"
            );
        }
    }
}

impl EngineInner {
    /// Append to the WAL, then apply to the active memtable.
    ///
    /// Returns true if the memtable filled up and was frozen.
    fn write(&self, key: Bytes, value: Value) -> Result<bool> {
        let mut state = self.writer.lock();
        let record = Record {
            key,
            value,
            seq: state.next_seq,
        };
        // Burned even when the append fails
        state.next_seq += 1;
        state.wal.append(&record)?;

        let active = Arc::clone(&self.memtables.read().active);
        active.put(record);
        if active.should_flush() {
            // Committed either way; a failed freeze is retried on a later write
            if let Err(e) = self.freeze_active(&mut state) {
                warn!(error = %e, "memtable freeze failed");
                return Ok(false);
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Newest record for `key`, tombstones included
    fn lookup(&self, key: &[u8]) -> Result<Option<Record>> {
        // Memtables before the view: a flush publishes its segment before
        // retiring the frozen table, so nothing falls between the two.
        let tables = self.memtables.read().clone();
        if let Some(record) = tables.active.get(key) {
            return Ok(Some(record));
        }
        for frozen in tables.frozen.iter().rev() {
            if let Some(record) = frozen.get(key) {
                return Ok(Some(record));
            }
        }
        self.manager.current_view().get(key)
    }

    fn frozen_count(&self) -> usize {
        self.memtables.read().frozen.len()
    }

    fn wal_dir(&self) -> PathBuf {
        self.dir.join(WAL_DIR)
    }

    /// Run compactions, logging failures; the next cycle retries from the
    /// pre-compaction state.
    fn maybe_compact(&self) {
        if let Err(e) = self.compactor.compact_all() {
            warn!(error = %e, "compaction failed; will retry");
        }
    }
}

fn validate_key(key: &[u8]) -> Result<()> {
    if key.len() > MAX_KEY_SIZE {
        return Err(LogosError::InvalidInput(format!(
            "key of {} bytes exceeds the {} byte limit",
            key.len(),
            MAX_KEY_SIZE
        )));
    }
    Ok(())
}

fn owned_bound(bound: Bound<&[u8]>) -> Bound<Bytes> {
    match bound {
        Bound::Included(key) => Bound::Included(Bytes::copy_from_slice(key)),
        Bound::Excluded(key) => Bound::Excluded(Bytes::copy_from_slice(key)),
        Bound::Unbounded => Bound::Unbounded,
    }
}
