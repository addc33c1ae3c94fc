//! Startup recovery
//!
//! 1. Open the segment manager (manifest, live segments, orphan cleanup)
//! 2. Replay WAL files at or after the manifest's flush point
//! 3. Resume sequence numbers above everything seen
//! 4. Open a fresh WAL file for new writes

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Options;
use crate::error::Result;
use crate::memtable::MemTable;
use crate::storage::SegmentManager;
use crate::wal::{self, RecoveryStats, Wal, WalRecovery};

use super::{MemTables, WAL_DIR};

pub(super) struct Recovered {
    pub manager: SegmentManager,
    pub memtables: MemTables,
    pub wal: Wal,
    pub next_seq: u64,
    pub stats: RecoveryStats,
}

pub(super) fn recover(dir: &Path, options: &Options) -> Result<Recovered> {
    std::fs::create_dir_all(dir)?;
    let manager = SegmentManager::open(dir, options)?;
    let wal_dir = dir.join(WAL_DIR);
    std::fs::create_dir_all(&wal_dir)?;

    let memtable = MemTable::new(options.memtable_size_threshold);
    let mut replay = WalRecovery::replay(&wal_dir, manager.log_number())?;
    for record in replay.by_ref() {
        memtable.put(record?);
    }
    let stats = replay.stats().clone();
    if stats.torn_tail {
        warn!("dropped a torn write at the end of the WAL");
        replay.truncate_torn_tail()?;
    }

    let next_seq = manager.last_sequence().max(stats.last_seq) + 1;
    let newest_log = wal::list_logs(&wal_dir)?.last().copied().unwrap_or(0);
    let log_id = newest_log.max(manager.log_number()) + 1;
    let wal = Wal::create(&wal_dir, log_id, options.wal_sync_strategy)?;

    let mut memtables = MemTables {
        active: Arc::new(memtable),
        frozen: Vec::new(),
    };
    if memtables.active.should_flush() {
        let frozen = memtables.active.freeze(log_id);
        memtables.frozen.push(Arc::new(frozen));
        memtables.active = Arc::new(MemTable::new(options.memtable_size_threshold));
    }

    if stats.logs_replayed > 0 {
        info!(
            entries = stats.entries_recovered,
            logs = stats.logs_replayed,
            last_seq = stats.last_seq,
            "replayed WAL"
        );
    }
    Ok(Recovered {
        manager,
        memtables,
        wal,
        next_seq,
        stats,
    })
}
