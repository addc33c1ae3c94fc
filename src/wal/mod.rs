//! Write-Ahead Log (WAL) Module
//!
//! Provides durability guarantees through append-only logging.
//!
//! ## Responsibilities
//! - Append log entries before any memtable mutation
//! - CRC32 checksums for corruption detection
//! - One log file per memtable generation, rotated on freeze
//! - Crash recovery and replay
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Entry 1                                 │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ Seq (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Entry 2                                 │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ Seq (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Logs live in `{data_dir}/wal/{id:06}.log`.

mod entry;
mod reader;
mod recovery;
mod writer;

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::config::WalSyncStrategy;
use crate::error::Result;
use crate::record::Record;

pub use entry::{Operation, WalEntry, HEADER_SIZE};
pub use reader::WalReader;
pub use recovery::{RecoveryStats, WalRecovery, WalReplay};
pub use writer::WalWriter;

#[cfg(test)]
pub(crate) use writer::Fault;

/// A durable point in the log set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct WalPosition {
    pub log_id: u64,
    pub offset: u64,
}

/// The rotating set of WAL files; only the newest one is appended to
pub struct Wal {
    dir: PathBuf,
    writer: WalWriter,
    sync_strategy: WalSyncStrategy,
}

impl Wal {
    /// Create a fresh log file with `log_id` in `dir`
    pub fn create(dir: &Path, log_id: u64, sync_strategy: WalSyncStrategy) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let writer = WalWriter::open(&log_path(dir, log_id), log_id, sync_strategy)?;
        debug!(log_id, "opened WAL");
        Ok(Self {
            dir: dir.to_path_buf(),
            writer,
            sync_strategy,
        })
    }

    /// Append a record; durable on return under `EveryWrite`
    pub fn append(&mut self, record: &Record) -> Result<WalPosition> {
        self.writer.append(&WalEntry::from_record(record))
    }

    /// Seal the current log and start the next one.
    ///
    /// Returns the id of the new log.
    pub fn rotate(&mut self) -> Result<u64> {
        self.writer.sync()?;
        let next_id = self.writer.log_id() + 1;
        self.writer = WalWriter::open(&log_path(&self.dir, next_id), next_id, self.sync_strategy)?;
        trace!(log_id = next_id, "rotated WAL");
        Ok(next_id)
    }

    pub fn sync(&mut self) -> Result<()> {
        self.writer.sync()
    }

    pub fn position(&self) -> WalPosition {
        self.writer.position()
    }

    pub fn current_log_id(&self) -> u64 {
        self.writer.log_id()
    }

    pub fn uncommitted_count(&self) -> usize {
        self.writer.uncommitted_count()
    }

    /// True after a failed write the log could not be repaired from
    pub fn is_poisoned(&self) -> bool {
        self.writer.is_poisoned()
    }

    #[cfg(test)]
    pub(crate) fn inject_fault(&mut self, fault: Fault) {
        self.writer.inject_fault(fault);
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Delete every log older than `position`; see [`truncate_before`]
    pub fn truncate_before(&self, position: WalPosition) -> Result<usize> {
        let limit = position.log_id.min(self.current_log_id());
        truncate_before(&self.dir, WalPosition { log_id: limit, offset: 0 })
    }
}

/// Delete every log file whose id is below `position.log_id`.
///
/// Callers must only pass a position whose preceding logs are already
/// reflected in a durably recorded flush. Returns the number of files removed.
pub fn truncate_before(dir: &Path, position: WalPosition) -> Result<usize> {
    let mut removed = 0;
    for id in list_logs(dir)? {
        if id >= position.log_id {
            break;
        }
        fs::remove_file(log_path(dir, id))?;
        removed += 1;
    }
    if removed > 0 {
        sync_dir(dir)?;
        debug!(removed, before = position.log_id, "truncated WAL");
    }
    Ok(removed)
}

/// Sorted ids of all log files in `dir`
pub fn list_logs(dir: &Path) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    if !dir.exists() {
        return Ok(ids);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if let Some(id) = parse_log_id(&path) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// "000042.log" → Some(42)
fn parse_log_id(path: &Path) -> Option<u64> {
    if path.extension()? != "log" {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

pub fn log_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{:06}.log", id))
}

/// fsync a directory so renames/creates/removes inside it are durable
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}
