//! WAL Recovery
//!
//! Replays every WAL file at or after the manifest's flush point, in order.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{LogosError, Result};
use crate::record::Record;

use super::{list_logs, log_path, WalReader};

/// Statistics gathered while replaying
#[derive(Debug, Default, Clone)]
pub struct RecoveryStats {
    /// Number of entries successfully replayed
    pub entries_recovered: u64,

    /// Highest sequence number seen
    pub last_seq: u64,

    /// Log files visited
    pub logs_replayed: usize,

    /// Whether a torn final frame was dropped
    pub torn_tail: bool,
}

/// Lazy replay over a set of WAL files
pub struct WalReplay {
    dir: PathBuf,
    pending: VecDeque<u64>,
    newest: Option<u64>,
    current: Option<WalReader>,
    stats: RecoveryStats,
    /// Newest log and the length of its intact prefix, if it was torn
    torn_at: Option<(PathBuf, u64)>,
    failed: bool,
}

/// Handles WAL recovery after crash
pub struct WalRecovery;

impl WalRecovery {
    /// Replay all logs with id `>= from_log_id`.
    ///
    /// Yields records in append order. Any damage other than a torn tail on
    /// the newest log is returned as `Corruption`.
    pub fn replay(dir: &Path, from_log_id: u64) -> Result<WalReplay> {
        let logs: VecDeque<u64> = list_logs(dir)?
            .into_iter()
            .filter(|id| *id >= from_log_id)
            .collect();
        let newest = logs.back().copied();
        Ok(WalReplay {
            dir: dir.to_path_buf(),
            pending: logs,
            newest,
            current: None,
            stats: RecoveryStats::default(),
            torn_at: None,
            failed: false,
        })
    }

    /// Verify integrity of the logs without keeping the records
    pub fn verify(dir: &Path, from_log_id: u64) -> Result<RecoveryStats> {
        let mut replay = Self::replay(dir, from_log_id)?;
        for record in replay.by_ref() {
            record?;
        }
        Ok(replay.stats().clone())
    }
}

impl WalReplay {
    pub fn stats(&self) -> &RecoveryStats {
        &self.stats
    }

    /// Cut a dropped torn tail off its log file.
    ///
    /// Once newer logs exist the file is no longer the newest, and a torn
    /// frame there would read as corruption on the next replay. Call after
    /// the replay is exhausted; returns true if a file was truncated.
    pub fn truncate_torn_tail(&self) -> Result<bool> {
        let (path, len) = match &self.torn_at {
            Some(torn) => torn,
            None => return Ok(false),
        };
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(*len)?;
        file.sync_all()?;
        info!(path = %path.display(), len, "truncated torn WAL tail");
        Ok(true)
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        loop {
            if self.current.is_none() {
                let id = match self.pending.pop_front() {
                    Some(id) => id,
                    None => return Ok(None),
                };
                let is_newest = Some(id) == self.newest;
                self.current = Some(WalReader::open(&log_path(&self.dir, id), is_newest)?);
                self.stats.logs_replayed += 1;
            }

            let reader = match self.current.as_mut() {
                Some(reader) => reader,
                None => continue,
            };
            match reader.next_entry()? {
                Some(entry) => {
                    if self.stats.entries_recovered > 0 && entry.seq <= self.stats.last_seq {
                        return Err(LogosError::corruption(format!(
                            "{}: sequence {} is not above previous {}",
                            reader.path().display(),
                            entry.seq,
                            self.stats.last_seq
                        )));
                    }
                    self.stats.entries_recovered += 1;
                    self.stats.last_seq = entry.seq;
                    return Ok(Some(entry.into_record()));
                }
                None => {
                    if reader.hit_torn_tail() {
                        self.stats.torn_tail = true;
                        self.torn_at = Some((reader.path().to_path_buf(), reader.valid_len()));
                    }
                    self.current = None;
                }
            }
        }
    }
}

impl Iterator for WalReplay {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
