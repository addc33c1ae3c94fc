//! WAL Writer
//!
//! Handles appending entries to a single WAL file.
//!
//! A failed append never leaves a partial frame in front of later ones: the
//! file is cut back to the last whole frame. If that cut or an fsync fails,
//! the writer is poisoned and refuses further appends; the next open replays
//! everything up to the last whole frame.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::config::WalSyncStrategy;
use crate::error::Result;

use super::{sync_dir, WalEntry, WalPosition};

/// Injected I/O failures for unit tests
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub(crate) enum Fault {
    /// Write this many bytes of the next frame, then fail
    ShortWrite(usize),
    /// Fail the next fsync
    Sync,
}

/// Writes entries to one WAL file
pub struct WalWriter {
    path: PathBuf,
    log_id: u64,
    file: File,
    /// Byte offset just past the last appended frame
    offset: u64,
    sync_strategy: WalSyncStrategy,
    /// Frames written since the last fsync
    uncommitted: usize,
    /// Set once the file may hold bytes that are not whole frames, or once
    /// an fsync failed
    poisoned: bool,
    #[cfg(test)]
    fault: Option<Fault>,
}

impl WalWriter {
    /// Open or create a WAL file, appending after any existing content
    pub fn open(path: &Path, log_id: u64, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let existed = path.exists();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let offset = file.metadata()?.len();

        if !existed {
            // Make the new directory entry durable too
            file.sync_all()?;
            if let Some(parent) = path.parent() {
                sync_dir(parent)?;
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            log_id,
            file,
            offset,
            sync_strategy,
            uncommitted: 0,
            poisoned: false,
            #[cfg(test)]
            fault: None,
        })
    }

    /// Append an entry to the WAL.
    ///
    /// With `WalSyncStrategy::EveryWrite` the frame is on stable storage
    /// before this returns. On error the frame is not part of the log.
    pub fn append(&mut self, entry: &WalEntry) -> Result<WalPosition> {
        self.check_poisoned()?;
        let frame = entry.serialize()?;
        let start = self.offset;

        if let Err(e) = self.write_frame(&frame) {
            self.discard_from(start);
            return Err(e.into());
        }
        self.offset += frame.len() as u64;
        self.uncommitted += 1;

        let should_sync = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.uncommitted >= count,
        };
        if should_sync {
            if let Err(e) = self.sync() {
                // Already poisoned; still drop the frame so a reopen does not
                // replay a write the caller saw fail
                self.discard_from(start);
                return Err(e);
            }
        }

        Ok(self.position())
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.check_poisoned()?;
        if self.uncommitted > 0 {
            if let Err(e) = self.sync_file() {
                // After a failed fsync the kernel may have dropped dirty pages;
                // a retry could report success for lost data
                error!(log_id = self.log_id, error = %e, "WAL fsync failed; log poisoned");
                self.poisoned = true;
                return Err(e.into());
            }
            self.uncommitted = 0;
        }
        Ok(())
    }

    /// Position just past the last appended frame
    pub fn position(&self) -> WalPosition {
        WalPosition {
            log_id: self.log_id,
            offset: self.offset,
        }
    }

    pub fn log_id(&self) -> u64 {
        self.log_id
    }

    /// Frames appended but not yet fsynced
    pub fn uncommitted_count(&self) -> usize {
        self.uncommitted
    }

    /// True once the writer refuses further appends
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cut the file back to `offset` after a failed append
    fn discard_from(&mut self, offset: u64) {
        match self.file.set_len(offset) {
            Ok(()) => {
                self.offset = offset;
                warn!(log_id = self.log_id, offset, "dropped failed WAL append");
            }
            Err(e) => {
                error!(
                    log_id = self.log_id,
                    offset,
                    error = %e,
                    "could not drop partial WAL frame; log poisoned"
                );
                self.poisoned = true;
            }
        }
    }

    fn check_poisoned(&self) -> Result<()> {
        if self.poisoned {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!(
                    "WAL {} is unusable after a failed write; reopen the engine",
                    self.path.display()
                ),
            )
            .into());
        }
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        if let Some(Fault::ShortWrite(written)) = self.fault {
            self.fault = None;
            self.file.write_all(&frame[..written.min(frame.len())])?;
            return Err(io::Error::new(io::ErrorKind::Other, "injected short write"));
        }
        self.file.write_all(frame)
    }

    fn sync_file(&mut self) -> io::Result<()> {
        #[cfg(test)]
        if let Some(Fault::Sync) = self.fault {
            self.fault = None;
            return Err(io::Error::new(io::ErrorKind::Other, "injected fsync failure"));
        }
        self.file.sync_data()
    }

    #[cfg(test)]
    pub(crate) fn inject_fault(&mut self, fault: Fault) {
        self.fault = Some(fault);
    }
}
