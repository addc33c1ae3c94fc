//! WAL Reader
//!
//! Handles reading entries from one WAL file, lazily and in append order.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{LogosError, Result};

use super::entry::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use super::WalEntry;

/// Reads entries from one WAL file
pub struct WalReader {
    path: PathBuf,
    file: BufReader<File>,
    /// Offset of the next frame
    position: u64,
    file_len: u64,
    /// Only the newest log may end in a torn frame
    tolerate_torn_tail: bool,
    torn_tail: bool,
    done: bool,
}

impl WalReader {
    /// Open a WAL file for reading.
    ///
    /// `tolerate_torn_tail` should be set only for the newest log file:
    /// older logs were synced before rotation, so damage there is corruption.
    pub fn open(path: &Path, tolerate_torn_tail: bool) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file: BufReader::new(file),
            position: 0,
            file_len,
            tolerate_torn_tail,
            torn_tail: false,
            done: false,
        })
    }

    /// Read the next entry from the WAL.
    ///
    /// `Ok(None)` at the end of the file or at a torn tail.
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        if self.done {
            return Ok(None);
        }

        let frame_start = self.position;
        let remaining = self.file_len - frame_start;
        if remaining == 0 {
            self.done = true;
            return Ok(None);
        }
        if remaining < HEADER_SIZE as u64 {
            return self.torn(frame_start, "partial header");
        }

        let mut header_buf = [0u8; HEADER_SIZE];
        self.file.read_exact(&mut header_buf)?;
        let header = FrameHeader::parse(&header_buf);

        let frame_end = frame_start + HEADER_SIZE as u64 + header.len as u64;
        if header.len > MAX_PAYLOAD_SIZE || frame_end > self.file_len {
            if self.tolerate_torn_tail && (frame_end > self.file_len || self.rest_is_zeroed(frame_start)?) {
                return self.torn(frame_start, "partial payload");
            }
            return Err(LogosError::corruption(format!(
                "{}: invalid frame length {} at offset {}",
                self.path.display(),
                header.len,
                frame_start
            )));
        }

        let mut payload = vec![0u8; header.len as usize];
        self.file.read_exact(&mut payload)?;
        self.position = frame_end;

        match WalEntry::decode(&header, &payload) {
            Ok(entry) => Ok(Some(entry)),
            Err(LogosError::Corruption(msg)) => {
                let last_frame = frame_end == self.file_len;
                if self.tolerate_torn_tail && (last_frame || self.rest_is_zeroed(frame_start)?) {
                    return self.torn(frame_start, "checksum mismatch in final frame");
                }
                Err(LogosError::Corruption(format!("{}: {}", self.path.display(), msg)))
            }
            Err(e) => Err(e),
        }
    }

    /// True if the reader stopped at a torn final frame
    pub fn hit_torn_tail(&self) -> bool {
        self.torn_tail
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes of intact frames read so far; at a torn tail, where it starts
    pub fn valid_len(&self) -> u64 {
        self.position
    }

    fn torn(&mut self, offset: u64, reason: &str) -> Result<Option<WalEntry>> {
        if !self.tolerate_torn_tail {
            return Err(LogosError::corruption(format!(
                "{}: {} at offset {} in a sealed log",
                self.path.display(),
                reason,
                offset
            )));
        }
        warn!(
            path = %self.path.display(),
            offset,
            dropped_bytes = self.file_len - offset,
            "dropping torn WAL tail ({})",
            reason
        );
        self.torn_tail = true;
        self.done = true;
        self.position = offset;
        Ok(None)
    }

    /// Preallocated or zero-filled tails look like garbage frames
    fn rest_is_zeroed(&mut self, from: u64) -> Result<bool> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(from))?;
        let mut rest = Vec::new();
        file.read_to_end(&mut rest)?;
        Ok(rest.iter().all(|b| *b == 0))
    }
}

impl Iterator for WalReader {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
