//! Manifest
//!
//! Append-only log of [`VersionEdit`]s describing which segments are live,
//! plus the WAL flush point and sequence high-water mark.
//!
//! Frame: `len u32 | crc32(payload) u32 | bincode(VersionEdit)`.
//!
//! On every open the replayed state is written out as a single snapshot edit
//! (`MANIFEST.tmp`, fsync, rename) so the file never grows without bound.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{LogosError, Result};
use crate::wal::sync_dir;

use super::segment::SegmentMeta;

pub const MANIFEST_FILE: &str = "MANIFEST";

const FRAME_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddSegment {
    pub id: u64,
    pub meta: SegmentMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSegment {
    pub id: u64,
    pub level: u32,
}

/// One atomic change to the live segment set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEdit {
    pub adds: Vec<AddSegment>,
    pub deletes: Vec<DeleteSegment>,
    /// WAL files below this id are fully reflected in segments
    pub log_number: Option<u64>,
    pub last_sequence: Option<u64>,
    pub next_segment_id: Option<u64>,
}

impl VersionEdit {
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty()
            && self.deletes.is_empty()
            && self.log_number.is_none()
            && self.last_sequence.is_none()
            && self.next_segment_id.is_none()
    }
}

/// State reconstructed by replaying every edit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestState {
    pub segments: BTreeMap<u64, SegmentMeta>,
    pub log_number: u64,
    pub last_sequence: u64,
    pub next_segment_id: u64,
}

impl ManifestState {
    pub fn apply(&mut self, edit: VersionEdit) {
        for del in edit.deletes {
            self.segments.remove(&del.id);
        }
        for add in edit.adds {
            self.next_segment_id = self.next_segment_id.max(add.id + 1);
            self.segments.insert(add.id, add.meta);
        }
        if let Some(log_number) = edit.log_number {
            self.log_number = self.log_number.max(log_number);
        }
        if let Some(seq) = edit.last_sequence {
            self.last_sequence = self.last_sequence.max(seq);
        }
        if let Some(next) = edit.next_segment_id {
            self.next_segment_id = self.next_segment_id.max(next);
        }
    }

    /// A single edit that recreates this state from scratch
    fn snapshot_edit(&self) -> VersionEdit {
        VersionEdit {
            adds: self
                .segments
                .iter()
                .map(|(id, meta)| AddSegment {
                    id: *id,
                    meta: meta.clone(),
                })
                .collect(),
            deletes: Vec::new(),
            log_number: Some(self.log_number),
            last_sequence: Some(self.last_sequence),
            next_segment_id: Some(self.next_segment_id),
        }
    }
}

#[derive(Debug)]
pub struct Manifest {
    path: PathBuf,
    file: File,
    /// Length covering only whole, synced edits
    len: u64,
    /// Set when a failed append could not be undone or an fsync failed
    poisoned: bool,
    #[cfg(test)]
    fail_next: Option<ManifestFault>,
}

/// Injected I/O failures for unit tests
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
enum ManifestFault {
    ShortWrite(usize),
    Sync,
}

impl Manifest {
    /// Replay `{dir}/MANIFEST` (if any), compact it to one snapshot edit and
    /// reopen it for appending.
    pub fn open(dir: &Path) -> Result<(Self, ManifestState)> {
        fs::create_dir_all(dir)?;
        let path = dir.join(MANIFEST_FILE);

        let mut state = ManifestState {
            next_segment_id: 1,
            ..ManifestState::default()
        };
        if path.exists() {
            let mut data = Vec::new();
            File::open(&path)?.read_to_end(&mut data)?;
            let edits = replay_manifest(&data)?;
            debug!(edits = edits.len(), "replayed manifest");
            for edit in edits {
                state.apply(edit);
            }
        }

        let manifest = Self::rewrite(&path, &state)?;
        Ok((manifest, state))
    }

    /// Atomically replace the manifest with a snapshot of `state`
    fn rewrite(path: &Path, state: &ManifestState) -> Result<Self> {
        let tmp_path = path.with_extension("tmp");
        {
            let mut tmp = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            tmp.write_all(&encode_frame(&state.snapshot_edit())?)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        if let Some(dir) = path.parent() {
            sync_dir(dir)?;
        }

        let file = OpenOptions::new().append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            len,
            poisoned: false,
            #[cfg(test)]
            fail_next: None,
        })
    }

    /// Durably append one edit.
    ///
    /// On error the edit is not part of the manifest. If the file cannot be
    /// cut back, or the fsync failed, every later append fails too.
    pub fn append(&mut self, edit: &VersionEdit) -> Result<()> {
        if self.poisoned {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "manifest is unusable after a failed write; reopen the engine",
            )
            .into());
        }
        let frame = encode_frame(edit)?;

        if let Err(e) = self.write_frame(&frame) {
            self.discard_tail();
            return Err(e.into());
        }
        if let Err(e) = self.sync_file() {
            self.poisoned = true;
            self.discard_tail();
            error!(error = %e, "manifest fsync failed; manifest poisoned");
            return Err(e.into());
        }
        self.len += frame.len() as u64;
        Ok(())
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop whatever a failed append left after the last whole edit
    fn discard_tail(&mut self) {
        if let Err(e) = self.file.set_len(self.len) {
            error!(len = self.len, error = %e, "could not drop partial manifest edit");
            self.poisoned = true;
        }
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        if let Some(ManifestFault::ShortWrite(written)) = self.fail_next {
            self.fail_next = None;
            self.file.write_all(&frame[..written.min(frame.len())])?;
            return Err(io::Error::new(io::ErrorKind::Other, "injected short write"));
        }
        self.file.write_all(frame)
    }

    fn sync_file(&mut self) -> io::Result<()> {
        #[cfg(test)]
        if let Some(ManifestFault::Sync) = self.fail_next {
            self.fail_next = None;
            return Err(io::Error::new(io::ErrorKind::Other, "injected fsync failure"));
        }
        self.file.sync_data()
    }
}

fn encode_frame(edit: &VersionEdit) -> Result<Vec<u8>> {
    let payload = bincode::serialize(edit)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| LogosError::Encoding("manifest edit too large".to_string()))?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode every edit; a damaged final frame is a torn write and is dropped
fn replay_manifest(data: &[u8]) -> Result<Vec<VersionEdit>> {
    let mut edits = Vec::new();
    let mut offset = 0usize;
    while offset < data.len() {
        if data.len() - offset < FRAME_HEADER_SIZE {
            warn!(offset, "dropping torn manifest frame header");
            break;
        }
        let len = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;
        let crc = u32::from_le_bytes([
            data[offset + 4],
            data[offset + 5],
            data[offset + 6],
            data[offset + 7],
        ]);
        let start = offset + FRAME_HEADER_SIZE;
        let end = match start.checked_add(len) {
            Some(end) if end <= data.len() => end,
            _ => {
                warn!(offset, "dropping torn manifest frame");
                break;
            }
        };
        let payload = &data[start..end];
        if crc32fast::hash(payload) != crc {
            if end == data.len() {
                warn!(offset, "dropping manifest frame with bad checksum at tail");
                break;
            }
            return Err(LogosError::corruption(format!(
                "manifest checksum mismatch at offset {}",
                offset
            )));
        }
        edits.push(bincode::deserialize(payload)?);
        offset = end;
    }
    Ok(edits)
}
