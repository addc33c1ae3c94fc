//! Segment Reader
//!
//! Opens segments and answers point lookups with one index probe plus one
//! block decode.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Buf, Bytes};
use tracing::{debug, warn};

use crate::error::{LogosError, Result};
use crate::record::{KeyRange, Record};

use super::block::decode_block;
use super::filter::BloomFilter;
use super::iterator::SegmentIter;
use super::{IndexEntry, SegmentMeta, FOOTER_SIZE, HEADER_SIZE, MAGIC, VERSION};

/// Where block bytes come from
enum BlockSource {
    /// Whole segment image already in memory
    Memory(Bytes),
    /// Blocks are read from the file on demand with positional reads, so
    /// concurrent readers never share a cursor
    File(File),
}

/// An open, immutable segment
///
/// Shared as `Arc<Segment>`. Once marked obsolete, the backing file is
/// removed when the last reference drops.
pub struct Segment {
    id: u64,
    meta: SegmentMeta,
    index: Vec<IndexEntry>,
    filter: BloomFilter,
    source: BlockSource,
    path: Option<PathBuf>,
    file_size: u64,
    obsolete: AtomicBool,
}

impl Segment {
    /// Open an in-memory segment image, validating header and checksums
    pub fn open(id: u64, data: Bytes) -> Result<Self> {
        let file_size = data.len() as u64;
        check_header(&data)?;
        let footer = read_footer(&data, file_size)?;
        let aux = data.slice(footer.filter_offset as usize..(file_size - FOOTER_SIZE) as usize);
        Self::assemble(id, footer, aux, BlockSource::Memory(data), None, file_size)
    }

    /// Open a segment file, loading only footer, filter, index and metadata
    pub fn open_file(id: u64, path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(LogosError::corruption(format!(
                "{}: segment file too short ({} bytes)",
                path.display(),
                file_size
            )));
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;
        check_header(&header).map_err(|e| annotate(e, path))?;

        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer_buf = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer_buf)?;
        let footer = parse_footer(&footer_buf, file_size).map_err(|e| annotate(e, path))?;

        file.seek(SeekFrom::Start(footer.filter_offset))?;
        let mut aux = vec![0u8; (file_size - FOOTER_SIZE - footer.filter_offset) as usize];
        file.read_exact(&mut aux)?;

        Self::assemble(
            id,
            footer,
            Bytes::from(aux),
            BlockSource::File(file),
            Some(path.to_path_buf()),
            file_size,
        )
        .map_err(|e| annotate(e, path))
    }

    fn assemble(
        id: u64,
        footer: Footer,
        aux: Bytes,
        source: BlockSource,
        path: Option<PathBuf>,
        file_size: u64,
    ) -> Result<Self> {
        let sections_len = footer.filter_len as usize + footer.index_len as usize + footer.meta_len as usize;
        if aux.len() != sections_len {
            return Err(LogosError::corruption(format!(
                "section lengths ({}) do not match footer layout ({})",
                sections_len,
                aux.len()
            )));
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&aux);
        hasher.update(&footer.raw_prefix);
        let computed = hasher.finalize();
        if computed != footer.crc {
            return Err(LogosError::corruption(format!(
                "segment {} checksum mismatch: stored {:#010x}, computed {:#010x}",
                id, footer.crc, computed
            )));
        }

        let filter_end = footer.filter_len as usize;
        let index_end = filter_end + footer.index_len as usize;
        let filter = BloomFilter::decode(aux.slice(..filter_end))?;
        let index = decode_index(aux.slice(filter_end..index_end), footer.filter_offset)?;
        let meta: SegmentMeta = bincode::deserialize(&aux[index_end..])?;

        if meta.block_count as usize != index.len() {
            return Err(LogosError::corruption(format!(
                "metadata lists {} blocks, index has {}",
                meta.block_count,
                index.len()
            )));
        }

        Ok(Self {
            id,
            meta,
            index,
            filter,
            source,
            path,
            file_size,
            obsolete: AtomicBool::new(false),
        })
    }

    /// Point lookup: filter, then sparse index, then a single block.
    ///
    /// Returns the stored record (possibly a tombstone) or `None`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Record>> {
        if !self.filter.may_contain(key) {
            return Ok(None);
        }
        if !self.might_contain(key) {
            return Ok(None);
        }
        let block = match self.block_for(key) {
            Some(block) => block,
            None => return Ok(None),
        };
        let records = self.read_block(block)?;
        Ok(records
            .binary_search_by(|r| r.key[..].cmp(key))
            .ok()
            .map(|i| records[i].clone()))
    }

    /// Lazily iterate the records inside `range`
    pub fn range_iter(self: &Arc<Self>, range: KeyRange) -> SegmentIter {
        SegmentIter::new(Arc::clone(self), range)
    }

    /// Iterate every record in the segment
    pub fn iter(self: &Arc<Self>) -> SegmentIter {
        self.range_iter(KeyRange::all())
    }

    /// Quick check against `[min_key, max_key]`
    pub fn might_contain(&self, key: &[u8]) -> bool {
        self.meta.record_count > 0 && key >= &self.meta.min_key[..] && key <= &self.meta.max_key[..]
    }

    pub fn overlaps(&self, range: &KeyRange) -> bool {
        self.meta.record_count > 0 && range.overlaps(&self.meta.min_key, &self.meta.max_key)
    }

    /// Index of the only block that can hold `key`
    pub(crate) fn block_for(&self, key: &[u8]) -> Option<usize> {
        let after = self.index.partition_point(|e| &e.first_key[..] <= key);
        after.checked_sub(1)
    }

    pub(crate) fn block_count(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn block_first_key(&self, block: usize) -> &[u8] {
        &self.index[block].first_key
    }

    /// Read, verify and decode one block
    pub(crate) fn read_block(&self, block: usize) -> Result<Vec<Record>> {
        let entry = &self.index[block];
        let raw = match &self.source {
            BlockSource::Memory(data) => {
                let start = entry.offset as usize;
                data.slice(start..start + entry.len as usize)
            }
            BlockSource::File(file) => {
                let mut buf = vec![0u8; entry.len as usize];
                read_exact_at(file, &mut buf, entry.offset)?;
                Bytes::from(buf)
            }
        };
        decode_block(raw).map_err(|e| match e {
            LogosError::Corruption(msg) => LogosError::Corruption(format!(
                "segment {} block {} at offset {}: {}",
                self.id, block, entry.offset, msg
            )),
            other => other,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn meta(&self) -> &SegmentMeta {
        &self.meta
    }

    pub fn level(&self) -> u32 {
        self.meta.level
    }

    pub fn min_key(&self) -> &Bytes {
        &self.meta.min_key
    }

    pub fn max_key(&self) -> &Bytes {
        &self.meta.max_key
    }

    pub fn record_count(&self) -> u64 {
        self.meta.record_count
    }

    /// Total encoded size in bytes
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn filter(&self) -> &BloomFilter {
        &self.filter
    }

    /// Schedule the backing file for deletion once unreferenced
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::SeqCst);
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("level", &self.meta.level)
            .field("records", &self.meta.record_count)
            .field("min_key", &self.meta.min_key)
            .field("max_key", &self.meta.max_key)
            .field("file_size", &self.file_size)
            .finish()
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if !self.is_obsolete() {
            return;
        }
        if let Some(path) = &self.path {
            match fs::remove_file(path) {
                Ok(()) => debug!(segment = self.id, path = %path.display(), "deleted obsolete segment"),
                Err(e) => warn!(segment = self.id, error = %e, "failed to delete obsolete segment"),
            }
        }
    }
}

struct Footer {
    filter_offset: u64,
    filter_len: u32,
    index_len: u32,
    meta_len: u32,
    crc: u32,
    /// Footer bytes covered by the checksum
    raw_prefix: [u8; 20],
}

fn check_header(data: &[u8]) -> Result<()> {
    if data.len() < HEADER_SIZE as usize || &data[0..4] != MAGIC {
        return Err(LogosError::corruption("invalid segment magic"));
    }
    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != VERSION {
        return Err(LogosError::corruption(format!(
            "unsupported segment version: {}",
            version
        )));
    }
    Ok(())
}

fn read_footer(data: &Bytes, file_size: u64) -> Result<Footer> {
    if file_size < HEADER_SIZE + FOOTER_SIZE {
        return Err(LogosError::corruption(format!(
            "segment too short ({} bytes)",
            file_size
        )));
    }
    let start = (file_size - FOOTER_SIZE) as usize;
    let mut buf = [0u8; FOOTER_SIZE as usize];
    buf.copy_from_slice(&data[start..]);
    parse_footer(&buf, file_size)
}

/// Footer: `filter_offset u64 | filter_len u32 | index_len u32 | meta_len u32 | crc u32 | magic`
fn parse_footer(buf: &[u8; FOOTER_SIZE as usize], file_size: u64) -> Result<Footer> {
    if &buf[24..28] != MAGIC {
        return Err(LogosError::corruption("invalid segment footer magic"));
    }
    let mut raw_prefix = [0u8; 20];
    raw_prefix.copy_from_slice(&buf[..20]);

    let mut cursor = &buf[..];
    let footer = Footer {
        filter_offset: cursor.get_u64_le(),
        filter_len: cursor.get_u32_le(),
        index_len: cursor.get_u32_le(),
        meta_len: cursor.get_u32_le(),
        crc: cursor.get_u32_le(),
        raw_prefix,
    };

    let sections_end = footer.filter_offset
        + footer.filter_len as u64
        + footer.index_len as u64
        + footer.meta_len as u64;
    if footer.filter_offset < HEADER_SIZE || sections_end != file_size - FOOTER_SIZE {
        return Err(LogosError::corruption(format!(
            "footer layout inconsistent with file size {}",
            file_size
        )));
    }
    Ok(footer)
}

fn decode_index(mut data: Bytes, data_end: u64) -> Result<Vec<IndexEntry>> {
    if data.remaining() < 4 {
        return Err(LogosError::corruption("index section too short"));
    }
    let count = data.get_u32_le() as usize;
    let mut index = Vec::with_capacity(count);
    for _ in 0..count {
        if data.remaining() < 4 {
            return Err(LogosError::corruption("truncated index entry"));
        }
        let key_len = data.get_u32_le() as usize;
        if data.remaining() < key_len + 12 {
            return Err(LogosError::corruption("truncated index entry"));
        }
        let first_key = data.split_to(key_len);
        let offset = data.get_u64_le();
        let len = data.get_u32_le();
        if offset < HEADER_SIZE || offset + len as u64 > data_end {
            return Err(LogosError::corruption(format!(
                "index points outside data region: offset {} len {}",
                offset, len
            )));
        }
        index.push(IndexEntry {
            first_key,
            offset,
            len,
        });
    }
    if data.has_remaining() {
        return Err(LogosError::corruption("trailing bytes after index"));
    }
    Ok(index)
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "segment block runs past end of file",
                ))
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn annotate(err: LogosError, path: &Path) -> LogosError {
    match err {
        LogosError::Corruption(msg) => LogosError::Corruption(format!("{}: {}", path.display(), msg)),
        other => other,
    }
}
