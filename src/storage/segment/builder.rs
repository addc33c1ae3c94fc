//! Segment Builder
//!
//! Streams sorted records into a new segment: data blocks first, then the
//! filter, sparse index, metadata and footer.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{LogosError, Result};
use crate::record::Record;
use crate::wal::sync_dir;

use super::block::BlockBuilder;
use super::filter::BloomFilter;
use super::{IndexEntry, SegmentMeta, FOOTER_SIZE, HEADER_SIZE, MAGIC, VERSION};

/// Streaming segment encoder over any writer
pub struct SegmentWriter<W: Write> {
    out: W,
    /// Bytes written to `out` so far
    offset: u64,
    block_size: usize,
    bits_per_key: usize,
    block: BlockBuilder,
    block_first_key: Option<Bytes>,
    index: Vec<IndexEntry>,
    key_hashes: Vec<u128>,
    meta: SegmentMeta,
}

impl<W: Write> SegmentWriter<W> {
    /// Start a segment destined for `level`; writes the header immediately
    pub fn new(mut out: W, level: u32, block_size: usize, bits_per_key: usize) -> Result<Self> {
        out.write_all(MAGIC)?;
        out.write_all(&VERSION.to_le_bytes())?;
        out.write_all(&0u16.to_le_bytes())?; // reserved

        Ok(Self {
            out,
            offset: HEADER_SIZE,
            block_size,
            bits_per_key,
            block: BlockBuilder::new(block_size),
            block_first_key: None,
            index: Vec::new(),
            key_hashes: Vec::new(),
            meta: SegmentMeta::empty(level),
        })
    }

    /// Add a record; keys must be strictly ascending
    pub fn add(&mut self, record: &Record) -> Result<()> {
        if self.meta.record_count > 0 && record.key <= self.meta.max_key {
            return Err(LogosError::Encoding(format!(
                "segment input not strictly ascending: {:?} after {:?}",
                record.key, self.meta.max_key
            )));
        }

        if self.block_first_key.is_none() {
            self.block_first_key = Some(record.key.clone());
        }
        self.block.add(record);
        self.key_hashes.push(BloomFilter::hash_key(&record.key));
        self.meta.observe(record);

        if self.block.size() >= self.block_size {
            self.flush_block()?;
        }
        Ok(())
    }

    /// Bytes written plus the pending block; used to cut compaction outputs
    pub fn estimated_size(&self) -> u64 {
        self.offset + self.block.size() as u64
    }

    pub fn record_count(&self) -> u64 {
        self.meta.record_count
    }

    /// Write filter, index, metadata and footer; returns the writer and metadata
    pub fn finish(mut self) -> Result<(W, SegmentMeta)> {
        self.flush_block()?;

        let filter = BloomFilter::from_hashes(&self.key_hashes, self.bits_per_key).encode();
        let index = encode_index(&self.index);
        self.meta.block_count = self.index.len() as u32;
        self.meta.data_size = self.offset - HEADER_SIZE;
        let meta = Bytes::from(bincode::serialize(&self.meta)?);

        let filter_offset = self.offset;
        let mut footer = BytesMut::with_capacity(FOOTER_SIZE as usize);
        footer.put_u64_le(filter_offset);
        footer.put_u32_le(filter.len() as u32);
        footer.put_u32_le(index.len() as u32);
        footer.put_u32_le(meta.len() as u32);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&filter);
        hasher.update(&index);
        hasher.update(&meta);
        hasher.update(&footer);
        footer.put_u32_le(hasher.finalize());
        footer.put_slice(MAGIC);

        for section in [&filter[..], &index[..], &meta[..], &footer[..]] {
            self.out.write_all(section)?;
            self.offset += section.len() as u64;
        }
        self.out.flush()?;
        Ok((self.out, self.meta))
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.block.is_empty() {
            return Ok(());
        }
        let block = self.block.finish();
        let first_key = self.block_first_key.take().unwrap_or_default();
        self.out.write_all(&block)?;
        self.index.push(IndexEntry {
            first_key,
            offset: self.offset,
            len: block.len() as u32,
        });
        self.offset += block.len() as u64;
        Ok(())
    }
}

/// Index layout: `count u32 | (key_len u32 | key | offset u64 | len u32)*`
fn encode_index(index: &[IndexEntry]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u32_le(index.len() as u32);
    for entry in index {
        buf.put_u32_le(entry.first_key.len() as u32);
        buf.put_slice(&entry.first_key);
        buf.put_u64_le(entry.offset);
        buf.put_u32_le(entry.len);
    }
    buf.freeze()
}

/// Encode sorted records into a complete in-memory segment image
pub fn encode_segment<'a, I>(
    records: I,
    level: u32,
    block_size: usize,
    bits_per_key: usize,
) -> Result<Bytes>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut writer = SegmentWriter::new(Vec::new(), level, block_size, bits_per_key)?;
    for record in records {
        writer.add(record)?;
    }
    let (buf, _) = writer.finish()?;
    Ok(Bytes::from(buf))
}

/// Writes a segment file atomically: `<path>.tmp`, fsync, rename
pub struct SegmentFileWriter {
    path: PathBuf,
    tmp_path: PathBuf,
    writer: SegmentWriter<BufWriter<File>>,
}

impl SegmentFileWriter {
    pub fn create(path: &Path, level: u32, block_size: usize, bits_per_key: usize) -> Result<Self> {
        let tmp_path = tmp_path_for(path);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let writer = SegmentWriter::new(BufWriter::new(file), level, block_size, bits_per_key)?;
        Ok(Self {
            path: path.to_path_buf(),
            tmp_path,
            writer,
        })
    }

    pub fn add(&mut self, record: &Record) -> Result<()> {
        self.writer.add(record)
    }

    pub fn estimated_size(&self) -> u64 {
        self.writer.estimated_size()
    }

    pub fn record_count(&self) -> u64 {
        self.writer.record_count()
    }

    /// Make the file durable under its final name
    pub fn finish(self) -> Result<SegmentMeta> {
        let (buffered, meta) = self.writer.finish()?;
        let file = buffered
            .into_inner()
            .map_err(|e| LogosError::Io(e.into_error()))?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.tmp_path, &self.path)?;
        if let Some(dir) = self.path.parent() {
            sync_dir(dir)?;
        }
        Ok(meta)
    }

    /// Discard a partially written file
    pub fn abandon(self) {
        let _ = fs::remove_file(&self.tmp_path);
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
