//! Data blocks
//!
//! A block is a run of encoded entries followed by a CRC32 of those bytes:
//! `[KeyLen u32][ValLen u32][Seq u64][Key][Value] ... [CRC u32]`.
//! `ValLen == u32::MAX` marks a tombstone (no value bytes follow).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{LogosError, Result};
use crate::record::{Record, Value};

use super::{BLOCK_TRAILER_SIZE, ENTRY_HEADER_SIZE, TOMBSTONE_MARKER};

/// Accumulates entries for one block
pub(crate) struct BlockBuilder {
    buf: BytesMut,
    count: usize,
}

impl BlockBuilder {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity + BLOCK_TRAILER_SIZE),
            count: 0,
        }
    }

    pub fn add(&mut self, record: &Record) {
        self.buf.put_u32_le(record.key.len() as u32);
        match &record.value {
            Value::Put(v) => self.buf.put_u32_le(v.len() as u32),
            Value::Tombstone => self.buf.put_u32_le(TOMBSTONE_MARKER),
        }
        self.buf.put_u64_le(record.seq);
        self.buf.put_slice(&record.key);
        if let Value::Put(v) = &record.value {
            self.buf.put_slice(v);
        }
        self.count += 1;
    }

    /// Encoded size so far, without the trailer
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Seal the block, appending its checksum; the builder is left empty
    pub fn finish(&mut self) -> Bytes {
        let crc = crc32fast::hash(&self.buf);
        self.buf.put_u32_le(crc);
        self.count = 0;
        self.buf.split().freeze()
    }
}

/// Verify and decode a sealed block
pub(crate) fn decode_block(block: Bytes) -> Result<Vec<Record>> {
    if block.len() < BLOCK_TRAILER_SIZE {
        return Err(LogosError::corruption(format!(
            "block too short: {} bytes",
            block.len()
        )));
    }
    let body_len = block.len() - BLOCK_TRAILER_SIZE;
    let mut trailer = &block[body_len..];
    let stored = trailer.get_u32_le();
    let computed = crc32fast::hash(&block[..body_len]);
    if stored != computed {
        return Err(LogosError::corruption(format!(
            "block checksum mismatch: stored {:#010x}, computed {:#010x}",
            stored, computed
        )));
    }

    let mut body = block.slice(..body_len);
    let mut records = Vec::new();
    while body.has_remaining() {
        if body.remaining() < ENTRY_HEADER_SIZE {
            return Err(LogosError::corruption("truncated block entry header"));
        }
        let key_len = body.get_u32_le() as usize;
        let val_len = body.get_u32_le();
        let seq = body.get_u64_le();

        let value_bytes = if val_len == TOMBSTONE_MARKER { 0 } else { val_len as usize };
        if body.remaining() < key_len + value_bytes {
            return Err(LogosError::corruption("truncated block entry body"));
        }
        let key = body.split_to(key_len);
        let value = if val_len == TOMBSTONE_MARKER {
            Value::Tombstone
        } else {
            Value::Put(body.split_to(value_bytes))
        };
        records.push(Record { key, value, seq });
    }
    Ok(records)
}
