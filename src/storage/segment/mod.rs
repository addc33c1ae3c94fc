//! Segment Codec
//!
//! A segment is an immutable, sorted file of records:
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ Header: magic "LGSG" | ver | rsvd  │  8 bytes
//! ├────────────────────────────────────┤
//! │ Data block 0                       │  entries + crc32
//! │ Data block 1                       │
//! │ ...                                │
//! ├────────────────────────────────────┤
//! │ Filter  (bloom bits)               │
//! │ Index   (first key → block)        │
//! │ Meta    (bincode SegmentMeta)      │
//! ├────────────────────────────────────┤
//! │ Footer: offsets | lens | crc | mag │  28 bytes
//! └────────────────────────────────────┘
//! ```
//!
//! The footer checksum covers filter, index, metadata and the footer prefix.
//! Each data block carries its own checksum, verified when the block is read.

mod block;
mod builder;
mod filter;
mod iterator;
mod reader;

pub use builder::{encode_segment, SegmentFileWriter, SegmentWriter};
pub use filter::BloomFilter;
pub use iterator::SegmentIter;
pub use reader::Segment;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::record::Record;

pub const MAGIC: &[u8; 4] = b"LGSG";
pub const VERSION: u16 = 1;
pub const HEADER_SIZE: u64 = 8;
pub const FOOTER_SIZE: u64 = 28;

/// key_len (4) + val_len (4) + seq (8)
pub(crate) const ENTRY_HEADER_SIZE: usize = 16;
pub(crate) const BLOCK_TRAILER_SIZE: usize = 4;
pub(crate) const TOMBSTONE_MARKER: u32 = u32::MAX;

/// Sparse index entry: first key of a block and where the block lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub first_key: Bytes,
    pub offset: u64,
    pub len: u32,
}

/// Summary stored in every segment and mirrored in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub level: u32,
    pub min_key: Bytes,
    pub max_key: Bytes,
    pub record_count: u64,
    pub tombstone_count: u64,
    pub min_seq: u64,
    pub max_seq: u64,
    pub block_count: u32,
    /// Bytes of data blocks, excluding header and trailing sections
    pub data_size: u64,
}

impl SegmentMeta {
    pub fn empty(level: u32) -> Self {
        Self {
            level,
            min_key: Bytes::new(),
            max_key: Bytes::new(),
            record_count: 0,
            tombstone_count: 0,
            min_seq: u64::MAX,
            max_seq: 0,
            block_count: 0,
            data_size: 0,
        }
    }

    /// Fold one record into the summary; records arrive in key order
    pub(crate) fn observe(&mut self, record: &Record) {
        if self.record_count == 0 {
            self.min_key = record.key.clone();
        }
        self.max_key = record.key.clone();
        self.record_count += 1;
        if record.is_tombstone() {
            self.tombstone_count += 1;
        }
        self.min_seq = self.min_seq.min(record.seq);
        self.max_seq = self.max_seq.max(record.seq);
    }

    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }
}
