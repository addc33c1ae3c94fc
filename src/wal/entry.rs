//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries and their framing.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{LogosError, Result};
use crate::record::{Record, Value, MAX_KEY_SIZE, MAX_VALUE_SIZE};

/// Frame header: Seq (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// Upper bound on a frame payload; anything larger is garbage
pub const MAX_PAYLOAD_SIZE: u32 = (MAX_KEY_SIZE + MAX_VALUE_SIZE + 1024) as u32;

/// A single entry in the WAL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Sequence number assigned by the write path
    pub seq: u64,

    /// The operation to perform
    pub operation: Operation,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Put a key-value pair
    Put { key: Bytes, value: Bytes },

    /// Delete a key
    Delete { key: Bytes },
}

/// Parsed frame header
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameHeader {
    pub seq: u64,
    pub crc: u32,
    pub len: u32,
}

impl FrameHeader {
    pub fn parse(buf: &[u8; HEADER_SIZE]) -> Self {
        let mut seq = [0u8; 8];
        let mut crc = [0u8; 4];
        let mut len = [0u8; 4];
        seq.copy_from_slice(&buf[0..8]);
        crc.copy_from_slice(&buf[8..12]);
        len.copy_from_slice(&buf[12..16]);
        Self {
            seq: u64::from_le_bytes(seq),
            crc: u32::from_le_bytes(crc),
            len: u32::from_le_bytes(len),
        }
    }
}

impl WalEntry {
    pub fn new(seq: u64, operation: Operation) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            seq,
            operation,
            timestamp,
        }
    }

    pub fn from_record(record: &Record) -> Self {
        let operation = match &record.value {
            Value::Put(value) => Operation::Put {
                key: record.key.clone(),
                value: value.clone(),
            },
            Value::Tombstone => Operation::Delete {
                key: record.key.clone(),
            },
        };
        Self::new(record.seq, operation)
    }

    pub fn into_record(self) -> Record {
        match self.operation {
            Operation::Put { key, value } => Record::put(key, value, self.seq),
            Operation::Delete { key } => Record::tombstone(key, self.seq),
        }
    }

    /// Encode as a complete frame: `[seq][crc][len][payload]`
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        let len = payload.len() as u32;
        let crc = Self::compute_crc(self.seq, len, &payload);

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        frame.extend_from_slice(&self.seq.to_le_bytes());
        frame.extend_from_slice(&crc.to_le_bytes());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Decode a frame payload, checking it against its header.
    ///
    /// A checksum mismatch is reported as `Corruption`; the caller decides
    /// whether it is a torn tail instead.
    pub(crate) fn decode(header: &FrameHeader, payload: &[u8]) -> Result<Self> {
        let crc = Self::compute_crc(header.seq, header.len, payload);
        if crc != header.crc {
            return Err(LogosError::corruption(format!(
                "WAL entry seq={} checksum mismatch: stored {:#010x}, computed {:#010x}",
                header.seq, header.crc, crc
            )));
        }

        let entry: WalEntry = bincode::deserialize(payload)?;
        if entry.seq != header.seq {
            return Err(LogosError::corruption(format!(
                "WAL entry header seq {} does not match payload seq {}",
                header.seq, entry.seq
            )));
        }
        Ok(entry)
    }

    /// CRC over `seq | len | payload`
    pub fn compute_crc(seq: u64, len: u32, payload: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&seq.to_le_bytes());
        hasher.update(&len.to_le_bytes());
        hasher.update(payload);
        hasher.finalize()
    }
}
