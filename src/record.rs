//! Record types shared by every layer of the engine.

use std::ops::Bound;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Maximum key size accepted by the write path (64 KiB)
pub const MAX_KEY_SIZE: usize = 64 * 1024;

/// Maximum value size accepted by the write path (16 MiB)
pub const MAX_VALUE_SIZE: usize = 16 * 1024 * 1024;

/// Value half of a record: live bytes or a deletion marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// A live value
    Put(Bytes),

    /// A tombstone (deleted key)
    Tombstone,
}

impl Value {
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Value::Tombstone)
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Put(v) => Some(v),
            Value::Tombstone => None,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().map_or(0, |v| v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single versioned write: `(key, value | tombstone, seq)`.
///
/// For the same key, the record with the higher `seq` wins everywhere
/// (memtable, segments, merges).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: Bytes,
    pub value: Value,
    pub seq: u64,
}

impl Record {
    pub fn put(key: impl Into<Bytes>, value: impl Into<Bytes>, seq: u64) -> Self {
        Self {
            key: key.into(),
            value: Value::Put(value.into()),
            seq,
        }
    }

    pub fn tombstone(key: impl Into<Bytes>, seq: u64) -> Self {
        Self {
            key: key.into(),
            value: Value::Tombstone,
            seq,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_tombstone()
    }

    /// Approximate in-memory footprint used for flush accounting
    pub fn approximate_size(&self) -> usize {
        // key + value + seq + enum/Bytes headers
        self.key.len() + self.value.len() + 8 + 32
    }
}

/// Key range with arbitrary bounds, used by scans and overlap checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub lower: Bound<Bytes>,
    pub upper: Bound<Bytes>,
}

impl KeyRange {
    pub fn new(lower: Bound<Bytes>, upper: Bound<Bytes>) -> Self {
        Self { lower, upper }
    }

    /// `[lower, upper]`, both inclusive
    pub fn inclusive(lower: impl Into<Bytes>, upper: impl Into<Bytes>) -> Self {
        Self::new(Bound::Included(lower.into()), Bound::Included(upper.into()))
    }

    pub fn all() -> Self {
        Self::new(Bound::Unbounded, Bound::Unbounded)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        !self.below_lower(key) && !self.above_upper(key)
    }

    /// True if `key` sorts before the lower bound
    pub fn below_lower(&self, key: &[u8]) -> bool {
        match &self.lower {
            Bound::Included(l) => key < &l[..],
            Bound::Excluded(l) => key <= &l[..],
            Bound::Unbounded => false,
        }
    }

    /// True if `key` sorts after the upper bound
    pub fn above_upper(&self, key: &[u8]) -> bool {
        match &self.upper {
            Bound::Included(u) => key > &u[..],
            Bound::Excluded(u) => key >= &u[..],
            Bound::Unbounded => false,
        }
    }

    /// True if the closed interval `[min, max]` intersects this range
    pub fn overlaps(&self, min: &[u8], max: &[u8]) -> bool {
        !self.above_upper(min) && !self.below_lower(max)
    }

    pub(crate) fn as_slices(&self) -> (Bound<&[u8]>, Bound<&[u8]>) {
        (bound_as_slice(&self.lower), bound_as_slice(&self.upper))
    }
}

pub(crate) fn bound_as_slice(bound: &Bound<Bytes>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(b) => Bound::Included(&b[..]),
        Bound::Excluded(b) => Bound::Excluded(&b[..]),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// True if no key can satisfy both bounds
pub(crate) fn is_empty_range(lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> bool {
    match (lower, upper) {
        (Bound::Included(l), Bound::Included(u)) => l > u,
        (Bound::Included(l), Bound::Excluded(u))
        | (Bound::Excluded(l), Bound::Included(u))
        | (Bound::Excluded(l), Bound::Excluded(u)) => l >= u,
        _ => false,
    }
}
