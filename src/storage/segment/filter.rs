//! Membership filter
//!
//! Bloom filter embedded in every segment. "No" is definite, "yes" may be a
//! false positive.
//!
//! Sizing: `bits_per_key` bits per key and `k = round(bits_per_key * ln 2)`
//! probes; 10 bits/key gives roughly a 1% false positive rate.
//!
//! Probes use double hashing, `h_i = h1 + i * h2 (mod m)`, with `h1`/`h2` the
//! two halves of one 128-bit xxh3 hash.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use xxhash_rust::xxh3::xxh3_128;

use crate::error::{LogosError, Result};

/// Serialized header: num_bits (4) + num_hashes (4)
const FILTER_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u32,
    num_hashes: u32,
}

impl BloomFilter {
    /// Build a filter over pre-hashed keys; `bits_per_key == 0` disables it
    pub(crate) fn from_hashes(hashes: &[u128], bits_per_key: usize) -> Self {
        if bits_per_key == 0 || hashes.is_empty() {
            return Self::disabled();
        }

        let num_bits = ((hashes.len() * bits_per_key) as u64).clamp(64, u32::MAX as u64) as u32;
        let num_hashes = ((bits_per_key as f64) * std::f64::consts::LN_2).round() as u32;
        let num_hashes = num_hashes.clamp(1, 30);
        let words = (num_bits as usize + 63) / 64;

        let mut filter = Self {
            bits: vec![0u64; words],
            num_bits,
            num_hashes,
        };
        for hash in hashes {
            filter.insert_hash(*hash);
        }
        filter
    }

    /// A filter that answers "maybe" for everything
    pub fn disabled() -> Self {
        Self {
            bits: Vec::new(),
            num_bits: 0,
            num_hashes: 0,
        }
    }

    pub fn hash_key(key: &[u8]) -> u128 {
        xxh3_128(key)
    }

    /// Check if a key MIGHT be in the set.
    /// false → definitely not here. true → probably here.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        if self.num_bits == 0 {
            return true;
        }
        let (h1, h2) = split(Self::hash_key(key));
        (0..self.num_hashes).all(|i| self.check_bit(self.position(h1, h2, i)))
    }

    pub fn is_enabled(&self) -> bool {
        self.num_bits > 0
    }

    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub(crate) fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FILTER_HEADER_SIZE + self.bits.len() * 8);
        buf.put_u32_le(self.num_bits);
        buf.put_u32_le(self.num_hashes);
        for word in &self.bits {
            buf.put_u64_le(*word);
        }
        buf.freeze()
    }

    pub(crate) fn decode(mut data: Bytes) -> Result<Self> {
        if data.len() < FILTER_HEADER_SIZE {
            return Err(LogosError::corruption("filter section too short"));
        }
        let num_bits = data.get_u32_le();
        let num_hashes = data.get_u32_le();
        let words = (num_bits as usize + 63) / 64;
        if data.remaining() != words * 8 {
            return Err(LogosError::corruption(format!(
                "filter expects {} words, found {} bytes",
                words,
                data.remaining()
            )));
        }
        let bits = (0..words).map(|_| data.get_u64_le()).collect();
        Ok(Self {
            bits,
            num_bits,
            num_hashes,
        })
    }

    fn insert_hash(&mut self, hash: u128) {
        let (h1, h2) = split(hash);
        for i in 0..self.num_hashes {
            let pos = self.position(h1, h2, i);
            self.bits[(pos / 64) as usize] |= 1 << (pos % 64);
        }
    }

    fn position(&self, h1: u64, h2: u64, i: u32) -> u32 {
        (h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits as u64) as u32
    }

    fn check_bit(&self, pos: u32) -> bool {
        (self.bits[(pos / 64) as usize] >> (pos % 64)) & 1 == 1
    }
}

fn split(hash: u128) -> (u64, u64) {
    (hash as u64, (hash >> 64) as u64)
}
