//! Iterator Module
//!
//! Merging of sorted record streams shared by scans and compaction.
//!
//! Ordering guarantee: records come out in (key ASC, sequence DESC) order,
//! one record per key.

mod merge;

pub use merge::{MergeIterator, Source};
