//! MemTable Module
//!
//! In-memory data structure for recent writes.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory
//! - Single-writer/multi-reader access pattern
//! - Track size for flush triggers
//! - Ordered, snapshot-consistent iteration for scans and flushes
//!
//! ## Data Structure Choice
//! An ordered map behind `RwLock<Arc<..>>`, copied on write only while a
//! snapshot is outstanding:
//! - Ordered keys (required for segment generation)
//! - Scans hold an `Arc` of the map, so later puts never show up in them
//! - Freezing is a pointer swap, no data copy

mod table;

pub use table::{FrozenMemTable, MemTable, MemTableIter};
