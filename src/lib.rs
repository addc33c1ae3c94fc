//! # logos
//!
//! The core of a log-structured merge-tree storage engine:
//! - Write-Ahead Logging (WAL) for durability
//! - Copy-on-write memtables with snapshot-consistent scans
//! - Immutable, checksummed segments with sparse index and Bloom filter
//! - Leveled background compaction
//! - Single-writer/multi-reader concurrency model
//!
//! ## Architecture Overview
//!
//! ```text
//!            put / delete                    get / scan
//!                 │                              │
//!        ┌────────▼────────┐                     │
//!        │  WAL (append)   │                     │
//!        └────────┬────────┘                     │
//!        ┌────────▼────────┐   newest first      │
//!        │ Active MemTable │◄────────────────────┤
//!        └────────┬────────┘                     │
//!                 │ freeze                       │
//!        ┌────────▼────────┐                     │
//!        │ Frozen MemTables│◄────────────────────┤
//!        └────────┬────────┘                     │
//!                 │ flush                        │
//!        ┌────────▼────────┐                     │
//!        │  L0 segments    │◄────────────────────┤
//!        └────────┬────────┘                     │
//!                 │ compaction                   │
//!        ┌────────▼────────┐                     │
//!        │  L1 .. Ln       │◄────────────────────┘
//!        └─────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod record;

pub mod wal;
pub mod memtable;
pub mod storage;
pub mod iterator;
pub mod compaction;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{LogosError, Result};
pub use config::{Options, OptionsBuilder, WalSyncStrategy};
pub use record::{KeyRange, Record, Value};
pub use engine::{Engine, EngineStats, ScanIter};
pub use compaction::{CompactionPolicy, LeveledPolicy};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of logos
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
