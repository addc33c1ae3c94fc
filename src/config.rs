//! Configuration for logos
//!
//! Centralized engine options with sensible defaults.

use std::sync::Arc;

use crate::compaction::{CompactionPolicy, LeveledPolicy};
use crate::error::{LogosError, Result};

/// Engine options
#[derive(Debug, Clone)]
pub struct Options {
    // -------------------------------------------------------------------------
    // Write Path
    // -------------------------------------------------------------------------
    /// Approximate memtable size (bytes) at which it is frozen and flushed
    pub memtable_size_threshold: usize,

    /// Frozen memtables allowed to queue before writers flush inline
    pub max_frozen_memtables: usize,

    /// Sync strategy: how often to fsync the WAL
    pub wal_sync_strategy: WalSyncStrategy,

    // -------------------------------------------------------------------------
    // Segment Format
    // -------------------------------------------------------------------------
    /// Target uncompressed size of one data block (bytes)
    pub block_size: usize,

    /// Membership filter bits per key (0 disables the filter)
    pub filter_bits_per_key: usize,

    /// Compaction output files are cut once they reach this size (bytes)
    pub target_segment_size: u64,

    // -------------------------------------------------------------------------
    // Compaction
    // -------------------------------------------------------------------------
    /// Number of level-0 segments that triggers an L0 → L1 compaction
    pub level0_compaction_trigger: usize,

    /// Size budget of level 1 (bytes); level n gets `budget * multiplier^(n-1)`
    pub level1_size_budget: u64,

    /// Geometric growth factor between consecutive levels
    pub level_size_multiplier: usize,

    /// Number of levels, including level 0
    pub max_levels: usize,

    /// Picks the next compaction; leveled by default
    pub compaction_policy: Arc<dyn CompactionPolicy>,

    /// Run flush and compaction on a background thread.
    /// When false they run inline on the writing thread.
    pub background_work: bool,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Options {
    fn default() -> Self {
        Self {
            memtable_size_threshold: 4 * 1024 * 1024, // 4 MB
            max_frozen_memtables: 2,
            wal_sync_strategy: WalSyncStrategy::EveryWrite,
            block_size: 4 * 1024,
            filter_bits_per_key: 10,
            target_segment_size: 2 * 1024 * 1024,
            level0_compaction_trigger: 4,
            level1_size_budget: 10 * 1024 * 1024,
            level_size_multiplier: 10,
            max_levels: 7,
            compaction_policy: Arc::new(LeveledPolicy),
            background_work: true,
        }
    }
}

impl Options {
    /// Create a new options builder
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }

    /// Reject option combinations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.memtable_size_threshold == 0 {
            return Err(LogosError::Config(
                "memtable_size_threshold must be > 0".to_string(),
            ));
        }
        if self.block_size < 64 {
            return Err(LogosError::Config(format!(
                "block_size must be at least 64 bytes, got {}",
                self.block_size
            )));
        }
        if self.level0_compaction_trigger == 0 {
            return Err(LogosError::Config(
                "level0_compaction_trigger must be > 0".to_string(),
            ));
        }
        if self.level_size_multiplier < 2 {
            return Err(LogosError::Config(
                "level_size_multiplier must be >= 2".to_string(),
            ));
        }
        if self.max_levels < 2 {
            return Err(LogosError::Config("max_levels must be >= 2".to_string()));
        }
        if self.filter_bits_per_key > 64 {
            return Err(LogosError::Config(
                "filter_bits_per_key must be <= 64".to_string(),
            ));
        }
        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return Err(LogosError::Config(
                "EveryNEntries count must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Size budget (bytes) of `level`; level 0 is governed by segment count instead
    pub fn level_size_budget(&self, level: usize) -> u64 {
        let mut budget = self.level1_size_budget;
        for _ in 1..level {
            budget = budget.saturating_mul(self.level_size_multiplier as u64);
        }
        budget
    }
}

/// Builder for Options
#[derive(Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Set the memtable flush threshold (in bytes)
    pub fn memtable_size_threshold(mut self, size: usize) -> Self {
        self.options.memtable_size_threshold = size;
        self
    }

    pub fn max_frozen_memtables(mut self, count: usize) -> Self {
        self.options.max_frozen_memtables = count;
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.options.wal_sync_strategy = strategy;
        self
    }

    /// Set the data block size (in bytes)
    pub fn block_size(mut self, size: usize) -> Self {
        self.options.block_size = size;
        self
    }

    pub fn filter_bits_per_key(mut self, bits: usize) -> Self {
        self.options.filter_bits_per_key = bits;
        self
    }

    pub fn target_segment_size(mut self, size: u64) -> Self {
        self.options.target_segment_size = size;
        self
    }

    pub fn level0_compaction_trigger(mut self, count: usize) -> Self {
        self.options.level0_compaction_trigger = count;
        self
    }

    pub fn level1_size_budget(mut self, size: u64) -> Self {
        self.options.level1_size_budget = size;
        self
    }

    pub fn level_size_multiplier(mut self, multiplier: usize) -> Self {
        self.options.level_size_multiplier = multiplier;
        self
    }

    pub fn max_levels(mut self, levels: usize) -> Self {
        self.options.max_levels = levels;
        self
    }

    /// Replace the compaction policy
    pub fn compaction_policy(mut self, policy: Arc<dyn CompactionPolicy>) -> Self {
        self.options.compaction_policy = policy;
        self
    }

    /// Enable or disable the background flush/compaction thread
    pub fn background_work(mut self, enabled: bool) -> Self {
        self.options.background_work = enabled;
        self
    }

    pub fn build(self) -> Options {
        self.options
    }
}
