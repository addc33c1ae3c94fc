//! Helpers shared by the integration test crates

#![allow(dead_code)]

use logos::{Engine, Options};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Route engine logs to the test harness (`RUST_LOG=logos=debug` to see them)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Small thresholds and inline background work, so tests are deterministic
pub fn small_options() -> Options {
    Options::builder()
        .memtable_size_threshold(4 * 1024)
        .block_size(256)
        .target_segment_size(8 * 1024)
        .level0_compaction_trigger(4)
        .level1_size_budget(32 * 1024)
        .level_size_multiplier(4)
        .max_levels(4)
        .background_work(false)
        .build()
}

pub fn open_engine(options: Options) -> (TempDir, Engine) {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path(), options).unwrap();
    (dir, engine)
}

pub fn key(i: usize) -> Vec<u8> {
    format!("key{:06}", i).into_bytes()
}

pub fn value(i: usize, version: usize) -> Vec<u8> {
    format!("value-{}-{}", i, version).into_bytes()
}
