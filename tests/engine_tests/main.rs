//! Engine Tests
//!
//! Tests verify:
//! - Basic get/put/delete operations and range scans
//! - Flush and compaction through the public API
//! - Crash recovery from the WAL and the manifest
//! - Concurrent access with the background worker
//! - Agreement with an in-memory model under random operations

#[path = "../common/mod.rs"]
mod common;

mod model_tests;
