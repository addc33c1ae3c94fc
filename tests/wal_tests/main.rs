//! WAL Tests
//!
//! Tests verify:
//! - Framing, positions and sync strategies of the writer
//! - Lazy reading and torn-tail handling
//! - Replay across rotated log files and truncation

#[path = "../common/mod.rs"]
mod common;
