//! Storage Module
//!
//! Persistent, immutable sorted segments and the bookkeeping around them.
//!
//! ## Responsibilities
//! - Encode/decode segments (blocks, sparse index, filter, metadata)
//! - Track the live segment set per level through an append-only manifest
//! - Publish immutable level views to readers
//! - Delete superseded segments once no reader holds them
//!
//! ## Layout
//! ```text
//! {data_dir}/
//! ├── MANIFEST
//! ├── wal/000001.log ...
//! └── segments/segment_000001_L0.seg ...
//! ```

pub mod manifest;
pub mod segment;

mod manager;
mod view;

pub use manager::{segment_path, SegmentManager, SEGMENT_DIR};
pub use manifest::{Manifest, ManifestState, VersionEdit};
pub use segment::{
    encode_segment, BloomFilter, Segment, SegmentFileWriter, SegmentIter, SegmentMeta, SegmentWriter,
};
pub use view::LevelView;
