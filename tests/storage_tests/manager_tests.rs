use std::path::Path;
use std::sync::Arc;

use logos::record::{KeyRange, Record};
use logos::storage::{Segment, SegmentFileWriter, SegmentManager};
use logos::{LogosError, Options};
use tempfile::TempDir;

use crate::common::{init_tracing, small_options};

// =============================================================================
// Helper Functions
// =============================================================================

fn open(dir: &Path) -> SegmentManager {
    SegmentManager::open(dir, &small_options()).unwrap()
}

/// Write a segment holding `keys` (all with `seq`) and return it unregistered
fn write_segment(manager: &SegmentManager, level: u32, keys: &[&str], seq: u64) -> Arc<Segment> {
    let id = manager.allocate_segment_id();
    let path = manager.segment_path(id, level);
    let mut writer = SegmentFileWriter::create(&path, level, 256, 10).unwrap();
    for key in keys {
        writer.add(&Record::put(key.to_string(), format!("{}@{}", key, seq), seq)).unwrap();
    }
    writer.finish().unwrap();
    Arc::new(Segment::open_file(id, &path).unwrap())
}

fn ids(segments: &[Arc<Segment>]) -> Vec<u64> {
    segments.iter().map(|s| s.id()).collect()
}

// =============================================================================
// Registration
// =============================================================================

#[test]
fn test_new_manager_is_empty() {
    let temp = TempDir::new().unwrap();
    let manager = open(temp.path());
    assert_eq!(manager.segment_count(), 0);
    assert_eq!(manager.log_number(), 0);
    assert_eq!(manager.last_sequence(), 0);
    assert!(manager.pick_compaction_candidate().is_none());
}

#[test]
fn test_level0_ordered_newest_first() {
    let temp = TempDir::new().unwrap();
    let manager = open(temp.path());
    let older = write_segment(&manager, 0, &["a", "m"], 1);
    let newer = write_segment(&manager, 0, &["c", "z"], 2);
    manager.register(Arc::clone(&older)).unwrap();
    manager.register(Arc::clone(&newer)).unwrap();

    let view = manager.current_view();
    assert_eq!(ids(view.level(0)), vec![newer.id(), older.id()]);
    assert_eq!(view.get(b"a").unwrap().unwrap().seq, 1);
    assert_eq!(view.get(b"c").unwrap().unwrap().seq, 2);
}

#[test]
fn test_deeper_levels_ordered_by_key() {
    let temp = TempDir::new().unwrap();
    let manager = open(temp.path());
    let right = write_segment(&manager, 1, &["n", "p"], 1);
    let left = write_segment(&manager, 1, &["a", "c"], 2);
    manager.register(Arc::clone(&right)).unwrap();
    manager.register(Arc::clone(&left)).unwrap();

    let view = manager.current_view();
    assert_eq!(ids(view.level(1)), vec![left.id(), right.id()]);
    assert!(view.get(b"p").unwrap().is_some());
    assert!(view.get(b"d").unwrap().is_none());
    assert_eq!(ids(&view.overlapping(1, &KeyRange::inclusive("b", "o"))), vec![left.id(), right.id()]);
    assert_eq!(ids(&view.overlapping(1, &KeyRange::inclusive("d", "m"))), Vec::<u64>::new());
}

#[test]
fn test_registered_segments_survive_reopen() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let (flushed, compacted) = {
        let manager = open(temp.path());
        let flushed = write_segment(&manager, 0, &["a", "b"], 5);
        let compacted = write_segment(&manager, 2, &["x", "y"], 3);
        manager.register_flush(Arc::clone(&flushed), 4, 5).unwrap();
        manager.register(Arc::clone(&compacted)).unwrap();
        (flushed.id(), compacted.id())
    };

    let manager = open(temp.path());
    let view = manager.current_view();
    assert_eq!(ids(view.level(0)), vec![flushed]);
    assert_eq!(ids(view.level(2)), vec![compacted]);
    assert_eq!(manager.log_number(), 4);
    assert_eq!(manager.last_sequence(), 5);
    assert!(manager.allocate_segment_id() > compacted);
}

// =============================================================================
// Replacement
// =============================================================================

#[test]
fn test_replace_swaps_and_deletes_inputs() {
    let temp = TempDir::new().unwrap();
    let manager = open(temp.path());
    let a = write_segment(&manager, 0, &["a", "b"], 1);
    let b = write_segment(&manager, 0, &["b", "c"], 2);
    manager.register(Arc::clone(&a)).unwrap();
    manager.register(Arc::clone(&b)).unwrap();
    let a_path = a.path().unwrap().to_path_buf();

    let merged = write_segment(&manager, 1, &["a", "b", "c"], 2);
    let held_view = manager.current_view();
    manager.replace(&[Arc::clone(&a), Arc::clone(&b)], vec![Arc::clone(&merged)]).unwrap();
    drop(a);
    drop(b);

    let view = manager.current_view();
    assert!(view.level(0).is_empty());
    assert_eq!(ids(view.level(1)), vec![merged.id()]);

    // A reader holding the old view keeps the old files alive
    assert!(a_path.exists());
    assert_eq!(held_view.level(0).len(), 2);
    drop(held_view);
    assert!(!a_path.exists());
}

#[test]
fn test_replace_rejects_inputs_that_are_not_live() {
    let temp = TempDir::new().unwrap();
    let manager = open(temp.path());
    let stray = write_segment(&manager, 0, &["a"], 1);

    let err = manager.replace(&[stray], Vec::new()).unwrap_err();
    assert!(matches!(err, LogosError::InvalidInput(_)));
}

#[test]
fn test_register_rejects_level_beyond_max() {
    let temp = TempDir::new().unwrap();
    let manager = open(temp.path());
    let levels = small_options().max_levels as u32;
    let too_deep = write_segment(&manager, levels, &["a"], 1);

    let err = manager.register(too_deep).unwrap_err();
    assert!(matches!(err, LogosError::InvalidInput(_)));
    assert_eq!(manager.segment_count(), 0);
}

#[test]
fn test_reopen_with_fewer_levels_is_rejected() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let deep_path = {
        let manager = open(temp.path());
        let deep = write_segment(&manager, 3, &["a", "c"], 1);
        manager.register(Arc::clone(&deep)).unwrap();
        manager.register(write_segment(&manager, 1, &["b", "d"], 2)).unwrap();
        deep.path().unwrap().to_path_buf()
    };

    // Levels 1 and 3 overlap; folding them together would break lookups
    let options = Options::builder().max_levels(2).build();
    let err = SegmentManager::open(temp.path(), &options).err().unwrap();
    assert!(matches!(err, LogosError::Config(_)));
    assert!(deep_path.exists());

    let manager = open(temp.path());
    assert_eq!(manager.segment_count(), 2);
}

// =============================================================================
// Startup Cleanup
// =============================================================================

#[test]
fn test_unlisted_and_tmp_files_removed_on_open() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let (live_path, orphan_path) = {
        let manager = open(temp.path());
        let live = write_segment(&manager, 0, &["a"], 1);
        manager.register(Arc::clone(&live)).unwrap();
        let orphan = write_segment(&manager, 1, &["b"], 2);
        (
            live.path().unwrap().to_path_buf(),
            orphan.path().unwrap().to_path_buf(),
        )
    };
    let tmp_path = temp.path().join("segments").join("segment_000099_L1.seg.tmp");
    std::fs::write(&tmp_path, b"partial").unwrap();

    let manager = open(temp.path());
    assert_eq!(manager.segment_count(), 1);
    assert!(live_path.exists());
    assert!(!orphan_path.exists());
    assert!(!tmp_path.exists());
}

#[test]
fn test_missing_listed_segment_is_corruption() {
    let temp = TempDir::new().unwrap();
    let path = {
        let manager = open(temp.path());
        let segment = write_segment(&manager, 0, &["a"], 1);
        manager.register(Arc::clone(&segment)).unwrap();
        segment.path().unwrap().to_path_buf()
    };
    std::fs::remove_file(&path).unwrap();

    let err = SegmentManager::open(temp.path(), &Options::default()).err().unwrap();
    assert!(err.is_corruption());
}

#[test]
fn test_level_sizes_track_bytes() {
    let temp = TempDir::new().unwrap();
    let manager = open(temp.path());
    let segment = write_segment(&manager, 1, &["a", "b", "c"], 1);
    let size = segment.file_size();
    manager.register(segment).unwrap();

    let sizes = manager.level_sizes();
    assert_eq!(sizes.len(), small_options().max_levels);
    assert_eq!(sizes[0], 0);
    assert_eq!(sizes[1], size);
}
