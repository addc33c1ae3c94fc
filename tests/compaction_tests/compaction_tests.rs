//! Compaction Tests
//!
//! Tests verify:
//! - Policy scoring and task selection
//! - Newest-wins merging and non-overlapping outputs
//! - Tombstone eviction only when nothing older can exist below
//! - Crash safety between building outputs and installing them

#[path = "../common/mod.rs"]
mod common;

use std::path::Path;
use std::sync::Arc;

use logos::compaction::{CompactionPolicy, CompactionTask, Compactor, LeveledPolicy};
use logos::record::{KeyRange, Record};
use logos::storage::{LevelView, Segment, SegmentFileWriter, SegmentManager};
use logos::Options;
use tempfile::TempDir;

use common::{init_tracing, small_options};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup(options: &Options) -> (TempDir, Arc<SegmentManager>, Compactor) {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let manager = Arc::new(SegmentManager::open(temp.path(), options).unwrap());
    let compactor = Compactor::new(Arc::clone(&manager));
    (temp, manager, compactor)
}

fn add_segment(manager: &SegmentManager, level: u32, records: &[Record]) -> Arc<Segment> {
    let id = manager.allocate_segment_id();
    let path = manager.segment_path(id, level);
    let mut writer = SegmentFileWriter::create(&path, level, 256, 10).unwrap();
    for record in records {
        writer.add(record).unwrap();
    }
    writer.finish().unwrap();
    let segment = Arc::new(Segment::open_file(id, &path).unwrap());
    manager.register(Arc::clone(&segment)).unwrap();
    segment
}

/// Puts for `keys` with values tagged by `seq`
fn puts(keys: impl IntoIterator<Item = usize>, seq: u64) -> Vec<Record> {
    keys.into_iter()
        .map(|i| Record::put(format!("key{:05}", i), format!("v{}", seq), seq))
        .collect()
}

/// Everything readable through the view, tombstones included
fn contents(view: &LevelView) -> Vec<Record> {
    let mut all: Vec<Record> = Vec::new();
    for segment in view.segments() {
        for record in segment.iter() {
            let record = record.unwrap();
            let newest = view.get(&record.key).unwrap().unwrap();
            if !all.iter().any(|r| r.key == newest.key) {
                all.push(newest);
            }
        }
    }
    all.sort_by(|a, b| a.key.cmp(&b.key));
    all
}

fn assert_levels_disjoint(view: &LevelView) {
    for level in 1..view.num_levels() {
        let segments = view.level(level);
        for pair in segments.windows(2) {
            assert!(
                pair[0].max_key() < pair[1].min_key(),
                "level {} overlaps: {:?} / {:?}",
                level,
                pair[0],
                pair[1]
            );
        }
    }
}

fn segment_files(dir: &Path) -> usize {
    std::fs::read_dir(dir.join("segments")).unwrap().count()
}

// =============================================================================
// Policy
// =============================================================================

#[test]
fn test_no_task_below_trigger() {
    let (_temp, manager, _) = setup(&small_options());
    for seq in 1..=3 {
        add_segment(&manager, 0, &puts(0..10, seq));
    }
    assert!(manager.pick_compaction_candidate().is_none());
}

#[test]
fn test_level0_task_takes_all_level0_and_overlapping_level1() {
    let (_temp, manager, _) = setup(&small_options());
    let inside = add_segment(&manager, 1, &puts(5..8, 1));
    let outside = add_segment(&manager, 1, &puts(50..60, 2));
    for seq in 3..=6 {
        add_segment(&manager, 0, &puts(0..10, seq));
    }

    let task = manager.pick_compaction_candidate().unwrap();
    assert_eq!((task.source_level, task.target_level), (0, 1));
    assert_eq!(task.inputs.len(), 4);
    let overlapping: Vec<u64> = task.overlapping.iter().map(|s| s.id()).collect();
    assert_eq!(overlapping, vec![inside.id()]);
    assert!(!overlapping.contains(&outside.id()));
    assert!(task.score >= 1.0);
}

#[test]
fn test_leveln_task_picks_oldest_segment() {
    let options = Options::builder()
        .level1_size_budget(1)
        .max_levels(3)
        .background_work(false)
        .build();
    let (_temp, manager, _) = setup(&options);
    let newer = add_segment(&manager, 1, &puts(0..5, 9));
    let older = add_segment(&manager, 1, &puts(10..15, 2));
    let below = add_segment(&manager, 2, &puts(12..20, 1));

    let scores = LeveledPolicy::level_scores(&manager.current_view(), &options);
    assert_eq!(scores.len(), 2);
    assert!(scores[1] > 1.0);

    let task = manager.pick_compaction_candidate().unwrap();
    assert_eq!((task.source_level, task.target_level), (1, 2));
    assert_eq!(task.inputs[0].id(), older.id());
    assert_eq!(task.overlapping[0].id(), below.id());
    assert_ne!(task.inputs[0].id(), newer.id());
}

#[derive(Debug)]
struct NeverCompact;

impl CompactionPolicy for NeverCompact {
    fn pick(&self, _view: &LevelView, _options: &Options) -> Option<CompactionTask> {
        None
    }
}

#[test]
fn test_custom_policy_is_used() {
    let options = Options::builder()
        .level0_compaction_trigger(1)
        .compaction_policy(Arc::new(NeverCompact))
        .background_work(false)
        .build();
    let (_temp, manager, compactor) = setup(&options);
    for seq in 1..=5 {
        add_segment(&manager, 0, &puts(0..10, seq));
    }
    assert!(manager.pick_compaction_candidate().is_none());
    assert_eq!(compactor.compact_all().unwrap(), 0);
}

// =============================================================================
// Merging
// =============================================================================

#[test]
fn test_newest_version_wins_and_levels_stay_disjoint() {
    let (temp, manager, compactor) = setup(&small_options());
    add_segment(&manager, 1, &puts(0..40, 1));
    for seq in 2..=5 {
        let start = (seq as usize - 2) * 10;
        add_segment(&manager, 0, &puts(start..start + 15, seq));
    }
    let before = contents(&manager.current_view());

    let runs = compactor.compact_all().unwrap();
    assert!(runs >= 1);

    let view = manager.current_view();
    assert!(view.level(0).is_empty());
    assert_levels_disjoint(&view);
    assert_eq!(contents(&view), before);
    // key00012 was last written by the segment with seq 3
    assert_eq!(&view.get(b"key00012").unwrap().unwrap().value.as_bytes().unwrap()[..], b"v3");
    // Inputs are gone from disk once nothing references them
    assert_eq!(segment_files(temp.path()), view.segment_count());
}

#[test]
fn test_outputs_split_at_target_size() {
    let options = Options::builder()
        .target_segment_size(2 * 1024)
        .level0_compaction_trigger(2)
        .level1_size_budget(u64::MAX / 2)
        .background_work(false)
        .build();
    let (_temp, manager, compactor) = setup(&options);
    add_segment(&manager, 0, &puts(0..300, 1));
    add_segment(&manager, 0, &puts(150..450, 2));

    let task = manager.pick_compaction_candidate().unwrap();
    let stats = compactor.run(&task).unwrap();

    let view = manager.current_view();
    assert!(stats.output_segments > 1);
    assert_eq!(stats.records_written, 450);
    assert_eq!(view.level(1).len(), stats.output_segments);
    assert_levels_disjoint(&view);
    let total: u64 = view.level(1).iter().map(|s| s.record_count()).sum();
    assert_eq!(total, 450);
}

#[test]
fn test_compaction_is_idempotent() {
    let (_temp, manager, compactor) = setup(&small_options());
    for seq in 1..=4 {
        add_segment(&manager, 0, &puts(0..50, seq));
    }
    compactor.compact_all().unwrap();
    let once = contents(&manager.current_view());

    assert_eq!(compactor.compact_all().unwrap(), 0);
    assert_eq!(contents(&manager.current_view()), once);
}

// =============================================================================
// Tombstones
// =============================================================================

#[test]
fn test_tombstones_dropped_when_nothing_below() {
    let (_temp, manager, compactor) = setup(&small_options());
    add_segment(&manager, 0, &puts(0..10, 1));
    add_segment(&manager, 0, &[Record::tombstone("key00003", 2)]);
    add_segment(&manager, 0, &[Record::tombstone("key00004", 3)]);
    add_segment(&manager, 0, &puts(20..25, 4));

    let task = manager.pick_compaction_candidate().unwrap();
    let stats = compactor.run(&task).unwrap();

    assert_eq!(stats.tombstones_dropped, 2);
    let view = manager.current_view();
    assert!(view.get(b"key00003").unwrap().is_none());
    assert!(view.get(b"key00004").unwrap().is_none());
    assert!(view.get(b"key00005").unwrap().is_some());
}

#[test]
fn test_tombstones_kept_when_older_data_below() {
    let (_temp, manager, compactor) = setup(&small_options());
    // Older value for key00003 two levels down
    add_segment(&manager, 2, &puts(0..5, 1));
    add_segment(&manager, 0, &[Record::tombstone("key00003", 2)]);
    for seq in 3..=5 {
        add_segment(&manager, 0, &puts(10..12, seq));
    }

    let task = manager.pick_compaction_candidate().unwrap();
    let stats = compactor.run(&task).unwrap();
    assert_eq!(stats.tombstones_dropped, 0);

    let view = manager.current_view();
    let record = view.get(b"key00003").unwrap().unwrap();
    assert!(record.is_tombstone());
    assert_eq!(view.level(1).len(), 1);
}

// =============================================================================
// Crash Safety
// =============================================================================

#[test]
fn test_crash_between_build_and_install() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let options = small_options();
    let before = {
        let manager = Arc::new(SegmentManager::open(temp.path(), &options).unwrap());
        let compactor = Compactor::new(Arc::clone(&manager));
        for seq in 1..=4 {
            add_segment(&manager, 0, &puts(0..30, seq));
        }
        let before = contents(&manager.current_view());

        let task = manager.pick_compaction_candidate().unwrap();
        let (outputs, _) = compactor.build_outputs(&task).unwrap();
        assert!(!outputs.is_empty());
        assert_eq!(segment_files(temp.path()), 4 + outputs.len());
        // Simulated crash: outputs are durable but never installed
        before
    };

    let manager = SegmentManager::open(temp.path(), &options).unwrap();
    let view = manager.current_view();
    assert_eq!(view.level(0).len(), 4);
    assert!(view.level(1).is_empty());
    assert_eq!(segment_files(temp.path()), 4);
    assert_eq!(contents(&view), before);
}

#[test]
fn test_install_after_inputs_changed_fails_cleanly() {
    let (temp, manager, compactor) = setup(&small_options());
    for seq in 1..=4 {
        add_segment(&manager, 0, &puts(0..20, seq));
    }
    let task = manager.pick_compaction_candidate().unwrap();
    let (first, _) = compactor.build_outputs(&task).unwrap();
    compactor.install(&task, first).unwrap();

    // Same task again: its inputs are no longer live
    let (second, _) = compactor.build_outputs(&task).unwrap();
    assert!(compactor.install(&task, second).is_err());

    let view = manager.current_view();
    assert_eq!(view.level(1).len(), 1);
    drop(task);
    assert_eq!(segment_files(temp.path()), view.segment_count());
    assert_eq!(view.overlapping(1, &KeyRange::all()).len(), 1);
}
