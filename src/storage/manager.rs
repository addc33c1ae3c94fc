//! Segment Manager
//!
//! Owns the live segment set and its manifest.
//!
//! ## Responsibilities
//! - Load the manifest and open every listed segment on startup
//! - Delete leftovers of interrupted flushes and compactions
//! - Register flushed segments and swap compaction inputs for outputs
//! - Hand readers an immutable [`LevelView`] snapshot
//!
//! ## Concurrency:
//! - `view`: `RwLock<Arc<LevelView>>`, held only long enough to clone or swap the `Arc`
//! - `manifest`: Mutex; every mutation holds it, so edits and view swaps happen in the same order
//! - `next_segment_id`: Atomic counter (lock-free)

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::compaction::CompactionTask;
use crate::config::Options;
use crate::error::{LogosError, Result};

use super::manifest::{AddSegment, DeleteSegment, Manifest, VersionEdit};
use super::segment::Segment;
use super::view::LevelView;

pub const SEGMENT_DIR: &str = "segments";

pub struct SegmentManager {
    /// `{data_dir}/segments`
    segment_dir: PathBuf,
    options: Options,
    view: RwLock<Arc<LevelView>>,
    manifest: Mutex<Manifest>,
    next_segment_id: AtomicU64,
    log_number: AtomicU64,
    last_sequence: AtomicU64,
}

impl SegmentManager {
    /// Open or create the segment set under `data_dir`
    ///
    /// On startup:
    /// 1. Replay the manifest
    /// 2. Open every listed segment (missing or damaged files are `Corruption`)
    /// 3. Delete segment files the manifest does not list, and `*.tmp` files
    pub fn open(data_dir: &Path, options: &Options) -> Result<Self> {
        let segment_dir = data_dir.join(SEGMENT_DIR);
        fs::create_dir_all(&segment_dir)?;
        let (manifest, state) = Manifest::open(data_dir)?;

        let mut segments = Vec::with_capacity(state.segments.len());
        for (id, meta) in &state.segments {
            if meta.level as usize >= options.max_levels {
                return Err(LogosError::Config(format!(
                    "segment {} lives on level {} but max_levels is {}",
                    id, meta.level, options.max_levels
                )));
            }
            let path = segment_path(&segment_dir, *id, meta.level);
            if !path.exists() {
                return Err(LogosError::corruption(format!(
                    "manifest lists missing segment {}",
                    path.display()
                )));
            }
            let segment = Segment::open_file(*id, &path)?;
            if segment.meta() != meta {
                return Err(LogosError::corruption(format!(
                    "segment {} does not match its manifest entry",
                    id
                )));
            }
            segments.push(Arc::new(segment));
        }

        let removed = remove_orphans(&segment_dir, |id| state.segments.contains_key(&id))?;
        if removed > 0 {
            info!(removed, "deleted orphaned segment files");
        }

        let view = LevelView::from_segments(options.max_levels, segments);
        info!(
            segments = view.segment_count(),
            log_number = state.log_number,
            last_sequence = state.last_sequence,
            "opened segment manager"
        );

        Ok(Self {
            segment_dir,
            options: options.clone(),
            view: RwLock::new(Arc::new(view)),
            manifest: Mutex::new(manifest),
            next_segment_id: AtomicU64::new(state.next_segment_id.max(1)),
            log_number: AtomicU64::new(state.log_number),
            last_sequence: AtomicU64::new(state.last_sequence),
        })
    }

    /// Snapshot of the live segments; cheap, never blocks on I/O
    pub fn current_view(&self) -> Arc<LevelView> {
        Arc::clone(&self.view.read())
    }

    /// Add a segment at the level recorded in its metadata
    pub fn register(&self, segment: Arc<Segment>) -> Result<()> {
        self.apply(Vec::new(), vec![segment], None, None)
    }

    /// Add a flushed level-0 segment and advance the WAL flush point
    pub fn register_flush(
        &self,
        segment: Arc<Segment>,
        log_number: u64,
        last_sequence: u64,
    ) -> Result<()> {
        self.apply(Vec::new(), vec![segment], Some(log_number), Some(last_sequence))
    }

    /// Atomically swap compaction inputs for outputs.
    ///
    /// Inputs are marked obsolete; their files go away once the last reader
    /// drops its reference.
    pub fn replace(&self, old: &[Arc<Segment>], new: Vec<Arc<Segment>>) -> Result<()> {
        self.apply(old.to_vec(), new, None, None)
    }

    fn apply(
        &self,
        removed: Vec<Arc<Segment>>,
        added: Vec<Arc<Segment>>,
        log_number: Option<u64>,
        last_sequence: Option<u64>,
    ) -> Result<()> {
        let mut manifest = self.manifest.lock();
        let current = self.current_view();

        if let Some(deep) = added
            .iter()
            .find(|s| s.level() as usize >= current.num_levels())
        {
            return Err(LogosError::InvalidInput(format!(
                "segment {} targets level {} but only {} levels exist",
                deep.id(),
                deep.level(),
                current.num_levels()
            )));
        }
        if let Some(missing) = removed.iter().find(|s| !current.contains(s.id())) {
            return Err(LogosError::InvalidInput(format!(
                "segment {} is no longer live",
                missing.id()
            )));
        }

        let edit = VersionEdit {
            adds: added
                .iter()
                .map(|s| AddSegment {
                    id: s.id(),
                    meta: s.meta().clone(),
                })
                .collect(),
            deletes: removed
                .iter()
                .map(|s| DeleteSegment {
                    id: s.id(),
                    level: s.level(),
                })
                .collect(),
            log_number,
            last_sequence,
            next_segment_id: Some(self.next_segment_id.load(Ordering::SeqCst)),
        };
        manifest.append(&edit)?;

        let removed_ids: Vec<u64> = removed.iter().map(|s| s.id()).collect();
        let next = current.with_changes(&removed_ids, &added);
        *self.view.write() = Arc::new(next);

        if let Some(log_number) = log_number {
            self.log_number.fetch_max(log_number, Ordering::SeqCst);
        }
        if let Some(seq) = last_sequence {
            self.last_sequence.fetch_max(seq, Ordering::SeqCst);
        }
        for segment in &removed {
            segment.mark_obsolete();
        }
        debug!(
            added = ?added.iter().map(|s| s.id()).collect::<Vec<_>>(),
            removed = ?removed_ids,
            "installed version edit"
        );
        Ok(())
    }

    /// Next compaction according to the configured policy
    pub fn pick_compaction_candidate(&self) -> Option<CompactionTask> {
        let view = self.current_view();
        self.options.compaction_policy.pick(&view, &self.options)
    }

    pub fn allocate_segment_id(&self) -> u64 {
        self.next_segment_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn segment_path(&self, id: u64, level: u32) -> PathBuf {
        segment_path(&self.segment_dir, id, level)
    }

    pub fn segment_dir(&self) -> &Path {
        &self.segment_dir
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Total bytes per level
    pub fn level_sizes(&self) -> Vec<u64> {
        let view = self.current_view();
        (0..view.num_levels()).map(|l| view.level_bytes(l)).collect()
    }

    pub fn segment_count(&self) -> usize {
        self.current_view().segment_count()
    }

    /// WAL files below this id are reflected in segments
    pub fn log_number(&self) -> u64 {
        self.log_number.load(Ordering::SeqCst)
    }

    /// Highest sequence number durably stored in segments
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::SeqCst)
    }
}

/// `{dir}/segment_{id:06}_L{level}.seg`
pub fn segment_path(dir: &Path, id: u64, level: u32) -> PathBuf {
    dir.join(format!("segment_{:06}_L{}.seg", id, level))
}

/// "segment_000042_L1.seg" → Some(42)
fn parse_segment_id(path: &Path) -> Option<u64> {
    if path.extension()? != "seg" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let rest = stem.strip_prefix("segment_")?;
    let (id, level) = rest.split_once("_L")?;
    level.parse::<u32>().ok()?;
    id.parse().ok()
}

fn remove_orphans(dir: &Path, is_live: impl Fn(u64) -> bool) -> Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let orphan = if path.extension().map_or(false, |ext| ext == "tmp") {
            true
        } else {
            match parse_segment_id(&path) {
                Some(id) => !is_live(id),
                None => false,
            }
        };
        if orphan {
            warn!(path = %path.display(), "removing orphaned segment file");
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    if removed > 0 {
        crate::wal::sync_dir(dir)?;
    }
    Ok(removed)
}
