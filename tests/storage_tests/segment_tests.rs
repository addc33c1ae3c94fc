use std::ops::Bound;
use std::sync::Arc;

use bytes::Bytes;
use logos::record::{KeyRange, Record};
use logos::storage::{encode_segment, Segment, SegmentFileWriter};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn sample_records(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| {
            let key = format!("key{:05}", i);
            if i % 10 == 3 {
                Record::tombstone(key, i as u64 + 1)
            } else {
                Record::put(key, format!("value-{}", i), i as u64 + 1)
            }
        })
        .collect()
}

fn collect(iter: impl Iterator<Item = logos::Result<Record>>) -> Vec<Record> {
    iter.collect::<logos::Result<_>>().unwrap()
}

// =============================================================================
// Codec
// =============================================================================

#[test]
fn test_round_trip_preserves_records() {
    let input = sample_records(300);
    let segment = Arc::new(Segment::open(1, encode_segment(&input, 0, 512, 10).unwrap()).unwrap());

    assert_eq!(collect(segment.iter()), input);
    assert_eq!(segment.record_count(), 300);
    assert_eq!(segment.level(), 0);
}

#[test]
fn test_lookup_returns_tombstones() {
    let input = sample_records(50);
    let segment = Segment::open(1, encode_segment(&input, 0, 256, 10).unwrap()).unwrap();

    let record = segment.get(b"key00013").unwrap().unwrap();
    assert!(record.is_tombstone());
    assert_eq!(record.seq, 14);
}

#[test]
fn test_lookup_outside_key_range() {
    let input = sample_records(50);
    let segment = Segment::open(1, encode_segment(&input, 0, 256, 10).unwrap()).unwrap();

    assert!(!segment.might_contain(b"aaa"));
    assert!(!segment.might_contain(b"zzz"));
    assert_eq!(segment.get(b"aaa").unwrap(), None);
    assert_eq!(segment.get(b"zzz").unwrap(), None);
    assert_eq!(segment.get(b"key00010x").unwrap(), None);
}

#[test]
fn test_lookups_work_without_filter() {
    let input = sample_records(100);
    let segment = Segment::open(1, encode_segment(&input, 1, 256, 0).unwrap()).unwrap();

    assert!(!segment.filter().is_enabled());
    for record in &input {
        assert_eq!(segment.get(&record.key).unwrap().as_ref(), Some(record));
    }
}

#[test]
fn test_empty_segment() {
    let segment = Arc::new(Segment::open(1, encode_segment(&Vec::<Record>::new(), 0, 256, 10).unwrap()).unwrap());

    assert_eq!(segment.record_count(), 0);
    assert_eq!(segment.get(b"anything").unwrap(), None);
    assert!(collect(segment.iter()).is_empty());
}

#[test]
fn test_duplicate_keys_are_rejected() {
    let input = vec![Record::put("a", "1", 1), Record::put("a", "2", 2)];
    assert!(matches!(
        encode_segment(&input, 0, 256, 10),
        Err(logos::LogosError::Encoding(_))
    ));
}

// =============================================================================
// Range Iteration
// =============================================================================

#[test]
fn test_range_iterator_bounds() {
    let input = sample_records(200);
    let segment = Arc::new(Segment::open(1, encode_segment(&input, 0, 256, 10).unwrap()).unwrap());

    let inclusive = collect(segment.range_iter(KeyRange::inclusive("key00050", "key00059")));
    assert_eq!(inclusive, input[50..60].to_vec());

    let exclusive = KeyRange::new(
        Bound::Excluded(Bytes::from("key00050")),
        Bound::Excluded(Bytes::from("key00059")),
    );
    assert_eq!(collect(segment.range_iter(exclusive)), input[51..59].to_vec());

    let tail = KeyRange::new(Bound::Included(Bytes::from("key00195")), Bound::Unbounded);
    assert_eq!(collect(segment.range_iter(tail)), input[195..].to_vec());

    let between_keys = KeyRange::inclusive("key00010a", "key00010z");
    assert!(collect(segment.range_iter(between_keys)).is_empty());
}

#[test]
fn test_range_iterator_is_restartable() {
    let input = sample_records(40);
    let segment = Arc::new(Segment::open(1, encode_segment(&input, 0, 128, 10).unwrap()).unwrap());
    let range = KeyRange::inclusive("key00005", "key00030");

    let first = collect(segment.range_iter(range.clone()));
    let second = collect(segment.range_iter(range));
    assert_eq!(first, second);
    assert_eq!(first.len(), 26);
}

// =============================================================================
// Corruption
// =============================================================================

#[test]
fn test_bad_magic_is_corruption() {
    let mut data = encode_segment(&sample_records(10), 0, 256, 10).unwrap().to_vec();
    data[0] = b'X';
    assert!(Segment::open(1, Bytes::from(data)).unwrap_err().is_corruption());
}

#[test]
fn test_damaged_index_is_corruption() {
    let data = encode_segment(&sample_records(10), 0, 256, 10).unwrap();
    let mut raw = data.to_vec();
    // Last byte before the footer sits in the metadata section
    let idx = raw.len() - 29;
    raw[idx] ^= 0xFF;
    assert!(Segment::open(1, Bytes::from(raw)).unwrap_err().is_corruption());
}

#[test]
fn test_damaged_block_fails_on_read() {
    let input = sample_records(10);
    let mut raw = encode_segment(&input, 0, 4096, 10).unwrap().to_vec();
    // First entry's key, inside the only data block
    raw[8 + 16] ^= 0xFF;

    // Header, footer and sections are intact, so open succeeds
    let segment = Segment::open(1, Bytes::from(raw)).unwrap();
    let err = segment.get(b"key00001").unwrap_err();
    assert!(err.is_corruption());
}

// =============================================================================
// Files
// =============================================================================

#[test]
fn test_file_writer_produces_readable_segment() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("segment_000001_L0.seg");
    let input = sample_records(500);

    let mut writer = SegmentFileWriter::create(&path, 0, 512, 10).unwrap();
    for record in &input {
        writer.add(record).unwrap();
    }
    let meta = writer.finish().unwrap();
    assert_eq!(meta.record_count, 500);
    assert!(path.exists());
    assert!(!temp.path().join("segment_000001_L0.seg.tmp").exists());

    let segment = Arc::new(Segment::open_file(1, &path).unwrap());
    assert_eq!(segment.meta(), &meta);
    assert_eq!(segment.get(b"key00250").unwrap().as_ref(), Some(&input[250]));
    assert_eq!(collect(segment.iter()), input);
}

#[test]
fn test_concurrent_readers_share_one_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("segment_000005_L1.seg");
    let input = sample_records(2000);
    let mut writer = SegmentFileWriter::create(&path, 1, 256, 10).unwrap();
    for record in &input {
        writer.add(record).unwrap();
    }
    writer.finish().unwrap();

    let segment = Arc::new(Segment::open_file(5, &path).unwrap());
    let input = Arc::new(input);
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let segment = Arc::clone(&segment);
            let input = Arc::clone(&input);
            std::thread::spawn(move || {
                // Interleaved strides so threads hit different blocks at once
                for i in (t..input.len()).step_by(7) {
                    let expected = &input[i];
                    assert_eq!(segment.get(&expected.key).unwrap().as_ref(), Some(expected));
                }
                let range = KeyRange::inclusive(
                    format!("key{:05}", t * 100),
                    format!("key{:05}", t * 100 + 99),
                );
                assert_eq!(collect(segment.range_iter(range)), input[t * 100..t * 100 + 100].to_vec());
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_abandoned_writer_leaves_no_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("segment_000002_L0.seg");
    let mut writer = SegmentFileWriter::create(&path, 0, 512, 10).unwrap();
    writer.add(&Record::put("a", "1", 1)).unwrap();
    writer.abandon();

    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
}

#[test]
fn test_obsolete_segment_deleted_after_last_reference() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("segment_000003_L1.seg");
    let mut writer = SegmentFileWriter::create(&path, 1, 512, 10).unwrap();
    for record in sample_records(20) {
        writer.add(&record).unwrap();
    }
    writer.finish().unwrap();

    let segment = Arc::new(Segment::open_file(3, &path).unwrap());
    let mut reader = segment.iter();
    segment.mark_obsolete();
    drop(segment);

    // The iterator still holds a reference
    assert!(path.exists());
    assert!(reader.next().unwrap().is_ok());
    drop(reader);
    assert!(!path.exists());
}

#[test]
fn test_segment_kept_when_not_obsolete() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("segment_000004_L0.seg");
    let mut writer = SegmentFileWriter::create(&path, 0, 512, 10).unwrap();
    writer.add(&Record::put("a", "1", 1)).unwrap();
    writer.finish().unwrap();

    drop(Segment::open_file(4, &path).unwrap());
    assert!(path.exists());
}
