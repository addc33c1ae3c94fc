use std::collections::BTreeMap;

use bytes::Bytes;
use logos::{Engine, Options};
use proptest::prelude::*;
use tempfile::TempDir;

#[derive(Debug, Clone)]
enum Op {
    Put { key: u8, value: u16 },
    Delete { key: u8 },
    Flush,
    Compact,
    Reopen,
}

const KEY_SPACE: u8 = 24;

fn options() -> Options {
    Options::builder()
        .memtable_size_threshold(512)
        .block_size(128)
        .target_segment_size(1024)
        .level0_compaction_trigger(2)
        .level1_size_budget(2 * 1024)
        .level_size_multiplier(2)
        .max_levels(4)
        .background_work(false)
        .build()
}

fn key_bytes(key: u8) -> Vec<u8> {
    format!("k{:02}", key % KEY_SPACE).into_bytes()
}

fn value_bytes(value: u16) -> Vec<u8> {
    format!("v{}", value).into_bytes()
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        8 => (any::<u8>(), any::<u16>()).prop_map(|(key, value)| Op::Put { key, value }),
        3 => any::<u8>().prop_map(|key| Op::Delete { key }),
        1 => Just(Op::Flush),
        1 => Just(Op::Compact),
        1 => Just(Op::Reopen),
    ]
}

fn check(engine: &Engine, model: &BTreeMap<Vec<u8>, Vec<u8>>) -> Result<(), TestCaseError> {
    for key in 0..KEY_SPACE {
        let key = key_bytes(key);
        let expected = model.get(&key).map(|v| Bytes::copy_from_slice(v));
        prop_assert_eq!(engine.get(&key).unwrap(), expected);
    }

    let scanned: Vec<(Bytes, Bytes)> = engine
        .scan(b"", b"\xff")
        .unwrap()
        .collect::<logos::Result<_>>()
        .unwrap();
    let expected: Vec<(Bytes, Bytes)> = model
        .iter()
        .map(|(k, v)| (Bytes::copy_from_slice(k), Bytes::copy_from_slice(v)))
        .collect();
    prop_assert_eq!(scanned, expected);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 32, ..ProptestConfig::default() })]

    #[test]
    fn engine_matches_model(ops in prop::collection::vec(op_strategy(), 1..200)) {
        let temp = TempDir::new().unwrap();
        let mut engine = Some(Engine::open(temp.path(), options()).unwrap());
        let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

        for op in &ops {
            let current = engine.as_ref().unwrap();
            match op {
                Op::Put { key, value } => {
                    current.put(&key_bytes(*key), &value_bytes(*value)).unwrap();
                    model.insert(key_bytes(*key), value_bytes(*value));
                }
                Op::Delete { key } => {
                    current.delete(&key_bytes(*key)).unwrap();
                    model.remove(&key_bytes(*key));
                }
                Op::Flush => current.flush().unwrap(),
                Op::Compact => {
                    current.compact().unwrap();
                }
                Op::Reopen => {
                    // Crash-style restart: no close, recovery relies on the WAL
                    drop(engine.take());
                    engine = Some(Engine::open(temp.path(), options()).unwrap());
                }
            }
        }

        let current = engine.as_ref().unwrap();
        check(current, &model)?;

        // Everything pushed down the levels must still read the same
        current.flush().unwrap();
        current.compact().unwrap();
        check(current, &model)?;

        let view = current.segment_manager().current_view();
        for level in 1..view.num_levels() {
            for pair in view.level(level).windows(2) {
                prop_assert!(pair[0].max_key() < pair[1].min_key());
            }
        }
    }
}
