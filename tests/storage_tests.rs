//! Integration tests for the chunked byte storage engine

use assert_matches::assert_matches;
use proptest::prelude::*;

use chunkstore::{ElasticStorage, Error, Storage, StorageConfig};

fn storage() -> ElasticStorage<String> {
    ElasticStorage::new()
}

#[test]
fn test_round_trip_many_keys() {
    let s = storage();
    for i in 0..500 {
        let value: Vec<u8> = (0..i).map(|b| (b % 256) as u8).collect();
        s.create(format!("key-{i}"), value).unwrap();
    }
    for i in 0..500 {
        let expected: Vec<u8> = (0..i).map(|b| (b % 256) as u8).collect();
        assert_eq!(s.read(&format!("key-{i}")).unwrap(), expected);
    }
    assert_eq!(s.size(), 500);
}

#[test]
fn test_tombstone_invisibility() {
    let s = storage();
    s.create("gone".to_string(), vec![1, 2, 3]).unwrap();
    s.delete(&"gone".to_string()).unwrap();

    assert_matches!(s.read(&"gone".to_string()), Err(Error::NotFound { .. }));
    assert!(!s.key_set().contains("gone"));
    // The physical bytes are still there: the cursor has not moved back.
    assert!(s.stats().cursor > 0);
}

#[test]
fn test_purge_reclaims_tombstoned_space() {
    let s = storage();
    for i in 0..100 {
        s.create(format!("k{i}"), vec![i as u8; 1000]).unwrap();
    }
    let deleted: Vec<String> = (0..100).step_by(3).map(|i| format!("k{i}")).collect();
    for key in &deleted {
        s.delete(key).unwrap();
    }

    let live_before: u64 = s.stats().live_bytes;
    s.purge().unwrap();
    let after = s.stats();

    assert_eq!(after.live_bytes, live_before);
    assert_eq!(after.cursor, live_before);
    assert_eq!(s.size(), 100 - deleted.len());
    for i in 0..100 {
        let key = format!("k{i}");
        if deleted.contains(&key) {
            assert_matches!(s.read(&key), Err(Error::NotFound { .. }));
        } else {
            assert_eq!(s.read(&key).unwrap(), vec![i as u8; 1000]);
        }
    }
}

#[test]
fn test_invalid_chunk_capacity_rejected_at_construction() {
    let result = ElasticStorage::<String>::with_config(StorageConfig {
        chunk_capacity: 100,
        ..Default::default()
    });
    assert_matches!(result, Err(Error::InvalidCapacity { capacity: 100, .. }));
}

#[test]
fn test_values_larger_than_a_chunk() {
    let s = storage();
    let big: Vec<u8> = (0..20_000u32).map(|i| (i % 253) as u8).collect();
    s.create("big".to_string(), big.clone()).unwrap();

    assert_eq!(s.read(&"big".to_string()).unwrap(), big);
    assert!(s.stats().chunk_count >= 5);
}

#[test]
fn test_concurrent_writers_and_readers() {
    use std::sync::Arc;

    let s = Arc::new(storage());
    let writers: Vec<_> = (0..4)
        .map(|t| {
            let s = Arc::clone(&s);
            std::thread::spawn(move || {
                for i in 0..250 {
                    s.create(format!("w{t}-{i}"), vec![t as u8; 64]).unwrap();
                }
            })
        })
        .collect();
    for handle in writers {
        handle.join().unwrap();
    }

    assert_eq!(s.size(), 1000);
    let readers: Vec<_> = (0..4)
        .map(|t| {
            let s = Arc::clone(&s);
            std::thread::spawn(move || {
                for i in 0..250 {
                    assert_eq!(s.read(&format!("w{t}-{i}")).unwrap(), vec![t as u8; 64]);
                }
            })
        })
        .collect();
    for handle in readers {
        handle.join().unwrap();
    }
}

proptest! {
    #[test]
    fn prop_round_trip(value in proptest::collection::vec(any::<u8>(), 0..10_000)) {
        let s = storage();
        s.create("k".to_string(), value.clone()).unwrap();
        prop_assert_eq!(s.read(&"k".to_string()).unwrap(), value);
    }

    #[test]
    fn prop_purge_preserves_survivors(
        values in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 0..2000),
            1..30,
        ),
        delete_mask in proptest::collection::vec(any::<bool>(), 30),
    ) {
        let s = storage();
        for (i, value) in values.iter().enumerate() {
            s.create(format!("k{i}"), value.clone()).unwrap();
        }
        for (i, _) in values.iter().enumerate() {
            if delete_mask[i] {
                s.delete(&format!("k{i}")).unwrap();
            }
        }
        s.purge().unwrap();

        for (i, value) in values.iter().enumerate() {
            if delete_mask[i] {
                prop_assert!(
                    s.read(&format!("k{i}")).is_err(),
                    "deleted key k{} still readable",
                    i
                );
            } else {
                prop_assert_eq!(&s.read(&format!("k{i}")).unwrap(), value);
            }
        }
    }

    #[test]
    fn prop_boundary_crossing(pad in 0usize..5000, len in 0usize..9000) {
        let s = storage();
        if pad > 0 {
            s.create("pad".to_string(), vec![0xEE; pad]).unwrap();
        }
        let value: Vec<u8> = (0..len).map(|i| (i % 249) as u8).collect();
        s.create("v".to_string(), value.clone()).unwrap();
        prop_assert_eq!(s.read(&"v".to_string()).unwrap(), value);
    }
}
