use trove_types::PartitionKey;

use super::test_partition;
use crate::error::BridgeError;
use crate::store::LogStore;

fn exercise(store: &LogStore) {
    let p = test_partition();
    assert_eq!(store.next_offset(&p).unwrap(), 0);
    assert!(store.read(&p, 0).unwrap().is_none());

    for n in 0..5u8 {
        let offset = store.append(&p, &format!("key-{n}"), 100 + n as u64, vec![n; 3]).unwrap();
        assert_eq!(offset, n as u64);
    }
    assert_eq!(store.next_offset(&p).unwrap(), 5);

    let third = store.read(&p, 2).unwrap().unwrap();
    assert_eq!(third.key, "key-2");
    assert_eq!(third.timestamp_ms, 102);
    assert_eq!(third.payload, vec![2; 3]);

    let tail: Vec<u64> = store.scan(&p, 3).unwrap().iter().map(|r| r.offset).collect();
    assert_eq!(tail, vec![3, 4]);
    assert_eq!(store.scan(&p, 0).unwrap().len(), 5);
}

#[test]
fn test_memory_store() {
    let store = LogStore::in_memory();
    assert!(!store.is_persistent());
    exercise(&store);
}

#[test]
fn test_fjall_store() {
    let store = LogStore::open_temporary().unwrap();
    assert!(store.is_persistent());
    exercise(&store);
}

#[test]
fn test_partitions_do_not_overlap() {
    for store in [LogStore::in_memory(), LogStore::open_temporary().unwrap()] {
        let short = PartitionKey::new("t", 1);
        let long = PartitionKey::new("t", 10);
        store.append(&short, "a", 0, vec![1]).unwrap();
        store.append(&long, "b", 0, vec![2]).unwrap();
        store.append(&long, "c", 0, vec![3]).unwrap();

        assert_eq!(store.scan(&short, 0).unwrap().len(), 1);
        assert_eq!(store.scan(&long, 0).unwrap().len(), 2);
        assert_eq!(store.next_offset(&short).unwrap(), 1);

        let mut known = store.partitions().unwrap();
        known.sort();
        assert_eq!(known, vec![short, long]);
    }
}

#[test]
fn test_over_long_topic_is_refused() {
    let topic = "t".repeat(PartitionKey::MAX_TOPIC_LEN + 1);
    for store in [LogStore::in_memory(), LogStore::open_temporary().unwrap()] {
        let p = PartitionKey::new(topic.clone(), 0);
        let err = store.append(&p, "a", 0, vec![1]).unwrap_err();
        assert!(matches!(err, BridgeError::Wire(_)), "unexpected {err}");
        assert!(store.partitions().unwrap().is_empty());
    }
}

#[test]
fn test_fjall_log_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let p = test_partition();
    {
        let store = LogStore::open(dir.path()).unwrap();
        store.append(&p, "a", 1, b"first".to_vec()).unwrap();
        store.append(&p, "b", 2, b"second".to_vec()).unwrap();
    }

    let store = LogStore::open(dir.path()).unwrap();
    assert_eq!(store.next_offset(&p).unwrap(), 2);
    assert_eq!(store.append(&p, "c", 3, b"third".to_vec()).unwrap(), 2);
    let keys: Vec<String> = store.scan(&p, 0).unwrap().into_iter().map(|r| r.key).collect();
    assert_eq!(keys, vec!["a", "b", "c"]);
}
