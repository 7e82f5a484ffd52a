use trove_types::EntityId;

use super::*;

fn folder(title: &str) -> Entity {
    Entity::new(test_partition(), &Folder { title: title.into() }).unwrap()
}

#[test]
fn test_write_is_staged_once() {
    let mut tx = DataTransaction::new();
    assert!(tx.is_empty());

    let inbox = folder("inbox");
    assert!(tx.write(inbox.clone()));
    let mut renamed = inbox.clone();
    renamed.body["title"] = "renamed".into();
    assert!(!tx.write(renamed));

    let p = test_partition();
    assert_eq!(tx.puts(&p).len(), 1);
    assert_eq!(tx.find(&p, &inbox.id), Some(&inbox));
    assert_eq!(tx.partitions(), vec![p]);
}

#[test]
fn test_delete_replaces_write_and_undo_drops_both() {
    let mut tx = DataTransaction::new();
    let p = test_partition();
    let inbox = folder("inbox");
    let archive = folder("archive");

    tx.write(inbox.clone());
    tx.write(archive.clone());
    assert!(tx.delete(inbox.clone()));
    assert!(!tx.delete(inbox.clone()));
    assert!(tx.find(&p, &inbox.id).is_none());
    assert_eq!(tx.deletes(&p).len(), 1);

    assert!(tx.undo(&p, &inbox.id));
    assert!(tx.deletes(&p).is_empty());
    assert!(!tx.undo(&p, &EntityId::random()));
    assert!(!tx.undo(&PartitionKey::new("elsewhere", 0), &archive.id));

    tx.clear();
    assert!(tx.is_empty());
    assert!(tx.partitions().is_empty());
}

#[test]
fn test_public_keys_and_cache() {
    let p = test_partition();
    let key = test_write_key(4);
    let mut tx = DataTransaction::new();
    tx.put_private_key(&p, &key);
    assert_eq!(tx.find_public_key(&p, &key.hash()), Some(&key.public_key()));
    assert!(tx.find_public_key(&PartitionKey::new("elsewhere", 0), &key.hash()).is_none());
    assert_eq!(tx.public_keys(&p).count(), 1);
    assert!(!tx.is_empty());

    let inbox = folder("inbox");
    tx.write(inbox.clone());
    tx.record_flushed(&p, vec![inbox.clone()]);
    assert!(tx.is_empty());
    assert_eq!(tx.cached(&p, &inbox.id), Some(&inbox));
    // Flushed keys remain visible.
    assert!(tx.find_public_key(&p, &key.hash()).is_some());

    let mut next = DataTransaction::new();
    assert!(next.cached(&p, &inbox.id).is_none());
    next.copy_cache_from(&tx);
    assert_eq!(next.cached(&p, &inbox.id), Some(&inbox));
    assert!(next.find_public_key(&p, &key.hash()).is_some());
    assert!(next.is_empty());
}
