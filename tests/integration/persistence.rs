//! Integration test: durable logs.
//!
//! Partition logs outlive the node that wrote them. Reopening a fjall
//! directory, or opening a second node over the same store, replays the
//! log through the chain of trust and yields the same entities.

use trove_integration_tests::{Folder, Note, TestNode, test_partition};
use trove_repo::RepoError;
use trove_types::{Entity, Message, VersionId};

#[test]
fn test_restarted_node_replays_entities() {
    let dir = tempfile::tempdir().unwrap();
    let p = test_partition();

    let (account, folder, secret, history) = {
        let node = TestNode::on_disk(dir.path());
        let alice = node.user(1);
        let account = alice.claim_account("alice");
        let folder = alice.create(&account, &Folder { title: "inbox".into() }).unwrap();
        let secret = Entity::new(p.clone(), &Note { text: "only me".into() })
            .unwrap()
            .with_parent(&folder)
            .with_roles(alice.private_roles());
        let secret = alice.save(&secret).unwrap();

        let mut renamed = folder.clone();
        renamed.set(&Folder { title: "archive".into() }).unwrap();
        let folder = alice.save(&renamed).unwrap();
        let history = alice.repo.read_history(&p, &folder.id).unwrap();
        (account, folder, secret, history)
    };

    let node = TestNode::on_disk(dir.path());
    let alice = node.user(1);
    assert_eq!(alice.read(&account).unwrap().body, account.body);
    let reopened = alice.read(&folder).unwrap();
    assert_eq!(reopened.get::<Folder>().unwrap().title, "archive");
    assert_eq!(reopened.version, folder.version);
    assert_eq!(alice.repo.read_history(&p, &folder.id).unwrap(), history);
    assert_eq!(alice.read(&secret).unwrap().get::<Note>().unwrap().text, "only me");

    // Roles survive too: the secret is still sealed for everyone else.
    let bob = node.user(2);
    assert!(matches!(bob.read(&secret), Err(RepoError::Unreadable(_))));

    // The restarted node keeps accepting writes on top of the replayed log.
    let note = alice.create(&folder, &Note { text: "after restart".into() }).unwrap();
    assert_eq!(node.anonymous().read_record::<Note>(&p, &note.id).unwrap().text, "after restart");
}

#[test]
fn test_second_node_replays_shared_store() {
    let first = TestNode::in_memory();
    let alice = first.user(1);
    let account = alice.claim_account("alice");
    let note = alice.create(&account, &Note { text: "shared".into() }).unwrap();

    let second = TestNode::sharing(first.store());
    let p = test_partition();
    let anonymous = second.anonymous();
    assert_eq!(anonymous.read_record::<Note>(&p, &note.id).unwrap().text, "shared");
    assert_eq!(anonymous.read_all(&p, None).unwrap().len(), 2);
    assert!(anonymous.public_key(&p, &alice.write.hash()).unwrap().is_some());
}

#[test]
fn test_tampered_record_is_dropped_on_replay() {
    let first = TestNode::in_memory();
    let alice = first.user(1);
    let mallory = first.user(9);
    let account = alice.claim_account("alice");
    let note = alice.create(&account, &Note { text: "original".into() }).unwrap();
    let p = test_partition();

    // Rewrite the note's last record so it hands write access to mallory.
    let store = first.store();
    let record = store
        .scan(&p, 0)
        .unwrap()
        .into_iter()
        .rev()
        .find(|r| r.key == note.id.to_string())
        .unwrap();
    let Message::Data(mut data) = Message::from_bytes(&record.payload).unwrap() else {
        panic!("expected a data record");
    };
    data.header.previous_version = Some(data.header.version);
    data.header.version = VersionId::random();
    data.header.allow_write.insert(mallory.write.hash());
    store
        .append(&p, &record.key, record.timestamp_ms + 1, Message::Data(data).to_bytes().unwrap())
        .unwrap();

    let second = TestNode::sharing(store);
    let reader = second.anonymous();
    assert_eq!(reader.read_history(&p, &note.id).unwrap().len(), 1);
    assert_eq!(reader.read_record::<Note>(&p, &note.id).unwrap().text, "original");

    let perms = reader.effective_permissions(&reader.read_or_err(&p, &note.id).unwrap()).unwrap();
    assert!(!perms.write.contains(&mallory.write.hash()));
}
