//! Integration test: ownership and visibility.
//!
//! Several users share one node. Each claims an account, builds a tree of
//! folders and notes under it and decides who may read and write them.

use trove_integration_tests::{Account, Folder, Note, TestNode, test_partition};
use trove_repo::RepoError;
use trove_types::{Entity, Record};

#[test]
fn test_account_tree_is_public_and_owned() {
    let node = TestNode::in_memory();
    let alice = node.user(1);
    let bob = node.user(2);
    let p = test_partition();

    let account = alice.claim_account("alice");
    let folder = alice
        .create(&account, &Folder { title: "journal".into() })
        .unwrap();
    let note = alice.create(&folder, &Note { text: "day one".into() }).unwrap();

    // Everyone can read the public tree.
    let anonymous = node.anonymous();
    let read: Note = anonymous.read_record(&p, &note.id).unwrap();
    assert_eq!(read.text, "day one");
    let notes = bob.repo.read_all(&p, Some(Note::TYPE_NAME)).unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].parent_id, Some(folder.id));

    // Nobody but alice can change it.
    let mut edited = bob.read(&note).unwrap();
    edited.body["text"] = "defaced".into();
    let mut tx = bob.tx();
    let err = bob.repo.write(&mut tx, &edited).unwrap_err();
    assert!(matches!(err, RepoError::NoWriteRole { id, .. } if id == note.id));

    let err = bob
        .create(&folder, &Note { text: "squatting".into() })
        .unwrap_err();
    assert!(matches!(err, RepoError::NoWriteRole { .. }));

    edited.body["text"] = "day one, edited".into();
    let saved = alice.save(&edited).unwrap();
    assert_eq!(saved.get::<Note>().unwrap().text, "day one, edited");
    assert_eq!(anonymous.read_history(&p, &note.id).unwrap().len(), 2);
}

#[test]
fn test_private_note_is_only_readable_by_its_reader() {
    let node = TestNode::in_memory();
    let alice = node.user(1);
    let bob = node.user(2);
    let p = test_partition();

    let account = alice.claim_account("alice");
    let secret = Entity::new(p.clone(), &Note { text: "pin 1234".into() })
        .unwrap()
        .with_parent(&account)
        .with_roles(alice.private_roles());
    let secret = alice.save(&secret).unwrap();

    assert_eq!(alice.read(&secret).unwrap().get::<Note>().unwrap().text, "pin 1234");
    assert!(matches!(bob.read(&secret), Err(RepoError::Unreadable(id)) if id == secret.id));
    assert_eq!(node.anonymous().read(&p, &secret.id).unwrap(), None);

    // Unreadable entities still exist and are skipped by listings.
    assert!(bob.repo.exists(&p, &secret.id).unwrap());
    assert!(bob.repo.read_all(&p, Some(Note::TYPE_NAME)).unwrap().is_empty());
}

#[test]
fn test_owner_grants_write_on_a_folder() {
    let node = TestNode::in_memory();
    let alice = node.user(1);
    let bob = node.user(2);
    let p = test_partition();

    let account = alice.claim_account("alice");
    let folder = alice.create(&account, &Folder { title: "shared".into() }).unwrap();
    assert!(bob.create(&folder, &Note { text: "hello".into() }).is_err());

    // Bob publishes his keys so alice can name him in a role.
    let mut tx = bob.tx();
    bob.repo.flush(&mut tx).unwrap();
    assert!(alice.repo.public_key(&p, &bob.write.hash()).unwrap().is_some());

    let mut shared = alice.read(&folder).unwrap();
    shared.roles.allow_write.insert(bob.write.hash());
    alice.save(&shared).unwrap();

    let perms = bob
        .repo
        .effective_permissions(&Entity::new(p.clone(), &Note { text: String::new() }).unwrap().with_parent(&folder))
        .unwrap();
    assert!(perms.write.contains(&bob.write.hash()));
    assert!(perms.write.contains(&alice.write.hash()));

    let note = bob.create(&folder, &Note { text: "hello".into() }).unwrap();
    assert_eq!(alice.read(&note).unwrap().get::<Note>().unwrap().text, "hello");

    // The grant stops at the folder: the account is still alice's alone.
    let mut renamed = bob.read(&account).unwrap();
    renamed.set(&Account {
        name: "bob".into(),
        email: String::new(),
        tags: Vec::new(),
    })
    .unwrap();
    let mut tx = bob.tx();
    assert!(matches!(
        bob.repo.write(&mut tx, &renamed),
        Err(RepoError::NoWriteRole { .. })
    ));
}

#[test]
fn test_deleted_entities_stay_in_history() {
    let node = TestNode::in_memory();
    let alice = node.user(1);
    let p = test_partition();

    let account = alice.claim_account("alice");
    let note = alice.create(&account, &Note { text: "temporary".into() }).unwrap();
    alice.delete(&note).unwrap();

    assert!(matches!(alice.read(&note), Err(RepoError::Deleted(id)) if id == note.id));
    assert!(!alice.repo.exists(&p, &note.id).unwrap());
    assert!(alice.repo.ever_existed(&p, &note.id).unwrap());

    let history = alice.repo.read_history(&p, &note.id).unwrap();
    assert_eq!(history.len(), 2);
    let first = alice
        .repo
        .read_version(&p, &note.id, history[0].offset)
        .unwrap()
        .unwrap();
    assert_eq!(first.get::<Note>().unwrap().text, "temporary");
    assert_eq!(alice.repo.read_version(&p, &note.id, history[1].offset).unwrap(), None);

    let never = Entity::new(p.clone(), &Note { text: String::new() }).unwrap();
    assert!(matches!(alice.read(&never), Err(RepoError::NotFound(_))));
}
