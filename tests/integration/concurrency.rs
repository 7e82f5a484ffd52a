//! Integration test: concurrent writers.
//!
//! Edits based on the same version leave the entity with several leaves
//! until a merge commit reconciles them; writers from different sessions
//! replace the leaf set instead.

use std::sync::Arc;
use std::time::Duration;

use trove_integration_tests::{Account, TestNode, TestUser, init_tracing, test_partition};
use trove_repo::{DataMaintenance, start_maintenance};
use trove_types::Entity;

/// Two edits of `base` flushed one after the other by the same session.
fn diverge(user: &TestUser, base: &Entity, left: &Account, right: &Account) {
    for record in [left, right] {
        let mut edit = base.clone();
        edit.set(record).unwrap();
        user.save(&edit).unwrap();
    }
}

#[test]
fn test_concurrent_edits_read_merged_until_committed() {
    let node = TestNode::in_memory();
    let alice = node.user(1);
    let p = test_partition();

    let account = alice.claim_account("alice");
    let base: Account = account.get().unwrap();
    let left = Account {
        tags: vec!["work".into()],
        ..base.clone()
    };
    let right = Account {
        email: "alice@corp.test".into(),
        ..base.clone()
    };
    diverge(&alice, &account, &left, &right);
    assert!(node.requires_merge(&account.id));

    // Readers see both edits before anything is committed.
    let merged = alice.read(&account).unwrap();
    let value: Account = merged.get().unwrap();
    assert_eq!(value.tags, vec!["work".to_string()]);
    assert_eq!(value.email, "alice@corp.test");
    assert_eq!(merged.merges.len(), 2);
    assert_eq!(merged.previous_version, None);

    // A merge commit collapses the leaves without changing the value.
    assert!(alice.repo.merge_if_required(&p, &account.id).unwrap());
    assert!(!node.requires_merge(&account.id));
    let committed = alice.read(&account).unwrap();
    assert_eq!(committed.get::<Account>().unwrap(), value);
    assert!(committed.merges.is_empty());
    assert_eq!(alice.repo.read_history(&p, &account.id).unwrap().len(), 4);

    assert!(!alice.repo.merge_if_required(&p, &account.id).unwrap());
}

#[test]
fn test_maintenance_without_write_role_skips_entity() {
    let node = TestNode::in_memory();
    let alice = node.user(1);
    let account = alice.claim_account("alice");
    let base: Account = account.get().unwrap();
    diverge(
        &alice,
        &account,
        &Account {
            name: "alice a.".into(),
            ..base.clone()
        },
        &Account {
            tags: vec!["x".into()],
            ..base
        },
    );

    let report = DataMaintenance::new(Arc::new(node.anonymous())).run_once();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.merged, 0);
    assert_eq!(report.failed, 0);
    assert!(node.requires_merge(&account.id));
}

#[test]
fn test_later_session_replaces_leaf_set() {
    let node = TestNode::in_memory();
    let laptop = node.user(1);
    let phone = node.user(1);

    let account = laptop.claim_account("alice");
    let base: Account = account.get().unwrap();

    let mut from_laptop = account.clone();
    from_laptop
        .set(&Account {
            email: "laptop@example.test".into(),
            ..base.clone()
        })
        .unwrap();
    laptop.save(&from_laptop).unwrap();

    let mut from_phone = account.clone();
    from_phone
        .set(&Account {
            name: "alice (phone)".into(),
            ..base.clone()
        })
        .unwrap();
    phone.save(&from_phone).unwrap();

    // Each session seals payloads in its own castle, so the phone's write
    // starts a new leaf set rather than diverging.
    assert!(!node.requires_merge(&account.id));
    let current: Account = laptop.read(&account).unwrap().get().unwrap();
    assert_eq!(current.name, "alice (phone)");
    assert_eq!(current.email, base.email);
}

#[test]
fn test_parallel_sessions_flush_independently() {
    let node = TestNode::in_memory();
    let p = test_partition();

    let ids: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (1..=6u8)
            .map(|seed| {
                let node = &node;
                s.spawn(move || {
                    let user = node.user(seed);
                    (0..5)
                        .map(|i| user.claim_account(&format!("user{seed}-{i}")).id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    assert_eq!(ids.len(), 30);
    let anonymous = node.anonymous();
    let accounts = anonymous.read_all(&p, Some("Account")).unwrap();
    assert_eq!(accounts.len(), 30);
    for id in &ids {
        assert!(anonymous.exists(&p, id).unwrap());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_background_maintenance_merges_for_the_owner() {
    init_tracing();
    let node = TestNode::in_memory();
    let alice = node.user(1);
    let account = alice.claim_account("alice");
    let base: Account = account.get().unwrap();
    diverge(
        &alice,
        &account,
        &Account {
            tags: vec!["a".into()],
            ..base.clone()
        },
        &Account {
            tags: vec!["b".into()],
            ..base
        },
    );
    assert!(node.requires_merge(&account.id));

    // Maintenance runs in its own session with alice's rights.
    let repo = Arc::new(node.repo(alice.repo.rights().clone()));
    let handle = start_maintenance(repo);

    let mut merged = false;
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if !node.requires_merge(&account.id) {
            merged = true;
            break;
        }
    }
    assert!(merged, "maintenance did not merge in time");

    let tags = alice.read(&account).unwrap().get::<Account>().unwrap().tags;
    assert_eq!(tags.len(), 2);
    assert!(tags.contains(&"a".to_string()));
    assert!(tags.contains(&"b".to_string()));

    tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .expect("maintenance did not stop");
}
