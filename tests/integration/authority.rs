//! Integration test: implicit authorities.
//!
//! `Org` records have no parent. They are rooted by the domain named in
//! their header, and only the key that domain resolves to may create them.

use std::collections::BTreeSet;

use trove_bridge::StorageBackend;
use trove_chain::StaticAuthorities;
use trove_crypto::PrivateKey;
use trove_integration_tests::{Org, TestNode, TestUser, test_partition};
use trove_repo::RepoError;
use trove_types::Entity;

const REGISTRAR_SEED: u8 = 42;

fn node() -> TestNode {
    let registrar = PrivateKey::signing_from_seed(&[REGISTRAR_SEED; 32]);
    let authorities = StaticAuthorities::new().with("acme.test", registrar.public_key());
    TestNode::with_authorities(&StorageBackend::Memory, authorities)
}

fn org(owner: &TestUser, domains: &[&str]) -> Entity {
    let mut entity = Entity::new(test_partition(), &Org { name: "Acme".into() })
        .unwrap()
        .with_roles(owner.public_roles());
    entity.implicit_authority = domains.iter().map(|d| d.to_string()).collect::<BTreeSet<_>>();
    entity
}

#[test]
fn test_registrar_roots_org_under_its_domain() {
    let node = node();
    let registrar = node.user(REGISTRAR_SEED);
    let p = test_partition();

    let acme = registrar.save(&org(&registrar, &["Acme.Test."])).unwrap();
    assert_eq!(acme.implicit_authority, BTreeSet::from(["Acme.Test.".to_string()]));

    let anonymous = node.anonymous();
    assert_eq!(anonymous.read_record::<Org>(&p, &acme.id).unwrap().name, "Acme");
    let perms = anonymous.effective_permissions(&acme).unwrap();
    assert!(perms.existing);
    assert_eq!(perms.write, BTreeSet::from([registrar.write.hash()]));
}

#[test]
fn test_org_needs_a_resolvable_domain_and_its_key() {
    let node = node();
    let registrar = node.user(REGISTRAR_SEED);
    let alice = node.user(1);

    let cases = [
        (&registrar, org(&registrar, &[])),
        (&registrar, org(&registrar, &["nobody.test"])),
        (&alice, org(&alice, &["acme.test"])),
    ];
    for (user, entity) in cases {
        let mut tx = user.tx();
        let err = user.repo.write(&mut tx, &entity).unwrap_err();
        assert!(
            matches!(err, RepoError::NoWriteRole { id, .. } if id == entity.id),
            "unexpected {err}"
        );
    }
}

#[test]
fn test_registrar_delegates_org_to_a_member() {
    let node = node();
    let registrar = node.user(REGISTRAR_SEED);
    let alice = node.user(1);
    let p = test_partition();

    let acme = registrar.save(&org(&registrar, &["acme.test"])).unwrap();

    let mut tx = alice.tx();
    alice.repo.flush(&mut tx).unwrap();
    let mut delegated = acme.clone();
    delegated.roles.allow_write.insert(alice.write.hash());
    registrar.save(&delegated).unwrap();

    let mut renamed = alice.read(&acme).unwrap();
    renamed.set(&Org { name: "Acme Corp".into() }).unwrap();
    alice.save(&renamed).unwrap();
    assert_eq!(
        node.anonymous().read_record::<Org>(&p, &acme.id).unwrap().name,
        "Acme Corp"
    );
    assert_eq!(alice.repo.read_history(&p, &acme.id).unwrap().len(), 3);
}
