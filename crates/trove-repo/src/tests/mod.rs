//! Tests for the trove-repo crate.

mod transaction_tests;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use trove_bridge::{DataSubscriber, StorageBackend};
use trove_chain::{ChainContext, StaticAuthorities};
use trove_crypto::{DalekCrypto, PrivateKey, trust_of_public_read};
use trove_types::{Entity, KeyHash, ParentPolicyTable, PartitionKey, Record, Roles};

use crate::config::RepoConfig;
use crate::repository::DataRepository;
use crate::rights::Rights;
use crate::transaction::DataTransaction;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    name: String,
    email: String,
    plan: String,
}

impl Record for Profile {
    const TYPE_NAME: &'static str = "Profile";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Folder {
    title: String,
}

impl Record for Folder {
    const TYPE_NAME: &'static str = "Folder";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Doc {
    text: String,
}

impl Record for Doc {
    const TYPE_NAME: &'static str = "Doc";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Tenant {
    domain: String,
}

impl Record for Tenant {
    const TYPE_NAME: &'static str = "Tenant";
}

fn test_write_key(seed: u8) -> PrivateKey {
    PrivateKey::signing_from_seed(&[seed; 32]).with_alias(format!("writer-{seed}"))
}

fn test_read_key(seed: u8) -> PrivateKey {
    PrivateKey::encryption_from_seed(&[seed; 32]).with_alias(format!("reader-{seed}"))
}

fn test_partition() -> PartitionKey {
    PartitionKey::new("repo-tests", 0)
}

/// Profile (claimable) ← Folder ← Doc; Tenant rooted at example.org.
fn test_policy() -> ParentPolicyTable {
    ParentPolicyTable::new()
        .claimable("Profile")
        .allow_parent("Folder", "Profile")
        .allow_parent("Doc", "Folder")
        .implicit_authority("Tenant", "example.org")
}

/// Route crate logs to the test output; safe to call from every test.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("trove_repo=debug,trove_chain=debug")
        .try_init();
}

fn test_config() -> RepoConfig {
    RepoConfig {
        sync_timeout_ms: 5_000,
        maintenance_min_sleep_ms: 10,
        maintenance_max_sleep_ms: 20,
        ..RepoConfig::default()
    }
}

fn test_subscriber_with(authorities: StaticAuthorities) -> Arc<DataSubscriber> {
    let ctx = ChainContext::new(
        Arc::new(test_policy()),
        Arc::new(DalekCrypto::new()),
        Arc::new(authorities),
    )
    .with_config(test_config().chain_config());
    Arc::new(DataSubscriber::open(&StorageBackend::Memory, ctx).unwrap())
}

fn test_subscriber() -> Arc<DataSubscriber> {
    test_subscriber_with(StaticAuthorities::new())
}

fn test_repo(subscriber: &Arc<DataSubscriber>, rights: Rights) -> DataRepository {
    DataRepository::new(Arc::clone(subscriber), rights, test_config())
}

fn hashes(keys: &[&PrivateKey]) -> BTreeSet<KeyHash> {
    keys.iter().map(|k| k.hash()).collect()
}

/// Roles readable by everyone and writable by `writers`.
fn public_roles(writers: &[&PrivateKey]) -> Roles {
    Roles {
        allow_read: BTreeSet::from([trust_of_public_read().hash()]),
        allow_write: hashes(writers),
        ..Roles::default()
    }
}

/// Profile readable by everyone and writable by `owner`.
fn public_profile(name: &str, owner: &PrivateKey) -> Entity {
    let profile = Profile {
        name: name.to_string(),
        email: String::new(),
        plan: "free".to_string(),
    };
    Entity::new(test_partition(), &profile)
        .unwrap()
        .with_roles(public_roles(&[owner]))
}

/// Write, publish `owner`'s key and flush a public profile; return it as read back.
fn claim_profile(repo: &DataRepository, name: &str, owner: &PrivateKey) -> Entity {
    let mut tx = DataTransaction::new();
    tx.put_private_key(&test_partition(), owner);
    let profile = public_profile(name, owner);
    assert!(repo.write(&mut tx, &profile).unwrap());
    repo.flush(&mut tx).unwrap();
    repo.read_or_err(&test_partition(), &profile.id).unwrap()
}
