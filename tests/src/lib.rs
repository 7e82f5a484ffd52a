//! Shared test harness for trove integration tests.
//!
//! Provides [`TestNode`] (one partition subscriber, in memory or on disk,
//! shared by several repositories) and [`TestUser`] (a repository bound to
//! one user's signing and encryption keys) so scenarios read like the
//! interactions of real users on a node.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use trove_bridge::{DataSubscriber, LogStore, StorageBackend};
use trove_chain::{ChainContext, StaticAuthorities};
use trove_crypto::{DalekCrypto, PrivateKey, trust_of_public_read};
use trove_repo::{DataRepository, DataTransaction, RepoConfig, RepoError, Rights};
use trove_types::{Entity, KeyHash, ParentPolicyTable, PartitionKey, Record, Roles};

// =========================================================================
// Records
// =========================================================================

/// Top-level entity anyone may claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    pub email: String,
    pub tags: Vec<String>,
}

impl Record for Account {
    const TYPE_NAME: &'static str = "Account";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub title: String,
}

impl Record for Folder {
    const TYPE_NAME: &'static str = "Folder";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub text: String,
}

impl Record for Note {
    const TYPE_NAME: &'static str = "Note";
}

/// Top-level entity rooted under the domain named in its header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Org {
    pub name: String,
}

impl Record for Org {
    const TYPE_NAME: &'static str = "Org";
}

/// Account (claimable) ← Folder ← Note, Note also under Account;
/// Org rooted by a dynamic implicit authority.
pub fn test_policy() -> ParentPolicyTable {
    ParentPolicyTable::new()
        .claimable("Account")
        .allow_parent("Folder", "Account")
        .allow_parent("Note", "Folder")
        .allow_parent("Note", "Account")
        .dynamic_implicit_authority("Org")
}

pub fn test_partition() -> PartitionKey {
    PartitionKey::new("accounts", 0)
}

pub fn test_config() -> RepoConfig {
    RepoConfig {
        sync_timeout_ms: 5_000,
        maintenance_min_sleep_ms: 10,
        maintenance_max_sleep_ms: 30,
        ..RepoConfig::default()
    }
}

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("trove=debug")
        .try_init();
}

// =========================================================================
// TestNode
// =========================================================================

/// One node: a partition subscriber shared by every repository opened on it.
pub struct TestNode {
    subscriber: Arc<DataSubscriber>,
}

impl TestNode {
    fn context(authorities: StaticAuthorities) -> ChainContext {
        ChainContext::new(
            Arc::new(test_policy()),
            Arc::new(DalekCrypto::new()),
            Arc::new(authorities),
        )
        .with_config(test_config().chain_config())
    }

    /// A node keeping its logs in memory.
    pub fn in_memory() -> Self {
        Self::with_authorities(&StorageBackend::Memory, StaticAuthorities::new())
    }

    /// A node keeping its logs in a fjall database under `dir`.
    pub fn on_disk(dir: &Path) -> Self {
        Self::with_authorities(&StorageBackend::Fjall(dir.to_path_buf()), StaticAuthorities::new())
    }

    pub fn with_authorities(backend: &StorageBackend, authorities: StaticAuthorities) -> Self {
        let subscriber = DataSubscriber::open(backend, Self::context(authorities))
            .expect("failed to open subscriber");
        Self {
            subscriber: Arc::new(subscriber),
        }
    }

    /// A second node replaying the logs already held by `store`.
    pub fn sharing(store: Arc<LogStore>) -> Self {
        Self {
            subscriber: Arc::new(DataSubscriber::with_store(
                store,
                Self::context(StaticAuthorities::new()),
            )),
        }
    }

    pub fn subscriber(&self) -> &Arc<DataSubscriber> {
        &self.subscriber
    }

    pub fn store(&self) -> Arc<LogStore> {
        Arc::clone(self.subscriber.store())
    }

    /// A repository with the given rights.
    pub fn repo(&self, rights: Rights) -> DataRepository {
        DataRepository::new(Arc::clone(&self.subscriber), rights, test_config())
    }

    /// A repository holding only the well-known public keys.
    pub fn anonymous(&self) -> DataRepository {
        self.repo(Rights::new())
    }

    /// User `seed` with a repository on this node.
    pub fn user(&self, seed: u8) -> TestUser {
        let write = PrivateKey::signing_from_seed(&[seed; 32]).with_alias(format!("user-{seed}"));
        let read =
            PrivateKey::encryption_from_seed(&[seed; 32]).with_alias(format!("user-{seed}-read"));
        let repo = self.repo(Rights::new().with_key(write.clone()).with_key(read.clone()));
        TestUser { write, read, repo }
    }

    /// Whether `id` currently has diverged leaves.
    pub fn requires_merge(&self, id: &trove_types::EntityId) -> bool {
        self.subscriber
            .partition(&test_partition())
            .expect("partition")
            .chain()
            .get_data(id)
            .is_some_and(|c| c.requires_merge())
    }
}

// =========================================================================
// TestUser
// =========================================================================

/// A user's keys and the repository acting with them.
pub struct TestUser {
    pub write: PrivateKey,
    pub read: PrivateKey,
    pub repo: DataRepository,
}

impl TestUser {
    /// A transaction that publishes this user's public keys.
    pub fn tx(&self) -> DataTransaction {
        let mut tx = DataTransaction::new();
        tx.put_private_key(&test_partition(), &self.write);
        tx.put_private_key(&test_partition(), &self.read);
        tx
    }

    /// Readable by everyone, writable by this user.
    pub fn public_roles(&self) -> Roles {
        Roles {
            allow_read: BTreeSet::from([trust_of_public_read().hash()]),
            allow_write: BTreeSet::from([self.write.hash()]),
            ..Roles::default()
        }
    }

    /// Readable only by this user; writes inherit from the parent.
    pub fn private_roles(&self) -> Roles {
        Roles {
            inherit_read: false,
            allow_read: BTreeSet::from([self.read.hash()]),
            ..Roles::default()
        }
    }

    /// Write and flush `entity` in one transaction, returning it as read back.
    pub fn save(&self, entity: &Entity) -> Result<Entity, RepoError> {
        let mut tx = self.tx();
        self.repo.write(&mut tx, entity)?;
        self.repo.flush(&mut tx)?;
        self.repo.read_or_err(&test_partition(), &entity.id)
    }

    /// Claim a public account owned by this user.
    pub fn claim_account(&self, name: &str) -> Entity {
        let account = Account {
            name: name.to_string(),
            email: format!("{name}@example.test"),
            tags: Vec::new(),
        };
        let entity = Entity::new(test_partition(), &account)
            .expect("account body")
            .with_roles(self.public_roles());
        self.save(&entity).expect("claim account")
    }

    /// Create a child record under `parent` with inherited roles.
    pub fn create<R: Record>(&self, parent: &Entity, record: &R) -> Result<Entity, RepoError> {
        let entity = Entity::new(test_partition(), record)?.with_parent(parent);
        self.save(&entity)
    }

    pub fn delete(&self, entity: &Entity) -> Result<(), RepoError> {
        let mut tx = self.tx();
        self.repo.delete(&mut tx, entity)?;
        self.repo.flush(&mut tx)
    }

    pub fn read(&self, entity: &Entity) -> Result<Entity, RepoError> {
        self.repo.read_or_err(&test_partition(), &entity.id)
    }
}

/// Hashes of the given keys.
pub fn hashes(keys: &[&PrivateKey]) -> BTreeSet<KeyHash> {
    keys.iter().map(|k| k.hash()).collect()
}
