//! Request-scoped staging of writes, deletes and public keys.

use std::collections::BTreeMap;

use trove_crypto::PrivateKey;
use trove_types::{Entity, EntityId, KeyHash, MessagePublicKey, PartitionKey};

#[derive(Debug, Default, Clone)]
struct PartitionStage {
    /// Staged writes in call order.
    puts: Vec<Entity>,
    deletes: Vec<Entity>,
    public_keys: BTreeMap<KeyHash, MessagePublicKey>,
}

impl PartitionStage {
    fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.deletes.is_empty() && self.public_keys.is_empty()
    }
}

/// Changes staged by one caller until [`DataRepository::flush`](crate::DataRepository::flush).
///
/// A transaction belongs to a single request and is never shared across
/// threads. Flushed entities and keys stay in its cache so that later
/// writes in the same request can refer to them.
#[derive(Debug, Default, Clone)]
pub struct DataTransaction {
    stages: BTreeMap<PartitionKey, PartitionStage>,
    cache: BTreeMap<(PartitionKey, EntityId), Entity>,
    cached_keys: BTreeMap<(PartitionKey, KeyHash), MessagePublicKey>,
}

impl DataTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a public key for publication in `partition`.
    pub fn put_public_key(&mut self, partition: &PartitionKey, key: MessagePublicKey) {
        self.stages
            .entry(partition.clone())
            .or_default()
            .public_keys
            .insert(key.public_key_hash, key);
    }

    /// Stage the public half of `key`.
    pub fn put_private_key(&mut self, partition: &PartitionKey, key: &PrivateKey) {
        self.put_public_key(partition, key.public_key());
    }

    /// Stage a write. Returns `false` when the entity is already staged,
    /// in which case the earlier value is kept.
    pub fn write(&mut self, entity: Entity) -> bool {
        let stage = self.stages.entry(entity.partition.clone()).or_default();
        if stage.puts.iter().any(|e| e.id == entity.id) {
            return false;
        }
        stage.deletes.retain(|e| e.id != entity.id);
        stage.puts.push(entity);
        true
    }

    /// Stage a delete, replacing any staged write of the same entity.
    pub fn delete(&mut self, entity: Entity) -> bool {
        let stage = self.stages.entry(entity.partition.clone()).or_default();
        stage.puts.retain(|e| e.id != entity.id);
        if stage.deletes.iter().any(|e| e.id == entity.id) {
            return false;
        }
        stage.deletes.push(entity);
        true
    }

    /// Drop whatever is staged for `id`.
    pub fn undo(&mut self, partition: &PartitionKey, id: &EntityId) -> bool {
        let Some(stage) = self.stages.get_mut(partition) else {
            return false;
        };
        let before = stage.puts.len() + stage.deletes.len();
        stage.puts.retain(|e| e.id != *id);
        stage.deletes.retain(|e| e.id != *id);
        before != stage.puts.len() + stage.deletes.len()
    }

    /// Staged write of `id`.
    pub fn find(&self, partition: &PartitionKey, id: &EntityId) -> Option<&Entity> {
        self.stages
            .get(partition)
            .and_then(|stage| stage.puts.iter().find(|e| e.id == *id))
    }

    /// Entity as last flushed through this transaction.
    pub fn cached(&self, partition: &PartitionKey, id: &EntityId) -> Option<&Entity> {
        self.cache.get(&(partition.clone(), *id))
    }

    /// Staged or already flushed public key.
    pub fn find_public_key(&self, partition: &PartitionKey, hash: &KeyHash) -> Option<&MessagePublicKey> {
        self.stages
            .get(partition)
            .and_then(|stage| stage.public_keys.get(hash))
            .or_else(|| self.cached_keys.get(&(partition.clone(), *hash)))
    }

    pub fn puts(&self, partition: &PartitionKey) -> &[Entity] {
        self.stages.get(partition).map_or(&[], |s| s.puts.as_slice())
    }

    pub fn deletes(&self, partition: &PartitionKey) -> &[Entity] {
        self.stages.get(partition).map_or(&[], |s| s.deletes.as_slice())
    }

    pub fn public_keys(&self, partition: &PartitionKey) -> impl Iterator<Item = &MessagePublicKey> {
        self.stages
            .get(partition)
            .into_iter()
            .flat_map(|s| s.public_keys.values())
    }

    /// Partitions with staged changes.
    pub fn partitions(&self) -> Vec<PartitionKey> {
        self.stages
            .iter()
            .filter(|(_, stage)| !stage.is_empty())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Import the flushed entities and keys of `other`.
    pub fn copy_cache_from(&mut self, other: &DataTransaction) {
        self.cache
            .extend(other.cache.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.cached_keys
            .extend(other.cached_keys.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    pub fn is_empty(&self) -> bool {
        self.stages.values().all(PartitionStage::is_empty)
    }

    /// Drop every staged change. The cache is kept.
    pub fn clear(&mut self) {
        self.stages.clear();
    }

    /// Move the stage of `partition` into the cache once it has been flushed.
    ///
    /// `written` holds the staged writes with their new versions.
    pub(crate) fn record_flushed(&mut self, partition: &PartitionKey, written: Vec<Entity>) {
        let Some(stage) = self.stages.remove(partition) else {
            return;
        };
        for entity in written {
            self.cache.insert((partition.clone(), entity.id), entity);
        }
        for entity in stage.deletes {
            self.cache.remove(&(partition.clone(), entity.id));
        }
        for (hash, key) in stage.public_keys {
            self.cached_keys.insert((partition.clone(), hash), key);
        }
    }
}
