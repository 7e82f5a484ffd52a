//! Read and write API over the partition chains of a subscriber.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info};
use trove_bridge::{DataPartition, DataSubscriber};
use trove_chain::{DataPartitionChain, RejectReason};
use trove_merge::{MergePort, ThreeWayMerger};
use trove_types::{
    CastleId, Entity, EntityId, KeyHash, Message, MessageData, MessageDataHeader, MessageMeta,
    MessagePublicKey, MessageSecurityCastle, ParentPolicy, PartitionKey, Record,
};

use crate::config::RepoConfig;
use crate::error::RepoError;
use crate::permissions::{EffectivePermissions, EffectivePermissionsBuilder};
use crate::rights::Rights;
use crate::serializer::{DataSerializer, SerializedData};
use crate::transaction::DataTransaction;

type Result<T> = std::result::Result<T, RepoError>;

/// Entities of every partition, as seen and written by one caller.
///
/// Reads decrypt with the caller's [`Rights`]; writes are staged in a
/// [`DataTransaction`], checked against the chain's rules, and published
/// by [`flush`](Self::flush).
pub struct DataRepository {
    subscriber: Arc<DataSubscriber>,
    serializer: DataSerializer,
    merger: Arc<dyn MergePort<Entity>>,
    rights: Rights,
    config: RepoConfig,
}

impl DataRepository {
    pub fn new(subscriber: Arc<DataSubscriber>, rights: Rights, config: RepoConfig) -> Self {
        let crypto = Arc::clone(&subscriber.context().crypto);
        Self {
            subscriber,
            serializer: DataSerializer::new(crypto),
            merger: Arc::new(ThreeWayMerger::new()),
            rights,
            config,
        }
    }

    /// Replace the merge strategy used to reconcile concurrent versions.
    pub fn with_merger(mut self, merger: Arc<dyn MergePort<Entity>>) -> Self {
        self.merger = merger;
        self
    }

    pub fn rights(&self) -> &Rights {
        &self.rights
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub fn subscriber(&self) -> &Arc<DataSubscriber> {
        &self.subscriber
    }

    fn partition(&self, key: &PartitionKey) -> Result<Arc<DataPartition>> {
        Ok(self.subscriber.partition(key)?)
    }

    fn permissions(
        &self,
        chain: &DataPartitionChain,
        tx: Option<&DataTransaction>,
        entity: &Entity,
    ) -> EffectivePermissions {
        let authorities = self.subscriber.context().authorities.as_ref();
        let builder = EffectivePermissionsBuilder::new(chain, authorities);
        match tx {
            Some(tx) => builder.with_staged(tx).build(entity),
            None => builder.build(entity),
        }
    }

    /// Roles `entity` would be written with.
    pub fn effective_permissions(&self, entity: &Entity) -> Result<EffectivePermissions> {
        let partition = self.partition(&entity.partition)?;
        Ok(self.permissions(partition.chain(), None, entity))
    }

    // -------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------

    /// Current value of `id`, or `None` if it is missing, deleted or unreadable.
    pub fn read(&self, partition: &PartitionKey, id: &EntityId) -> Result<Option<Entity>> {
        let partition = self.partition(partition)?;
        let Some(container) = partition.chain().get_data(id) else {
            return Ok(None);
        };
        let reader = self.serializer.reader(partition.chain(), &self.rights);
        Ok(container.fetch_data(&reader, self.merger.as_ref(), false)?)
    }

    /// Current value of `id`, telling apart why it cannot be returned.
    pub fn read_or_err(&self, partition: &PartitionKey, id: &EntityId) -> Result<Entity> {
        let partition = self.partition(partition)?;
        let Some(container) = partition.chain().get_data(id) else {
            return Err(RepoError::NotFound(*id));
        };
        if !container.has_payload() {
            return Err(RepoError::Deleted(*id));
        }
        let reader = self.serializer.reader(partition.chain(), &self.rights);
        container
            .fetch_data(&reader, self.merger.as_ref(), true)?
            .ok_or(RepoError::Unreadable(*id))
    }

    /// Current value of `id` decoded as `R`.
    pub fn read_record<R: Record>(&self, partition: &PartitionKey, id: &EntityId) -> Result<R> {
        Ok(self.read_or_err(partition, id)?.get()?)
    }

    /// Every readable live entity of `partition`, optionally of one type.
    pub fn read_all(&self, partition: &PartitionKey, type_filter: Option<&str>) -> Result<Vec<Entity>> {
        let partition = self.partition(partition)?;
        let reader = self.serializer.reader(partition.chain(), &self.rights);
        let mut entities = Vec::new();
        for container in partition.chain().get_all_data(type_filter) {
            if let Some(entity) = container.fetch_data(&reader, self.merger.as_ref(), false)? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    /// Log positions of every accepted version of `id`.
    pub fn read_history(&self, partition: &PartitionKey, id: &EntityId) -> Result<Vec<MessageMeta>> {
        Ok(self.partition(partition)?.chain().history(id))
    }

    /// The version of `id` stored at `offset`, decoded.
    pub fn read_version(&self, partition: &PartitionKey, id: &EntityId, offset: u64) -> Result<Option<Entity>> {
        let partition = self.partition(partition)?;
        let Some(data) = partition.bridge().get_version(id, offset)? else {
            return Ok(None);
        };
        self.serializer
            .from_data_message(&data, partition.chain(), &self.rights)
    }

    pub fn exists(&self, partition: &PartitionKey, id: &EntityId) -> Result<bool> {
        Ok(self.partition(partition)?.chain().exists(id))
    }

    pub fn ever_existed(&self, partition: &PartitionKey, id: &EntityId) -> Result<bool> {
        Ok(self.partition(partition)?.chain().ever_existed(id))
    }

    pub fn immutable(&self, partition: &PartitionKey, id: &EntityId) -> Result<bool> {
        Ok(self.partition(partition)?.chain().immutable(id))
    }

    pub fn read_root_of_trust(&self, partition: &PartitionKey, id: &EntityId) -> Result<Option<MessageDataHeader>> {
        Ok(self.partition(partition)?.chain().get_root_of_trust(id))
    }

    pub fn public_key(&self, partition: &PartitionKey, hash: &KeyHash) -> Result<Option<MessagePublicKey>> {
        Ok(self.partition(partition)?.chain().get_public_key(hash))
    }

    // -------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------

    /// Check `entity` and stage it in `tx`.
    ///
    /// Returns `false` when `tx` already holds a write of the same entity.
    pub fn write(&self, tx: &mut DataTransaction, entity: &Entity) -> Result<bool> {
        let partition = self.partition(&entity.partition)?;
        let chain = partition.chain();

        check_parent(chain, tx, entity)?;
        check_public_keys(chain, tx, entity)?;

        let perms = self.permissions(chain, Some(&*tx), entity);
        if perms.immutable {
            return Err(RepoError::Immutable(entity.id));
        }
        if perms.read.is_empty() {
            return Err(RepoError::Orphaned(entity.id));
        }
        if !self.rights.can_write(&perms) {
            return Err(RepoError::NoWriteRole {
                id: entity.id,
                diagnostics: perms.describe_write(),
            });
        }

        Ok(tx.write(entity.clone()))
    }

    /// Check that the caller may delete `entity` and stage the tombstone.
    pub fn delete(&self, tx: &mut DataTransaction, entity: &Entity) -> Result<bool> {
        let partition = self.partition(&entity.partition)?;
        let perms = self.permissions(partition.chain(), Some(&*tx), entity);
        if perms.immutable {
            return Err(RepoError::Immutable(entity.id));
        }
        if !self.rights.can_write(&perms) {
            return Err(RepoError::NoWriteRole {
                id: entity.id,
                diagnostics: perms.describe_write(),
            });
        }
        Ok(tx.delete(entity.clone()))
    }

    /// Publish everything staged in `tx`, one partition at a time.
    ///
    /// Partitions are independent: when one fails, those flushed before it
    /// stay written. Within a partition, missing public keys are published
    /// before the batch is validated and stay published if it is refused.
    pub fn flush(&self, tx: &mut DataTransaction) -> Result<()> {
        for key in tx.partitions() {
            self.flush_partition(tx, &key)?;
        }
        Ok(())
    }

    fn flush_partition(&self, tx: &mut DataTransaction, key: &PartitionKey) -> Result<()> {
        let partition = self.partition(key)?;
        let chain = partition.chain();
        let bridge = partition.bridge();

        let staged: &DataTransaction = tx;
        let mut keys_sent = 0;
        for public in staged.public_keys(key) {
            if chain.has_public_key(&public.public_key_hash) {
                continue;
            }
            bridge.send(&Message::PublicKey(public.clone()))?;
            chain.add_trust_key(public.clone());
            keys_sent += 1;
        }

        let lookup = |hash: &KeyHash| {
            chain
                .get_public_key(hash)
                .or_else(|| staged.find_public_key(key, hash).cloned())
        };
        let mut writes: Vec<(Entity, SerializedData)> = Vec::new();
        for entity in staged.puts(key) {
            let perms = self.permissions(chain, Some(staged), entity);
            let serialized = self
                .serializer
                .to_data_message(entity, &perms, &self.rights, lookup, false)?;
            writes.push((entity.clone(), serialized));
        }
        let mut deletes: Vec<SerializedData> = Vec::new();
        for entity in staged.deletes(key) {
            let perms = self.permissions(chain, Some(staged), entity);
            deletes.push(
                self.serializer
                    .to_data_message(entity, &perms, &self.rights, lookup, true)?,
            );
        }

        validate_batch(chain, writes.iter().map(|(_, s)| &s.data).chain(deletes.iter().map(|s| &s.data)))?;

        let castles: BTreeMap<CastleId, &MessageSecurityCastle> = writes
            .iter()
            .filter_map(|(_, s)| s.castle.as_ref())
            .map(|c| (c.id, c))
            .collect();
        for castle in castles.values() {
            if !chain.has_castle(&castle.id) {
                bridge.send(&Message::SecurityCastle((*castle).clone()))?;
            }
        }
        for (_, serialized) in &writes {
            bridge.send(&Message::Data(serialized.data.clone()))?;
        }
        for serialized in &deletes {
            bridge.send(&Message::Data(serialized.data.clone()))?;
        }

        if !bridge.sync(self.config.sync_timeout())? {
            return Err(RepoError::SyncTimeout(key.clone()));
        }

        debug!(
            partition = %key,
            keys = keys_sent,
            writes = writes.len(),
            deletes = deletes.len(),
            "transaction flushed"
        );

        let written = writes
            .into_iter()
            .map(|(mut entity, serialized)| {
                let version = serialized.data.header.version;
                entity.version = Some(version);
                entity.previous_version = Some(version);
                entity.merges = BTreeSet::new();
                entity
            })
            .collect();
        tx.record_flushed(key, written);
        Ok(())
    }

    /// Write a merge commit for `id` when concurrent versions left several
    /// leaves. Returns whether a merge was written.
    pub fn merge_if_required(&self, partition: &PartitionKey, id: &EntityId) -> Result<bool> {
        let data_partition = self.partition(partition)?;
        let chain = data_partition.chain();
        let Some(container) = chain.get_data(id) else {
            return Ok(false);
        };
        if !container.requires_merge() {
            return Ok(false);
        }

        let reader = self.serializer.reader(chain, &self.rights);
        let Some(merged) = container.fetch_data(&reader, self.merger.as_ref(), true)? else {
            return Ok(false);
        };
        let perms = self.permissions(chain, None, &merged);
        if !self.rights.can_write(&perms) {
            debug!(%partition, %id, "no write role to merge");
            return Ok(false);
        }

        let mut tx = DataTransaction::new();
        tx.write(merged);
        self.flush(&mut tx)?;
        info!(%partition, %id, "merged concurrent versions");
        Ok(true)
    }
}

/// The entity's parent must exist and be of a type its policy accepts.
fn check_parent(chain: &DataPartitionChain, tx: &DataTransaction, entity: &Entity) -> Result<()> {
    let ty = entity.type_name.as_str();
    let violation = |reason: RejectReason| RepoError::ParentPolicy {
        id: entity.id,
        reason: reason.to_string(),
    };

    match (chain.policy().policy(ty), entity.parent_id) {
        (ParentPolicy::Undefined, None) => Err(violation(RejectReason::PolicyUndefined { ty: ty.to_string() })),
        (ParentPolicy::Undefined | ParentPolicy::ParentFree, Some(_)) => {
            Err(violation(RejectReason::ParentNotAllowed { ty: ty.to_string() }))
        }
        (ParentPolicy::RequiresParent(_), None) => {
            Err(violation(RejectReason::ParentRequired { ty: ty.to_string() }))
        }
        (ParentPolicy::ParentFree, None) => Ok(()),
        (ParentPolicy::RequiresParent(allowed), Some(parent)) => {
            let parent_ty = tx
                .find(&entity.partition, &parent)
                .or_else(|| tx.cached(&entity.partition, &parent))
                .map(|p| p.type_name.clone())
                .or_else(|| chain.get_data(&parent).and_then(|c| c.payload_type()))
                .ok_or_else(|| violation(RejectReason::ParentMissing { parent }))?;
            if !allowed.contains(&parent_ty) {
                return Err(violation(RejectReason::ParentTypeNotAllowed {
                    ty: ty.to_string(),
                    parent_ty,
                }));
            }
            Ok(())
        }
    }
}

/// Every role must name a key the partition knows or the transaction publishes.
fn check_public_keys(chain: &DataPartitionChain, tx: &DataTransaction, entity: &Entity) -> Result<()> {
    let roles = entity.roles.allow_read.iter().chain(&entity.roles.allow_write);
    for hash in roles {
        if !chain.has_public_key(hash) && tx.find_public_key(&entity.partition, hash).is_none() {
            return Err(RepoError::MissingPublicKey(*hash));
        }
    }
    Ok(())
}

/// Validate every message of a batch with the rest of the batch staged.
fn validate_batch<'a>(
    chain: &DataPartitionChain,
    batch: impl Iterator<Item = &'a MessageData> + Clone,
) -> Result<()> {
    let mut staged: BTreeMap<EntityId, MessageData> = batch
        .clone()
        .map(|data| (data.header.id, data.clone()))
        .collect();

    for data in batch {
        let id = data.header.id;
        let own = staged.remove(&id);
        let result = chain.validate_with_staged(data, &staged);
        if let Some(own) = own {
            staged.insert(id, own);
        }
        result.map_err(|reason| RepoError::Rejected { id, reason })?;
    }
    Ok(())
}
