//! Per-partition chain of trust.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::{debug, trace, warn};
use trove_crypto::{CryptoPort, trust_of_public_read, trust_of_public_write};
use trove_types::{
    CastleId, EntityId, KeyHash, Message, MessageData, MessageDataHeader, MessageMeta,
    MessagePublicKey, MessageSecurityCastle, ParentPolicyTable, PartitionKey,
};

use crate::authority::ImplicitAuthority;
use crate::container::DataContainer;
use crate::validator::{RejectReason, TrustSource, TrustValidatorBuilder};

/// Tunables of a partition chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainConfig {
    /// Queued messages per entity before they are validated eagerly.
    pub partial_trust_limit: usize,
    /// Check the hash of keys returned by implicit authorities.
    pub extra_validation: bool,
    /// Readers with a cached decrypted value, per container.
    pub decrypt_cache_capacity: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            partial_trust_limit: 100,
            extra_validation: false,
            decrypt_cache_capacity: 8,
        }
    }
}

/// Collaborators shared by every partition chain of a node.
#[derive(Clone)]
pub struct ChainContext {
    pub policy: Arc<ParentPolicyTable>,
    pub crypto: Arc<dyn CryptoPort>,
    pub authorities: Arc<dyn ImplicitAuthority>,
    pub config: ChainConfig,
}

impl ChainContext {
    pub fn new(
        policy: Arc<ParentPolicyTable>,
        crypto: Arc<dyn CryptoPort>,
        authorities: Arc<dyn ImplicitAuthority>,
    ) -> Self {
        Self {
            policy,
            crypto,
            authorities,
            config: ChainConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ChainConfig) -> Self {
        self.config = config;
        self
    }
}

type Queued = (MessageData, MessageMeta);

/// Every accepted entity, public key and castle of one partition.
///
/// Messages replayed from the log arrive through [`rcv`](Self::rcv) and wait
/// in a per-entity queue until something reads the entity; they are then
/// validated in arrival order and promoted into a [`DataContainer`].
pub struct DataPartitionChain {
    key: PartitionKey,
    ctx: ChainContext,
    root_of_trust: DashMap<EntityId, MessageDataHeader>,
    partial_trust: DashMap<EntityId, VecDeque<Queued>>,
    chain_of_trust: DashMap<EntityId, Arc<DataContainer>>,
    castles: DashMap<CastleId, MessageSecurityCastle>,
    public_keys: DashMap<KeyHash, MessagePublicKey>,
    /// Serializes promotion so that queued versions are added in order.
    promote_lock: Mutex<()>,
}

impl DataPartitionChain {
    /// Create a chain seeded with the well-known public read and write keys.
    pub fn new(key: PartitionKey, ctx: ChainContext) -> Self {
        let chain = Self {
            key,
            ctx,
            root_of_trust: DashMap::new(),
            partial_trust: DashMap::new(),
            chain_of_trust: DashMap::new(),
            castles: DashMap::new(),
            public_keys: DashMap::new(),
            promote_lock: Mutex::new(()),
        };
        chain.add_trust_key(trust_of_public_read().public_key());
        chain.add_trust_key(trust_of_public_write().public_key());
        chain
    }

    pub fn partition_key(&self) -> &PartitionKey {
        &self.key
    }

    pub fn config(&self) -> &ChainConfig {
        &self.ctx.config
    }

    pub fn policy(&self) -> &ParentPolicyTable {
        &self.ctx.policy
    }

    pub fn crypto(&self) -> &Arc<dyn CryptoPort> {
        &self.ctx.crypto
    }

    // -------------------------------------------------------------------
    // Trusted appends
    // -------------------------------------------------------------------

    pub fn add_trust_key(&self, key: MessagePublicKey) {
        trace!(partition = %self.key, hash = %key.public_key_hash, "trusted public key");
        self.public_keys.insert(key.public_key_hash, key);
    }

    pub fn add_trust_data(&self, data: MessageData, meta: MessageMeta) {
        let id = data.header.id;
        trace!(partition = %self.key, %id, offset = meta.offset, "trusted data");
        let container = self
            .chain_of_trust
            .entry(id)
            .or_insert_with(|| {
                Arc::new(DataContainer::new(
                    self.key.clone(),
                    id,
                    self.ctx.config.decrypt_cache_capacity,
                ))
            })
            .clone();
        container.add(data, meta);
    }

    pub fn add_trust_castle(&self, castle: MessageSecurityCastle) {
        trace!(partition = %self.key, castle = %castle.id, "trusted castle");
        self.castles.insert(castle.id, castle);
    }

    /// Record a bootstrap-time authority header for `header.id`.
    pub fn add_root_of_trust(&self, header: MessageDataHeader) {
        debug!(partition = %self.key, id = %header.id, "root of trust");
        self.root_of_trust.insert(header.id, header);
    }

    // -------------------------------------------------------------------
    // Log delivery
    // -------------------------------------------------------------------

    /// Accept one encoded log record. Malformed records are dropped.
    pub fn rcv(&self, raw: &[u8], meta: MessageMeta) -> bool {
        match Message::from_bytes(raw) {
            Ok(msg) => self.rcv_message(msg, meta),
            Err(e) => {
                self.drop_record(&meta, &format!("malformed message: {e}"));
                false
            }
        }
    }

    /// Dispatch one decoded log record by kind.
    pub fn rcv_message(&self, msg: Message, meta: MessageMeta) -> bool {
        trace!(partition = %self.key, kind = msg.kind_name(), offset = meta.offset, "received");
        match msg {
            Message::Data(data) => self.process_data(data, meta),
            Message::PublicKey(key) => {
                if !key.verify_hash() {
                    self.drop_record(&meta, "public key hash mismatch");
                    return false;
                }
                self.add_trust_key(key);
                true
            }
            Message::SecurityCastle(castle) => {
                self.add_trust_castle(castle);
                true
            }
            // Barriers are tracked by the bridge.
            Message::Sync(_) => true,
        }
    }

    fn process_data(&self, data: MessageData, meta: MessageMeta) -> bool {
        if data.digest.is_none() {
            self.drop_data(&data, Some(&meta), &RejectReason::MissingDigest);
            return false;
        }

        let id = data.header.id;
        let queued = {
            let mut queue = self.partial_trust.entry(id).or_default();
            queue.push_back((data, meta));
            queue.len()
        };
        if queued > self.ctx.config.partial_trust_limit {
            self.promote(id);
        }
        true
    }

    fn drop_record(&self, meta: &MessageMeta, why: &str) {
        warn!(partition = %self.key, offset = meta.offset, key = %meta.key, reason = why, "dropping message");
    }

    fn drop_data(&self, data: &MessageData, meta: Option<&MessageMeta>, why: &RejectReason) {
        warn!(
            partition = %self.key,
            offset = meta.map(|m| m.offset),
            ty = %data.header.payload_class,
            id = %data.header.id,
            reason = %why,
            "dropping data"
        );
    }

    // -------------------------------------------------------------------
    // Promotion
    // -------------------------------------------------------------------

    /// Validate and add every queued version of `id`, in arrival order.
    ///
    /// A version stays queued until it has been added or dropped, so a
    /// reader that finds the queue empty also finds the promoted container.
    fn promote(&self, id: EntityId) {
        if !self.partial_trust.contains_key(&id) {
            return;
        }
        let _guard = self.promote_lock.lock().expect("promote lock poisoned");
        let visiting = RefCell::new(BTreeSet::new());
        self.promote_nested(id, &visiting);
    }

    /// Promotion under the promote lock. `visiting` holds the entities whose
    /// queues are being drained further up the stack.
    fn promote_nested(&self, id: EntityId, visiting: &RefCell<BTreeSet<EntityId>>) {
        if !visiting.borrow_mut().insert(id) {
            return;
        }

        while let Some((data, meta)) = self.peek_partial(&id) {
            let lookup = ChainLookup {
                chain: self,
                visiting,
            };
            let callback = |_: &MessageDataHeader, why: &RejectReason| {
                self.drop_data(&data, Some(&meta), why);
            };
            let accepted = self
                .validator()
                .with_failure_callback(&callback)
                .validate(&self.key, &data, &lookup);
            if accepted {
                self.add_trust_data(data, meta);
            }
            self.pop_partial(&id);
        }

        visiting.borrow_mut().remove(&id);
    }

    fn peek_partial(&self, id: &EntityId) -> Option<Queued> {
        self.partial_trust.get(id)?.front().cloned()
    }

    fn pop_partial(&self, id: &EntityId) {
        if let Some(mut queue) = self.partial_trust.get_mut(id) {
            queue.pop_front();
        }
        self.partial_trust.remove_if(id, |_, queue| queue.is_empty());
    }

    /// Validate `data` (queued or not) and add it to the chain on success.
    pub fn promote_chain_entry(&self, data: MessageData, meta: MessageMeta) -> bool {
        if !self.validate(&data) {
            return false;
        }
        self.add_trust_data(data, meta);
        true
    }

    // -------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------

    fn validator(&self) -> TrustValidatorBuilder<'_> {
        TrustValidatorBuilder::new(
            &self.ctx.policy,
            self.ctx.crypto.as_ref(),
            self.ctx.authorities.as_ref(),
        )
        .with_extra_validation(self.ctx.config.extra_validation)
    }

    /// Promote the queue of `id` and pin it so the validator of one of its
    /// versions does not drain it again. Call under the promote lock.
    fn settle(&self, id: &EntityId) -> RefCell<BTreeSet<EntityId>> {
        let visiting = RefCell::new(BTreeSet::new());
        self.promote_nested(*id, &visiting);
        visiting.borrow_mut().insert(*id);
        visiting
    }

    /// Admission check for a new write. Rejections are logged.
    pub fn validate(&self, data: &MessageData) -> bool {
        let _guard = self.promote_lock.lock().expect("promote lock poisoned");
        let visiting = self.settle(&data.header.id);
        let lookup = ChainLookup {
            chain: self,
            visiting: &visiting,
        };
        let callback = |_: &MessageDataHeader, why: &RejectReason| self.drop_data(data, None, why);
        self.validator()
            .with_failure_callback(&callback)
            .validate(&self.key, data, &lookup)
    }

    /// Admission check with an in-flight batch consulted before the chain.
    pub fn validate_with_staged(
        &self,
        data: &MessageData,
        staged: &BTreeMap<EntityId, MessageData>,
    ) -> Result<(), RejectReason> {
        let _guard = self.promote_lock.lock().expect("promote lock poisoned");
        let visiting = self.settle(&data.header.id);
        let lookup = ChainLookup {
            chain: self,
            visiting: &visiting,
        };
        let result = self
            .validator()
            .with_staged(staged)
            .with_failure_callback(&ignore_failure)
            .check(&self.key, data, &lookup);
        if let Err(why) = &result {
            debug!(partition = %self.key, id = %data.header.id, reason = %why, "write refused");
        }
        result
    }

    // -------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------

    /// Container of `id`, after promoting its queued versions.
    pub fn get_data(&self, id: &EntityId) -> Option<Arc<DataContainer>> {
        self.promote(*id);
        self.chain_of_trust.get(id).map(|c| Arc::clone(c.value()))
    }

    /// Every container, optionally restricted to one type.
    pub fn get_all_data(&self, type_filter: Option<&str>) -> Vec<Arc<DataContainer>> {
        let queued: Vec<EntityId> = self
            .partial_trust
            .iter()
            .filter(|entry| {
                entry.value().front().is_some_and(|(data, _)| {
                    type_filter.is_none_or(|ty| data.header.payload_class == ty)
                })
            })
            .map(|entry| *entry.key())
            .collect();
        for id in queued {
            self.promote(id);
        }

        self.chain_of_trust
            .iter()
            .filter(|entry| {
                type_filter.is_none_or(|ty| entry.value().payload_type().as_deref() == Some(ty))
            })
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Ids of every entity with at least one accepted or queued version.
    pub fn ids(&self) -> BTreeSet<EntityId> {
        let mut ids: BTreeSet<EntityId> = self.chain_of_trust.iter().map(|e| *e.key()).collect();
        ids.extend(self.partial_trust.iter().map(|e| *e.key()));
        ids
    }

    /// Whether a live version of `id` exists.
    pub fn exists(&self, id: &EntityId) -> bool {
        self.get_data(id).is_some_and(|c| c.has_payload())
    }

    /// Whether any version of `id`, deleted or not, was accepted.
    pub fn ever_existed(&self, id: &EntityId) -> bool {
        self.get_data(id).is_some()
    }

    pub fn immutable(&self, id: &EntityId) -> bool {
        self.get_data(id).is_some_and(|c| c.is_immutable())
    }

    pub fn history(&self, id: &EntityId) -> Vec<MessageMeta> {
        self.get_data(id).map(|c| c.history()).unwrap_or_default()
    }

    pub fn get_root_of_trust(&self, id: &EntityId) -> Option<MessageDataHeader> {
        self.root_of_trust.get(id).map(|h| h.value().clone())
    }

    pub fn get_public_key(&self, hash: &KeyHash) -> Option<MessagePublicKey> {
        self.public_keys.get(hash).map(|k| k.value().clone())
    }

    pub fn has_public_key(&self, hash: &KeyHash) -> bool {
        self.public_keys.contains_key(hash)
    }

    pub fn get_castle(&self, id: &CastleId) -> Option<MessageSecurityCastle> {
        self.castles.get(id).map(|c| c.value().clone())
    }

    pub fn has_castle(&self, id: &CastleId) -> bool {
        self.castles.contains_key(id)
    }

    /// Number of versions still waiting for validation.
    pub fn queued(&self) -> usize {
        self.partial_trust.iter().map(|q| q.value().len()).sum()
    }
}

fn ignore_failure(_: &MessageDataHeader, _: &RejectReason) {}

/// The chain as seen by a validator running under the promote lock.
///
/// Looking up another entity promotes its queue first, unless that queue
/// is already being drained further up the stack.
struct ChainLookup<'a> {
    chain: &'a DataPartitionChain,
    visiting: &'a RefCell<BTreeSet<EntityId>>,
}

impl TrustSource for ChainLookup<'_> {
    fn container(&self, id: &EntityId) -> Option<Arc<DataContainer>> {
        if self.chain.partial_trust.contains_key(id) {
            self.chain.promote_nested(*id, self.visiting);
        }
        self.chain.chain_of_trust.get(id).map(|c| Arc::clone(c.value()))
    }

    fn root_of_trust(&self, id: &EntityId) -> Option<MessageDataHeader> {
        self.chain.get_root_of_trust(id)
    }

    fn public_key(&self, hash: &KeyHash) -> Option<MessagePublicKey> {
        self.chain.get_public_key(hash)
    }
}
