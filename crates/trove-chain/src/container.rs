//! Per-entity version graph.
//!
//! A [`DataContainer`] holds every accepted version of one entity within a
//! partition. It tracks the unresolved heads of the version DAG ("leaves")
//! and reconciles them into one value on read, delegating the field-level
//! work to a [`MergePort`].

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tracing::{debug, trace, warn};
use trove_merge::{MergePair, MergePort};
use trove_types::{
    CastleId, Entity, EntityId, KeyHash, MessageData, MessageDataHeader, MessageMeta,
    PartitionKey, VersionId,
};

use crate::cache::{ReadCache, reader_set_hash};
use crate::error::ChainError;
use crate::node::DataGraphNode;

type Result<T> = std::result::Result<T, ChainError>;

/// Decodes accepted versions on behalf of one caller.
///
/// Implementations decrypt with the caller's read keys. `Ok(None)` means the
/// version exists but the caller cannot read it (or it is a tombstone).
pub trait PayloadReader {
    /// Hashes of the read keys the caller holds.
    fn reader_keys(&self) -> &BTreeSet<KeyHash>;

    /// Decode one version into an entity.
    fn read(&self, data: &MessageData) -> Result<Option<Entity>>;
}

#[derive(Default)]
struct ContainerState {
    first_offset: Option<u64>,
    last_offset: Option<u64>,
    /// Every version ever accepted.
    lookup: HashMap<VersionId, Arc<DataGraphNode>>,
    /// Every version in log order.
    timeline: BTreeMap<u64, Arc<DataGraphNode>>,
    /// Unresolved heads, by offset.
    leafs: BTreeMap<u64, Arc<DataGraphNode>>,
    /// Compacted-log keys seen.
    keys: BTreeSet<String>,
    /// Log key and castle shared by the current leaf set.
    leaf_key: Option<String>,
    leaf_castle: Option<CastleId>,
}

/// All versions of one entity within a partition.
///
/// Mutated only through [`add`](Self::add) under the write lock. Reads take
/// the read lock and upgrade to the write lock to populate the read cache,
/// re-checking the cache once the write lock is held.
pub struct DataContainer {
    partition: PartitionKey,
    id: EntityId,
    state: RwLock<ContainerState>,
    cache: ReadCache,
}

impl DataContainer {
    pub fn new(partition: PartitionKey, id: EntityId, cache_capacity: usize) -> Self {
        Self {
            partition,
            id,
            state: RwLock::new(ContainerState::default()),
            cache: ReadCache::new(cache_capacity),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn partition(&self) -> &PartitionKey {
        &self.partition
    }

    /// Append an accepted version.
    ///
    /// Offsets are unique within a partition. A version already present is
    /// ignored, so replaying a log twice is harmless.
    pub fn add(&self, data: MessageData, meta: MessageMeta) {
        let node = Arc::new(DataGraphNode::new(data, meta));
        let offset = node.offset();

        let mut state = self.state.write().expect("container lock poisoned");
        if state.lookup.contains_key(&node.version()) {
            trace!(id = %self.id, version = %node.version(), offset, "version already present");
            return;
        }

        state.first_offset = Some(state.first_offset.map_or(offset, |first| first.min(offset)));
        state.last_offset = Some(state.last_offset.map_or(offset, |last| last.max(offset)));

        let castle = node.header().castle_id;
        let mut admit = true;
        let rotated = !state.leafs.is_empty()
            && (state.leaf_key.as_deref() != Some(node.key()) || state.leaf_castle != castle);
        if rotated {
            let newest = state.leafs.keys().next_back().copied().unwrap_or_default();
            if offset > newest {
                debug!(id = %self.id, offset, key = node.key(), "leaf set rotated");
                state.leafs.clear();
            } else {
                debug!(id = %self.id, offset, newest, "stale version kept out of the leaf set");
                admit = false;
            }
        }

        if admit {
            if node.has_payload() {
                let superseded: HashSet<VersionId> = node.supersedes().collect();
                state.leafs.retain(|_, leaf| !superseded.contains(&leaf.version()));
            } else {
                state.leafs.clear();
            }
            state.leaf_key = Some(node.key().to_string());
            state.leaf_castle = castle;
            state.leafs.insert(offset, Arc::clone(&node));
        }

        state.keys.insert(node.key().to_string());
        state.lookup.insert(node.version(), Arc::clone(&node));
        state.timeline.insert(offset, node);

        self.cache.clear();
    }

    /// The minimal non-redundant set of live heads, oldest first.
    ///
    /// Empty when the entity was deleted and nothing newer superseded the
    /// tombstone.
    pub fn compute_current_leaves(&self) -> Vec<Arc<DataGraphNode>> {
        let state = self.state.read().expect("container lock poisoned");
        current_leaves(&state)
    }

    /// Whether concurrent writes left more than one live head.
    pub fn requires_merge(&self) -> bool {
        self.compute_current_leaves().len() > 1
    }

    /// Number of entries in the raw leaf set.
    pub fn leaf_count(&self) -> usize {
        self.state.read().expect("container lock poisoned").leafs.len()
    }

    /// Reconciled, decrypted current value as seen by `reader`.
    ///
    /// Returns `Ok(None)` when there is no live version or the caller cannot
    /// read it. With `should_throw == false` decode and merge failures are
    /// logged and reported as `Ok(None)` too.
    pub fn fetch_data(
        &self,
        reader: &dyn PayloadReader,
        merger: &dyn MergePort<Entity>,
        should_throw: bool,
    ) -> Result<Option<Entity>> {
        let reader_hash = reader_set_hash(reader.reader_keys());
        {
            let _state = self.state.read().expect("container lock poisoned");
            if let Some(hit) = self.cache.get(&reader_hash) {
                return Ok(Some(hit));
            }
        }

        let state = self.state.write().expect("container lock poisoned");
        // Another reader may have filled the cache while we waited.
        if let Some(hit) = self.cache.get(&reader_hash) {
            return Ok(Some(hit));
        }

        match self.reconcile(&state, reader, merger) {
            Ok(Some(entity)) => {
                self.cache.put(reader_hash, entity.clone());
                Ok(Some(entity))
            }
            Ok(None) => Ok(None),
            Err(e) if should_throw => Err(e),
            Err(e) => {
                warn!(partition = %self.partition, id = %self.id, error = %e, "unreadable entity");
                Ok(None)
            }
        }
    }

    fn reconcile(
        &self,
        state: &ContainerState,
        reader: &dyn PayloadReader,
        merger: &dyn MergePort<Entity>,
    ) -> Result<Option<Entity>> {
        let leaves = current_leaves(state);
        match leaves.as_slice() {
            [] => Ok(None),
            [leaf] => {
                let Some(mut entity) = reader.read(leaf.data())? else {
                    return Ok(None);
                };
                entity.version = Some(leaf.version());
                entity.previous_version = Some(leaf.version());
                entity.merges.clear();
                Ok(Some(entity))
            }
            _ => {
                let mut decoded: HashMap<VersionId, Option<Entity>> = HashMap::new();
                let mut pairs = Vec::with_capacity(leaves.len());
                for leaf in &leaves {
                    let base = match leaf.previous_version().and_then(|v| state.lookup.get(&v)) {
                        Some(base) => decode(&mut decoded, reader, base)?,
                        None => None,
                    };
                    let Some(candidate) = decode(&mut decoded, reader, leaf)? else {
                        return Ok(None);
                    };
                    pairs.push(MergePair::new(base, Some(candidate)));
                }

                let merged = merger.merge(pairs)?;
                debug!(id = %self.id, leaves = leaves.len(), "reconciled concurrent leaves");
                Ok(merged.map(|mut entity| {
                    entity.version = Some(VersionId::random());
                    entity.previous_version = None;
                    entity.merges = leaves.iter().map(|l| l.version()).collect();
                    entity
                }))
            }
        }
    }

    /// Header of the current value, without touching payloads.
    ///
    /// With several leaves the result is a synthetic merge header: a fresh
    /// version, no previous version and `merges` set to the leaf versions.
    pub fn get_merged_header(
        &self,
        merger: &dyn MergePort<MessageDataHeader>,
    ) -> Result<Option<MessageDataHeader>> {
        let state = self.state.read().expect("container lock poisoned");
        let leaves = current_leaves(&state);
        let Some(last) = leaves.last() else {
            return Ok(None);
        };
        if leaves.len() == 1 {
            return Ok(Some(last.header().clone()));
        }

        let pairs = leaves
            .iter()
            .map(|leaf| {
                let base = leaf
                    .previous_version()
                    .and_then(|v| state.lookup.get(&v))
                    .map(|base| base.header().clone());
                MergePair::new(base, Some(leaf.header().clone()))
            })
            .collect();

        let mut header = merger
            .merge(pairs)?
            .unwrap_or_else(|| last.header().clone());
        header.id = self.id;
        header.version = VersionId::random();
        header.previous_version = None;
        header.merges = leaves.iter().map(|l| l.version()).collect();
        Ok(Some(header))
    }

    // -------------------------------------------------------------------
    // History accessors
    // -------------------------------------------------------------------

    /// Metadata of every version, in log order.
    pub fn history(&self) -> Vec<MessageMeta> {
        let state = self.state.read().expect("container lock poisoned");
        state.timeline.values().map(|n| n.meta().clone()).collect()
    }

    /// The version stored at `offset`.
    pub fn version_at(&self, offset: u64) -> Option<MessageData> {
        let state = self.state.read().expect("container lock poisoned");
        state.timeline.get(&offset).map(|n| n.data().clone())
    }

    /// The version with id `version`.
    pub fn version(&self, version: &VersionId) -> Option<MessageData> {
        let state = self.state.read().expect("container lock poisoned");
        state.lookup.get(version).map(|n| n.data().clone())
    }

    /// Most recent version in log order.
    pub fn last_data(&self) -> Option<MessageData> {
        let state = self.state.read().expect("container lock poisoned");
        state.timeline.values().next_back().map(|n| n.data().clone())
    }

    pub fn last_header(&self) -> Option<MessageDataHeader> {
        self.last_data().map(|d| d.header)
    }

    /// Type name of the latest version.
    pub fn payload_type(&self) -> Option<String> {
        self.last_header().map(|h| h.payload_class)
    }

    pub fn parent_id(&self) -> Option<EntityId> {
        self.last_header().and_then(|h| h.parent_id)
    }

    pub fn first_offset(&self) -> Option<u64> {
        self.state.read().expect("container lock poisoned").first_offset
    }

    pub fn last_offset(&self) -> Option<u64> {
        self.state.read().expect("container lock poisoned").last_offset
    }

    pub fn keys(&self) -> BTreeSet<String> {
        self.state.read().expect("container lock poisoned").keys.clone()
    }

    /// Whether a live (non-deleted) version exists.
    pub fn has_payload(&self) -> bool {
        !self.compute_current_leaves().is_empty()
    }

    /// Whether the latest version forbids any further write.
    pub fn is_immutable(&self) -> bool {
        self.last_header().is_some_and(|h| h.is_immutable())
    }

    /// Number of readers with a cached value.
    pub fn cached_readers(&self) -> usize {
        self.cache.len()
    }
}

fn decode(
    decoded: &mut HashMap<VersionId, Option<Entity>>,
    reader: &dyn PayloadReader,
    node: &DataGraphNode,
) -> Result<Option<Entity>> {
    if let Some(hit) = decoded.get(&node.version()) {
        return Ok(hit.clone());
    }
    let entity = reader.read(node.data())?;
    decoded.insert(node.version(), entity.clone());
    Ok(entity)
}

/// Walk the leaf set newest first, dropping ancestors of accepted leaves and
/// stopping at the first tombstone.
fn current_leaves(state: &ContainerState) -> Vec<Arc<DataGraphNode>> {
    let mut ancestors: HashSet<VersionId> = HashSet::new();
    let mut ret = Vec::new();

    for node in state.leafs.values().rev() {
        if ancestors.contains(&node.version()) {
            continue;
        }
        if !node.has_payload() {
            break;
        }

        let mut pending: Vec<VersionId> = node.supersedes().collect();
        while let Some(version) = pending.pop() {
            if ancestors.insert(version)
                && let Some(parent) = state.lookup.get(&version)
            {
                pending.extend(parent.supersedes());
            }
        }
        ret.push(Arc::clone(node));
    }

    ret.reverse();
    ret
}
