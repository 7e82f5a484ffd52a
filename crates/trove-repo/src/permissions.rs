//! Effective read and write roles of an entity.
//!
//! Roles are inherited down the parent tree: a level contributes its own
//! `allow_*` set, and the walk continues upward while the level inherits.
//! Entities staged in the current transaction shadow the chain's view of
//! the same ids.

use std::collections::BTreeSet;

use trove_chain::{DataPartitionChain, ImplicitAuthority};
use trove_crypto::trust_of_public_write;
use trove_types::{Entity, EntityId, KeyHash, MessageDataHeader, ParentPolicyTable, PartitionKey};

use crate::transaction::DataTransaction;

/// Roles resolved for one write of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectivePermissions {
    pub id: EntityId,
    pub type_name: String,
    /// Encryption keys that can read the new version.
    pub read: BTreeSet<KeyHash>,
    /// Signing keys allowed to write the new version.
    pub write: BTreeSet<KeyHash>,
    /// A version of the entity is already in the chain.
    pub existing: bool,
    /// The accepted version forbids any further write.
    pub immutable: bool,
}

impl EffectivePermissions {
    /// Human-readable list of the write roles, for error messages.
    pub fn describe_write(&self) -> String {
        if self.write.is_empty() {
            return " [needs: impossible, no write roles]".to_string();
        }
        self.write
            .iter()
            .map(|hash| format!(" [needs: hash={hash}]"))
            .collect()
    }
}

/// Role-bearing fields of one level of the tree.
struct Level {
    parent_id: Option<EntityId>,
    inherit_read: bool,
    inherit_write: bool,
    allow_read: BTreeSet<KeyHash>,
    allow_write: BTreeSet<KeyHash>,
}

impl From<&Entity> for Level {
    fn from(entity: &Entity) -> Self {
        Self {
            parent_id: entity.parent_id,
            inherit_read: entity.roles.inherit_read,
            inherit_write: entity.roles.inherit_write,
            allow_read: entity.roles.allow_read.clone(),
            allow_write: entity.roles.allow_write.clone(),
        }
    }
}

impl From<MessageDataHeader> for Level {
    fn from(header: MessageDataHeader) -> Self {
        Self {
            parent_id: header.parent_id,
            inherit_read: header.inherit_read,
            inherit_write: header.inherit_write,
            allow_read: header.allow_read,
            allow_write: header.allow_write,
        }
    }
}

/// Resolves [`EffectivePermissions`] against a chain and an optional transaction.
pub struct EffectivePermissionsBuilder<'a> {
    partition: &'a PartitionKey,
    chain: &'a DataPartitionChain,
    policy: &'a ParentPolicyTable,
    authorities: &'a dyn ImplicitAuthority,
    staged: Option<&'a DataTransaction>,
}

impl<'a> EffectivePermissionsBuilder<'a> {
    pub fn new(chain: &'a DataPartitionChain, authorities: &'a dyn ImplicitAuthority) -> Self {
        Self {
            partition: chain.partition_key(),
            chain,
            policy: chain.policy(),
            authorities,
            staged: None,
        }
    }

    /// Consult entities staged in `tx` before the chain.
    pub fn with_staged(mut self, tx: &'a DataTransaction) -> Self {
        self.staged = Some(tx);
        self
    }

    /// Level of `id`: staged entity first, then the latest accepted header.
    fn level(&self, id: &EntityId) -> Option<Level> {
        if let Some(entity) = self.staged.and_then(|tx| tx.find(self.partition, id)) {
            return Some(Level::from(entity));
        }
        self.chain
            .get_data(id)
            .and_then(|c| c.last_header())
            .map(Level::from)
    }

    pub fn build(&self, entity: &Entity) -> EffectivePermissions {
        let existing = self.chain.get_data(&entity.id).and_then(|c| c.last_header());
        let immutable = existing.as_ref().is_some_and(|h| h.is_immutable());
        let is_new = existing.is_none();

        let read = self.readers(entity);
        let write = if is_new && entity.parent_id.is_none() && self.is_implicitly_rooted(entity) {
            self.implicit_writer(entity).into_iter().collect()
        } else {
            self.writers(entity, existing)
        };

        EffectivePermissions {
            id: entity.id,
            type_name: entity.type_name.clone(),
            read,
            write,
            existing: !is_new,
            immutable,
        }
    }

    /// Own read roles plus those inherited from the parents.
    fn readers(&self, entity: &Entity) -> BTreeSet<KeyHash> {
        let mut read = entity.roles.allow_read.clone();
        let mut inherit = entity.roles.inherit_read;
        let mut next = entity.parent_id;
        let mut seen = BTreeSet::from([entity.id]);

        while inherit && let Some(id) = next {
            if !seen.insert(id) {
                break;
            }
            let Some(level) = self.level(&id) else {
                break;
            };
            read.extend(level.allow_read);
            inherit = level.inherit_read;
            next = level.parent_id;
        }
        read
    }

    /// Write roles the chain will check: those of the accepted version (or,
    /// for a new entity, of its parent) and their ancestors, plus the root of trust.
    fn writers(&self, entity: &Entity, existing: Option<MessageDataHeader>) -> BTreeSet<KeyHash> {
        let mut write = BTreeSet::new();
        let mut seen = BTreeSet::from([entity.id]);
        let mut level = match existing {
            Some(header) => Some(Level::from(header)),
            None => entity.parent_id.and_then(|pid| {
                seen.insert(pid);
                self.level(&pid)
            }),
        };

        while let Some(current) = level.take() {
            write.extend(current.allow_write);
            if !current.inherit_write {
                break;
            }
            level = current
                .parent_id
                .filter(|pid| seen.insert(*pid))
                .and_then(|pid| self.level(&pid));
        }

        if let Some(root) = self.chain.get_root_of_trust(&entity.id) {
            write.extend(root.allow_write);
        }
        write
    }

    /// A new top-level entity of this type is claimed or vouched for by an authority.
    fn is_implicitly_rooted(&self, entity: &Entity) -> bool {
        let ty = entity.type_name.as_str();
        self.policy.is_claimable(ty)
            || (self.policy.is_parent_free(ty)
                && (self.policy.static_authority(ty).is_some() || self.policy.is_dynamic_authority(ty)))
    }

    /// Writer of a brand new top-level entity: the public write key for
    /// claimable types, or the key of its implicit authority.
    fn implicit_writer(&self, entity: &Entity) -> Option<KeyHash> {
        let ty = entity.type_name.as_str();
        if self.policy.is_claimable(ty) {
            return Some(trust_of_public_write().hash());
        }
        let domain = match self.policy.static_authority(ty) {
            Some(domain) => domain.to_string(),
            None => entity.implicit_authority.iter().next()?.clone(),
        };
        self.authorities.resolve(&domain).map(|key| key.public_key_hash)
    }
}
