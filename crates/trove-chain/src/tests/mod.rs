//! Tests for the trove-chain crate.


use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use trove_crypto::{CryptoPort, DalekCrypto, PrivateKey};
use trove_types::{
    Entity, EntityId, KeyHash, MessageData, MessageDataDigest, MessageDataHeader, MessageMeta,
    ParentPolicyTable, PartitionKey,
};

use crate::authority::StaticAuthorities;
use crate::chain::{ChainConfig, ChainContext, DataPartitionChain};
use crate::container::PayloadReader;
use crate::error::ChainError;

/// Deterministic signing key from a seed byte.
fn test_write_key(seed: u8) -> PrivateKey {
    PrivateKey::signing_from_seed(&[seed; 32]).with_alias(format!("writer-{seed}"))
}

fn test_partition() -> PartitionKey {
    PartitionKey::new("chain-tests", 0)
}

/// Account (claimable) ← Folder ← Doc; Tenant rooted at example.org;
/// Site rooted by its own header; Note is parent-free but unclaimable.
fn test_policy() -> ParentPolicyTable {
    ParentPolicyTable::new()
        .claimable("Account")
        .allow_parent("Folder", "Account")
        .allow_parent("Doc", "Folder")
        .implicit_authority("Tenant", "example.org")
        .dynamic_implicit_authority("Site")
        .parent_free("Note")
}

fn test_context(authorities: StaticAuthorities) -> ChainContext {
    ChainContext::new(
        Arc::new(test_policy()),
        Arc::new(DalekCrypto::new()),
        Arc::new(authorities),
    )
    .with_config(ChainConfig {
        partial_trust_limit: 100,
        extra_validation: true,
        decrypt_cache_capacity: 4,
    })
}

fn test_chain() -> DataPartitionChain {
    DataPartitionChain::new(test_partition(), test_context(StaticAuthorities::new()))
}

/// Header of a fresh version writable by `writers`.
fn test_header(id: EntityId, ty: &str, writers: &[&PrivateKey]) -> MessageDataHeader {
    let mut header = MessageDataHeader::new(id, ty);
    header.allow_write = writers.iter().map(|k| k.hash()).collect();
    header
}

/// Sign `header` and a JSON body with `key`. `None` body makes a tombstone.
fn signed(header: MessageDataHeader, body: Option<serde_json::Value>, key: &PrivateKey) -> MessageData {
    let crypto = DalekCrypto::new();
    let payload = body.map(|b| Bytes::from(serde_json::to_vec(&b).unwrap()));
    let mut data = MessageData::new(header, None, payload);

    let seed = crypto.random_bytes(16);
    let digest = crypto.hash(&seed, &data.digest_input().unwrap());
    let signature = crypto.sign(key.private_bytes(), &digest).unwrap();
    data.digest = Some(MessageDataDigest {
        seed,
        digest,
        signature,
        public_key_hash: key.hash(),
    });
    data
}

fn test_meta(offset: u64, id: EntityId) -> MessageMeta {
    MessageMeta::new(offset, id.to_string(), 1_700_000_000_000 + offset)
}

/// Reads plain JSON payloads, standing in for the decrypting serializer.
struct JsonReader {
    keys: BTreeSet<KeyHash>,
}

impl JsonReader {
    fn new() -> Self {
        Self {
            keys: BTreeSet::new(),
        }
    }

    fn with_key(key: KeyHash) -> Self {
        Self {
            keys: BTreeSet::from([key]),
        }
    }
}

impl PayloadReader for JsonReader {
    fn reader_keys(&self) -> &BTreeSet<KeyHash> {
        &self.keys
    }

    fn read(&self, data: &MessageData) -> Result<Option<Entity>, ChainError> {
        let Some(payload) = &data.payload else {
            return Ok(None);
        };
        let body: serde_json::Value =
            serde_json::from_slice(payload).map_err(|e| ChainError::Payload {
                id: data.header.id,
                reason: e.to_string(),
            })?;
        Ok(Some(Entity {
            partition: test_partition(),
            id: data.header.id,
            type_name: data.header.payload_class.clone(),
            parent_id: data.header.parent_id,
            version: Some(data.header.version),
            previous_version: data.header.previous_version,
            merges: data.header.merges.clone(),
            roles: Default::default(),
            implicit_authority: data.header.implicit_authority.clone(),
            body,
        }))
    }
}
